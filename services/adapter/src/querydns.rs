//! DNS query through the daemon's resolver path.

use crate::AdapterState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use tracing::error;
use ts_core::RequestTrace;
use ts_proto::{QueryDnsInput, QueryDnsResult};

pub async fn query_dns(
    State(state): State<AdapterState>,
    Extension(trace): Extension<RequestTrace>,
    body: Bytes,
) -> Response {
    let input: QueryDnsInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to decode dns query input");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let answer = match state.local.query_dns(&input.name, &input.query_type).await {
        Ok(answer) => answer,
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to query dns");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let responses = if answer.responses.is_empty() {
        vec!["No answer.".to_owned()]
    } else {
        answer.responses
    };

    Json(QueryDnsResult {
        header: answer.header,
        responses,
        resolvers: answer.resolvers,
        ..QueryDnsResult::default()
    })
    .into_response()
}
