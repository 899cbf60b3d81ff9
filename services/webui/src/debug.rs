//! `/{host}/debug/pprof/...`: relay a host's live profiling surface.
//!
//! The host segment is stripped and the remainder (plus query string) is
//! forwarded to the matching adapter; body and content type come back
//! verbatim.

use crate::WebUiState;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use http::Method;
use tracing::error;
use ts_core::RequestTrace;

pub async fn remote_debug_index(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
    Path(host): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    relay(state, trace, host, String::new(), query).await
}

pub async fn remote_debug(
    State(state): State<WebUiState>,
    Extension(trace): Extension<RequestTrace>,
    Path((host, rest)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    relay(state, trace, host, rest, query).await
}

async fn relay(
    state: WebUiState,
    trace: RequestTrace,
    host: String,
    rest: String,
    query: Option<String>,
) -> Response {
    let mut path = format!("/debug/pprof/{}", rest);
    if let Some(query) = query {
        path.push('?');
        path.push_str(&query);
    }

    match state
        .client
        .call_host(&trace, Method::GET, &host, &path, None)
        .await
    {
        Ok(response) => {
            let content_type = response
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_owned());
            ([(header::CONTENT_TYPE, content_type)], response.body).into_response()
        }
        Err(e) => {
            error!(trace_id = %trace.trace_id, error = %e, "failed to call adapter");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
