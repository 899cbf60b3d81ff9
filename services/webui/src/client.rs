//! Overlay-aware HTTP client for adapter calls.
//!
//! Each call dials the adapter across the mesh, runs one HTTP/1.1 exchange
//! over the dialed stream, and propagates the `trace-id` and `ts-username`
//! headers. Non-2xx responses are errors carrying the status line, which is
//! what fan-out handlers record in per-target result slots.

use crate::directory::AdapterDirectory;
use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use ts_core::overlay::Overlay;
use ts_core::RequestTrace;
use ts_proto::{TRACE_ID_HEADER, USERNAME_HEADER};

pub struct CallResponse {
    pub body: Bytes,
    pub content_type: Option<String>,
}

pub struct AdapterClient {
    overlay: Arc<dyn Overlay>,
    directory: Arc<AdapterDirectory>,
    adapter_port: u16,
}

impl AdapterClient {
    pub fn new(
        overlay: Arc<dyn Overlay>,
        directory: Arc<AdapterDirectory>,
        adapter_port: u16,
    ) -> Self {
        AdapterClient {
            overlay,
            directory,
            adapter_port,
        }
    }

    /// Call an adapter by overlay name.
    pub async fn call_adapter(
        &self,
        trace: &RequestTrace,
        method: Method,
        adapter: &str,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> Result<CallResponse, CallError> {
        let stream = self
            .overlay
            .dial(adapter, self.adapter_port)
            .await
            .map_err(|e| CallError::Dial(e.to_string()))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| CallError::Http(e.to_string()))?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header(
                header::HOST,
                format!("{}:{}", adapter, self.adapter_port),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .header(TRACE_ID_HEADER, &trace.trace_id)
            .header(USERNAME_HEADER, &trace.username)
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| CallError::Http(e.to_string()))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| CallError::Http(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| CallError::Http(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(CallError::Status(status));
        }
        Ok(CallResponse { body, content_type })
    }

    /// Translate a real host name through the directory, then call.
    pub async fn call_host(
        &self,
        trace: &RequestTrace,
        method: Method,
        host: &str,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> Result<CallResponse, CallError> {
        let adapter = match self.directory.adapter_for(host).await {
            Some(adapter) if !adapter.is_empty() => adapter,
            _ => return Err(CallError::UnknownHost(host.to_owned())),
        };
        self.call_adapter(trace, method, &adapter, path_and_query, body)
            .await
    }
}

#[derive(Debug)]
pub enum CallError {
    UnknownHost(String),
    Dial(String),
    Http(String),
    Status(StatusCode),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::UnknownHost(host) => {
                write!(f, "failed to find adapter for host: {}", host)
            }
            CallError::Dial(s) => write!(f, "{}", s),
            CallError::Http(s) => write!(f, "{}", s),
            CallError::Status(status) => write!(
                f,
                "{} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ),
        }
    }
}

impl std::error::Error for CallError {}
