//! HTTP/1.1 client for the overlay daemon's unix-socket LocalAPI.
//!
//! The daemon answers plain HTTP over its control socket. One connection is
//! opened per request; streaming endpoints (log tail, bus events) keep the
//! connection alive for the life of the returned body stream.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::{header, Method, Request};
use http_body_util::{BodyExt, BodyStream, Full};
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;

/// Where the daemon listens when nothing says otherwise.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/meshd/meshd.sock";

/// Socket paths probed by `--discover-socket`, in order. The later forms are
/// what sidecar deployments mount into the pod.
const WELL_KNOWN_SOCKETS: [&str; 3] = [
    DEFAULT_SOCKET_PATH,
    "/var/run/meshd.sock",
    "/tmp/meshd.sock",
];

/// Probe the well-known daemon socket locations.
pub fn discover_socket() -> Option<PathBuf> {
    WELL_KNOWN_SOCKETS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

#[derive(Clone)]
pub struct UnixHttpClient {
    socket_path: PathBuf,
}

impl UnixHttpClient {
    pub fn new(socket_path: PathBuf) -> Self {
        UnixHttpClient { socket_path }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn get(&self, path_and_query: &str) -> Result<Bytes, LocalApiError> {
        self.request(Method::GET, path_and_query, None).await
    }

    pub async fn post(
        &self,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> Result<Bytes, LocalApiError> {
        self.request(Method::POST, path_and_query, body).await
    }

    /// One request, one connection, full body buffered.
    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> Result<Bytes, LocalApiError> {
        let mut sender = self.connect().await?;
        let request = build_request(method, path_and_query, body)?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| LocalApiError::Http(e.to_string()))?;

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| LocalApiError::Http(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(LocalApiError::Status(
                status.as_u16(),
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }
        Ok(bytes)
    }

    /// Open a request and hand back the body as a chunk stream. The
    /// underlying connection lives until the stream is dropped.
    pub async fn stream(
        &self,
        method: Method,
        path_and_query: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, LocalApiError>>, LocalApiError> {
        let mut sender = self.connect().await?;
        let request = build_request(method, path_and_query, None)?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| LocalApiError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| LocalApiError::Http(e.to_string()))?
                .to_bytes();
            return Err(LocalApiError::Status(
                status.as_u16(),
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }

        let stream = BodyStream::new(response.into_body()).filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(LocalApiError::Http(e.to_string()))),
            }
        });
        Ok(stream.boxed())
    }

    async fn connect(
        &self,
    ) -> Result<hyper::client::conn::http1::SendRequest<Full<Bytes>>, LocalApiError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| LocalApiError::Connect(self.socket_path.clone(), e))?;
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| LocalApiError::Http(e.to_string()))?;
        // The connection task ends when the sender and any body are dropped.
        tokio::spawn(async move {
            let _ = conn.await;
        });
        Ok(sender)
    }
}

fn build_request(
    method: Method,
    path_and_query: &str,
    body: Option<Bytes>,
) -> Result<Request<Full<Bytes>>, LocalApiError> {
    Request::builder()
        .method(method)
        .uri(path_and_query)
        .header(header::HOST, "local-meshd")
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|e| LocalApiError::Http(e.to_string()))
}

#[derive(Debug)]
pub enum LocalApiError {
    Connect(PathBuf, std::io::Error),
    Http(String),
    Status(u16, String),
    Decode(String),
}

impl std::fmt::Display for LocalApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalApiError::Connect(path, e) => {
                write!(f, "connecting to daemon socket '{}': {}", path.display(), e)
            }
            LocalApiError::Http(s) => write!(f, "localapi http error: {}", s),
            LocalApiError::Status(code, body) => {
                write!(f, "localapi returned status {}: {}", code, body)
            }
            LocalApiError::Decode(s) => write!(f, "localapi decode error: {}", s),
        }
    }
}

impl std::error::Error for LocalApiError {}
