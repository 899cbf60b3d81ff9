//! The daemon LocalAPI surface the adapter proxies.
//!
//! Payloads stay `serde_json::Value` on purpose: passthrough endpoints
//! relay whatever the daemon reports, so fields added upstream surface
//! without adapter changes. Only DNS answers and raw dumps are shaped.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::Method;
use serde_json::Value;
use std::net::IpAddr;
use std::path::PathBuf;
use ts_core::localapi::{LocalApiError, UnixHttpClient};
use ts_proto::DnsHeader;

/// A DNS answer as reported by the daemon, already shaped for the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsAnswer {
    pub header: DnsHeader,
    pub responses: Vec<String>,
    pub resolvers: Vec<String>,
}

#[async_trait]
pub trait LocalApi: Send + Sync + 'static {
    async fn status(&self) -> Result<Value, LocalApiError>;
    async fn prefs(&self) -> Result<Value, LocalApiError>;
    async fn drive_shares(&self) -> Result<Value, LocalApiError>;
    async fn dns_os_config(&self) -> Result<Value, LocalApiError>;
    async fn serve_config(&self) -> Result<Value, LocalApiError>;
    async fn app_conn_routes(&self) -> Result<Value, LocalApiError>;
    async fn ping(&self, target: IpAddr, ping_type: &str) -> Result<Value, LocalApiError>;
    async fn query_dns(&self, name: &str, query_type: &str) -> Result<DnsAnswer, LocalApiError>;
    async fn pprof(&self, profile_type: &str, seconds: u32) -> Result<Bytes, LocalApiError>;
    async fn goroutines(&self) -> Result<Bytes, LocalApiError>;

    /// Tail the daemon log stream; the connection lives for the stream.
    async fn tail_daemon_logs(
        &self,
    ) -> Result<BoxStream<'static, Result<Bytes, LocalApiError>>, LocalApiError>;

    /// Subscribe to the daemon event bus (one JSON event per line).
    async fn stream_bus_events(
        &self,
    ) -> Result<BoxStream<'static, Result<Bytes, LocalApiError>>, LocalApiError>;
}

// ---------------------------------------------------------------------------
// DaemonClient
// ---------------------------------------------------------------------------

/// Production implementation over the daemon's unix control socket.
pub struct DaemonClient {
    http: UnixHttpClient,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf) -> Self {
        DaemonClient {
            http: UnixHttpClient::new(socket_path),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, LocalApiError> {
        let body = self.http.get(path).await?;
        serde_json::from_slice(&body).map_err(|e| LocalApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl LocalApi for DaemonClient {
    async fn status(&self) -> Result<Value, LocalApiError> {
        self.get_json("/localapi/v0/status").await
    }

    async fn prefs(&self) -> Result<Value, LocalApiError> {
        self.get_json("/localapi/v0/prefs").await
    }

    async fn drive_shares(&self) -> Result<Value, LocalApiError> {
        self.get_json("/localapi/v0/drive/shares").await
    }

    async fn dns_os_config(&self) -> Result<Value, LocalApiError> {
        self.get_json("/localapi/v0/dns-osconfig").await
    }

    async fn serve_config(&self) -> Result<Value, LocalApiError> {
        self.get_json("/localapi/v0/serve-config").await
    }

    async fn app_conn_routes(&self) -> Result<Value, LocalApiError> {
        // A daemon with no app connector configured answers 404; report that
        // as an empty route set rather than an error.
        match self.get_json("/localapi/v0/appconnector/routes").await {
            Ok(v) => Ok(v),
            Err(LocalApiError::Status(404, _)) => Ok(Value::Object(serde_json::Map::new())),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self, target: IpAddr, ping_type: &str) -> Result<Value, LocalApiError> {
        let body = self
            .http
            .post(
                &format!("/localapi/v0/ping?ip={}&type={}", target, ping_type),
                None,
            )
            .await?;
        serde_json::from_slice(&body).map_err(|e| LocalApiError::Decode(e.to_string()))
    }

    async fn query_dns(&self, name: &str, query_type: &str) -> Result<DnsAnswer, LocalApiError> {
        let value = self
            .get_json(&format!(
                "/localapi/v0/query-dns?name={}&type={}",
                name, query_type
            ))
            .await?;

        // Field-by-field soft traversal; a missing field is an empty slot,
        // not a failure.
        let response_code = value
            .get("ResponseCode")
            .and_then(Value::as_str)
            .unwrap_or("NOERROR")
            .to_owned();
        let responses = string_array(value.get("Responses"));
        let resolvers = value
            .get("Resolvers")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|r| {
                        r.get("Addr")
                            .and_then(Value::as_str)
                            .or_else(|| r.as_str())
                            .map(ToOwned::to_owned)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(DnsAnswer {
            header: DnsHeader {
                response_code,
                ..DnsHeader::default()
            },
            responses,
            resolvers,
        })
    }

    async fn pprof(&self, profile_type: &str, seconds: u32) -> Result<Bytes, LocalApiError> {
        self.http
            .get(&format!(
                "/localapi/v0/profile?name={}&seconds={}",
                profile_type, seconds
            ))
            .await
    }

    async fn goroutines(&self) -> Result<Bytes, LocalApiError> {
        self.http.get("/localapi/v0/goroutines").await
    }

    async fn tail_daemon_logs(
        &self,
    ) -> Result<BoxStream<'static, Result<Bytes, LocalApiError>>, LocalApiError> {
        let stream = self.http.stream(Method::GET, "/localapi/v0/logtap").await?;
        Ok(stream.boxed())
    }

    async fn stream_bus_events(
        &self,
    ) -> Result<BoxStream<'static, Result<Bytes, LocalApiError>>, LocalApiError> {
        let stream = self.http.stream(Method::GET, "/localapi/v0/bus").await?;
        Ok(stream.boxed())
    }
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str().map(ToOwned::to_owned))
                .collect()
        })
        .unwrap_or_default()
}
