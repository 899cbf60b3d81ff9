// ts-proto: Shared protocol constants and wire types for TSymbiote.
//
// Both the adapter and the WebUI link this crate. The endpoint table is the
// single source of truth for route registration on both sides; the timeout
// constants are wire-visible behavior and must not drift.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

pub const SERVER_HARD_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);
pub const SERVER_IDLE_TIMEOUT: Duration = Duration::from_secs(15);
pub const PING_PONG_INTERVAL: Duration = Duration::from_secs(5);
pub const WS_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// `PING_PONG_INTERVAL + WS_WRITE_TIMEOUT`.
pub const PING_PONG_TIMEOUT: Duration = Duration::from_secs(6);
/// Equal to [`PING_PONG_TIMEOUT`]: a draining server must outlive one full
/// heartbeat round so in-flight sockets can close normally.
pub const SERVER_DRAIN_PERIOD: Duration = PING_PONG_TIMEOUT;
pub const OUTGOING_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Overlay tag carried by every adapter device.
pub const ADAPTER_TAG: &str = "tag:tsymbiote-adapter";
/// Overlay tag the adapter requires of its callers.
pub const WEBUI_TAG: &str = "tag:tsymbiote-webui";

/// Trace correlation header, propagated WebUI -> adapter.
pub const TRACE_ID_HEADER: &str = "trace-id";
/// Resolved caller identity header, propagated WebUI -> adapter.
pub const USERNAME_HEADER: &str = "ts-username";

// ---------------------------------------------------------------------------
// Endpoint table
// ---------------------------------------------------------------------------

/// Every proxied endpoint, in registration order.
///
/// Each entry has two forms: `/name` on the adapter and `/api/name` on the
/// WebUI. `Hosts` and `PeerMap` exist only on the WebUI but live in the same
/// table so the path namespace has one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownPath {
    Status,
    QueryDns,
    Ping,
    Pprof,
    Prefs,
    Logs,
    DriveShares,
    DnsConfig,
    ServeConfig,
    AppConnRoutes,
    Goroutines,
    Hosts,
    PeerMap,
    BusEvents,
}

impl KnownPath {
    pub const ALL: [KnownPath; 14] = [
        KnownPath::Status,
        KnownPath::QueryDns,
        KnownPath::Ping,
        KnownPath::Pprof,
        KnownPath::Prefs,
        KnownPath::Logs,
        KnownPath::DriveShares,
        KnownPath::DnsConfig,
        KnownPath::ServeConfig,
        KnownPath::AppConnRoutes,
        KnownPath::Goroutines,
        KnownPath::Hosts,
        KnownPath::PeerMap,
        KnownPath::BusEvents,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KnownPath::Status => "status",
            KnownPath::QueryDns => "querydns",
            KnownPath::Ping => "ping",
            KnownPath::Pprof => "pprof",
            KnownPath::Prefs => "prefs",
            KnownPath::Logs => "logs",
            KnownPath::DriveShares => "driveshares",
            KnownPath::DnsConfig => "dnsconfig",
            KnownPath::ServeConfig => "serveconfig",
            KnownPath::AppConnRoutes => "appconnroutes",
            KnownPath::Goroutines => "goroutines",
            KnownPath::Hosts => "hosts",
            KnownPath::PeerMap => "peermap",
            KnownPath::BusEvents => "busevents",
        }
    }

    /// The adapter-side form, e.g. `/status`.
    pub fn adapter(self) -> String {
        format!("/{}", self.name())
    }

    /// The WebUI-side form, e.g. `/api/status`.
    pub fn webui(self) -> String {
        format!("/api/{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Aggregation envelope
// ---------------------------------------------------------------------------

/// One frame of an aggregated WebSocket stream.
///
/// Every upstream frame is wrapped in this envelope so the browser can
/// demultiplex by host. `message` travels as base64 inside JSON text frames.
/// Two synthetic frames reuse the envelope: `message = b"websocket closed"`
/// when an upstream dies, and a bare text `"pong"` (no envelope) answering
/// the client heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostMessage {
    pub host: String,
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
}

/// Payload of the synthetic frame announcing an upstream death.
pub const WEBSOCKET_CLOSED_MESSAGE: &[u8] = b"websocket closed";

/// Application-level heartbeat request (browsers cannot send WS ping frames).
pub const CLIENT_PING: &str = "ping";
/// Application-level heartbeat reply.
pub const CLIENT_PONG: &str = "pong";

/// serde adapter encoding byte fields as standard base64 strings, matching
/// how the envelope travels in JSON text frames.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Shared request/response payloads
// ---------------------------------------------------------------------------

/// Ping command as the adapter receives it: one target per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingInput {
    pub target: String,
    pub count: u32,
    #[serde(rename = "pingType")]
    pub ping_type: String,
    /// Go-style duration string, e.g. `"250ms"`; see [`parse_duration`].
    pub delay: String,
}

/// DNS query input. `hosts` is populated on the WebUI form and absent on the
/// adapter form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDnsInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    pub name: String,
    #[serde(rename = "queryType")]
    pub query_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsHeader {
    #[serde(rename = "responseCode")]
    pub response_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "type")]
    pub record_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDnsResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    pub header: DnsHeader,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<String>,
    pub resolvers: Vec<String>,
}

/// Profile dump input. `hosts` is populated on the WebUI form only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PprofInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(rename = "type")]
    pub profile_type: String,
    #[serde(default)]
    pub seconds: u32,
}

// ---------------------------------------------------------------------------
// Unstructured JSON
// ---------------------------------------------------------------------------

/// Flatten a serializable value into a JSON object keyed by its field names.
///
/// Adapter passthrough endpoints reply with whatever the daemon reports, so
/// fields added upstream surface without code changes here.
pub fn struct_to_map<T: Serialize>(value: &T) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Duration strings
// ---------------------------------------------------------------------------

/// Parse a Go-style duration string such as `"300ms"`, `"1.5s"` or `"1m30s"`.
///
/// Accepted units: `ns`, `us`, `ms`, `s`, `m`, `h`. An empty string or a
/// segment without a unit is an error.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| DurationParseError::MissingUnit(input.to_owned()))?;
        if number_len == 0 {
            return Err(DurationParseError::Invalid(input.to_owned()));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| DurationParseError::Invalid(input.to_owned()))?;
        rest = &rest[number_len..];

        let (unit_len, nanos_per_unit) = if rest.starts_with("ns") {
            (2, 1.0)
        } else if rest.starts_with("us") {
            (2, 1_000.0)
        } else if rest.starts_with("ms") {
            (2, 1_000_000.0)
        } else if rest.starts_with('s') {
            (1, 1_000_000_000.0)
        } else if rest.starts_with('m') {
            (1, 60.0 * 1_000_000_000.0)
        } else if rest.starts_with('h') {
            (1, 3_600.0 * 1_000_000_000.0)
        } else {
            return Err(DurationParseError::MissingUnit(input.to_owned()));
        };
        rest = &rest[unit_len..];
        total += Duration::from_nanos((value * nanos_per_unit) as u64);
    }
    Ok(total)
}

#[derive(Debug, PartialEq, Eq)]
pub enum DurationParseError {
    Empty,
    MissingUnit(String),
    Invalid(String),
}

impl std::fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurationParseError::Empty => write!(f, "empty duration string"),
            DurationParseError::MissingUnit(s) => write!(f, "missing unit in duration '{}'", s),
            DurationParseError::Invalid(s) => write!(f, "invalid duration '{}'", s),
        }
    }
}

impl std::error::Error for DurationParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_table_has_adapter_and_webui_forms() {
        assert_eq!(KnownPath::Status.adapter(), "/status");
        assert_eq!(KnownPath::Status.webui(), "/api/status");
        assert_eq!(KnownPath::BusEvents.adapter(), "/busevents");
        assert_eq!(KnownPath::QueryDns.webui(), "/api/querydns");
        assert_eq!(KnownPath::ALL.len(), 14);
    }

    #[test]
    fn drain_period_matches_heartbeat_round() {
        assert_eq!(PING_PONG_TIMEOUT, PING_PONG_INTERVAL + WS_WRITE_TIMEOUT);
        assert_eq!(SERVER_DRAIN_PERIOD, PING_PONG_TIMEOUT);
        assert_eq!(SERVER_IDLE_TIMEOUT, Duration::from_secs(15));
        assert_eq!(SERVER_HARD_SHUTDOWN_TIMEOUT, Duration::from_secs(3));
        assert_eq!(OUTGOING_REQUEST_TIMEOUT, Duration::from_secs(5));
    }

    #[test]
    fn host_message_round_trips_bytes() {
        let original = HostMessage {
            host: "bastion-1".to_owned(),
            message: vec![0x00, 0x7f, 0xff, b'a', b'\n'],
        };
        let encoded = serde_json::to_string(&original).expect("envelope should serialize");
        let decoded: HostMessage =
            serde_json::from_str(&encoded).expect("envelope should deserialize");
        assert_eq!(decoded, original);
    }

    #[test]
    fn host_message_uses_wire_field_names_and_base64() {
        let frame = HostMessage {
            host: "x".to_owned(),
            message: b"websocket closed".to_vec(),
        };
        let encoded = serde_json::to_string(&frame).expect("envelope should serialize");
        assert_eq!(
            encoded,
            r#"{"Host":"x","Message":"d2Vic29ja2V0IGNsb3NlZA=="}"#
        );
    }

    #[test]
    fn struct_to_map_keys_equal_field_names() {
        #[derive(Serialize)]
        struct SelfStatus {
            #[serde(rename = "HostName")]
            host_name: String,
            #[serde(rename = "Online")]
            online: bool,
        }
        let map = struct_to_map(&SelfStatus {
            host_name: "a".to_owned(),
            online: true,
        });
        let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["HostName", "Online"]);
    }

    #[test]
    fn struct_to_map_of_non_object_is_empty() {
        assert!(struct_to_map(&42u32).is_empty());
    }

    #[test]
    fn parse_duration_accepts_go_forms() {
        assert_eq!(
            parse_duration("250ms").expect("ms"),
            Duration::from_millis(250)
        );
        assert_eq!(parse_duration("1s").expect("s"), Duration::from_secs(1));
        assert_eq!(
            parse_duration("1.5s").expect("fractional"),
            Duration::from_millis(1500)
        );
        assert_eq!(
            parse_duration("1m30s").expect("compound"),
            Duration::from_secs(90)
        );
        assert_eq!(parse_duration("0").expect("zero"), Duration::ZERO);
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert!(matches!(
            parse_duration("5"),
            Err(DurationParseError::MissingUnit(_))
        ));
        assert!(matches!(
            parse_duration("abc"),
            Err(DurationParseError::Invalid(_))
        ));
    }

    #[test]
    fn ping_input_wire_names_match_contract() {
        let input = PingInput {
            target: "peer-a".to_owned(),
            count: 3,
            ping_type: "disco".to_owned(),
            delay: "1s".to_owned(),
        };
        let encoded = serde_json::to_string(&input).expect("ping input should serialize");
        assert!(encoded.contains(r#""pingType":"disco""#));
        assert!(encoded.contains(r#""target":"peer-a""#));
    }
}
