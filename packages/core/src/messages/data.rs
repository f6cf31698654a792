//! Data-plane messages: registration, liveness, routing queries, and
//! service-to-service brokering.

use serde::{Deserialize, Serialize};

use crate::types::ServiceSummary;

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// A worker's registration request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub peer_groups: Vec<String>,
    /// Requested service mode (`managed`, `remote`, `planetary`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<String>,
    /// Caller environment mode: `"C"` when the caller brings its own
    /// address, `"M"` under a managing parent, empty otherwise.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub env: String,
    /// Caller-provided address, honored only when `env == "C"`.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub address: String,
}

/// Registration outcome. On failure only `error` is populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReply {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Registration-state update: shutdown notices and container federation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUpdate {
    /// One of the strings in [`crate::messages::requests`].
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

/// Acknowledgement for a [`ServiceUpdate`] or other fire-and-forget call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    /// Assigned address, populated for `container.register`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    /// Assigned id, populated for `container.register`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl Receipt {
    #[must_use]
    pub fn ack(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(code: impl Into<String>) -> Self {
        Self {
            error: Some(code.into()),
            ..Self::default()
        }
    }
}

/// Addressing header of a brokered data request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transport {
    pub sender: String,
    pub target: String,
    pub method: String,
}

/// A data request routed through the Core.
///
/// The Core never carries `data` to the target; it brokers the exchange
/// by handing the sender the target's address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPayload {
    pub tport: Transport,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<String>,
}

/// Broker verdict for a data request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataReply {
    /// Where the sender should dial to reach the target directly.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Generic action request carrying an operation string and optional target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remote_id: Option<String>,
}

impl Action {
    #[must_use]
    pub fn request(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            target: None,
            remote_id: None,
        }
    }
}

/// Aggregated summary of one or more services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReceipt {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub services: Vec<ServiceSummary>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Liveness probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    pub time: String,
}

/// Liveness response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
}

/// Peer-group-gated address resolution request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoIsRequest {
    /// Name or alias to resolve.
    pub name: String,
}

/// Resolution result for a [`WhoIsRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoIsReply {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Request / response enums
// ---------------------------------------------------------------------------

/// Top-level data-plane request.
///
/// Internally tagged on `"type"` with `SCREAMING_SNAKE_CASE` variant names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataRequest {
    Register(RegisterRequest),
    Update(ServiceUpdate),
    Data(DataPayload),
    Summary(Action),
    Alive(Ping),
    WhoIs(WhoIsRequest),
}

/// Top-level data-plane response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataResponse {
    Register(RegisterReply),
    Receipt(Receipt),
    Data(DataReply),
    Summary(SummaryReceipt),
    Pong(Pong),
    WhoIs(WhoIsReply),
    /// Protocol-level failure: the request could not be interpreted.
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire;

    fn round_trip_request(msg: &DataRequest) {
        let bytes = wire::encode(msg).expect("serialize failed");
        let decoded: DataRequest = wire::decode(&bytes).expect("deserialize failed");
        assert_eq!(msg, &decoded);
    }

    #[test]
    fn serde_register_with_aliases() {
        round_trip_request(&DataRequest::Register(RegisterRequest {
            name: "svc-a".to_string(),
            aliases: vec!["alpha".to_string(), "a".to_string()],
            peer_groups: vec!["g1".to_string()],
            mode: Some("planetary".to_string()),
            env: String::new(),
            address: String::new(),
        }));
    }

    #[test]
    fn serde_register_defaults_omitted_fields() {
        // Sparse registration: only the name on the wire.
        let bytes = wire::encode(&DataRequest::Register(RegisterRequest {
            name: "svc-a".to_string(),
            ..RegisterRequest::default()
        }))
        .unwrap();
        let decoded: DataRequest = wire::decode(&bytes).unwrap();
        let DataRequest::Register(req) = decoded else {
            panic!("wrong variant");
        };
        assert!(req.aliases.is_empty());
        assert!(req.env.is_empty());
        assert!(req.mode.is_none());
    }

    #[test]
    fn serde_update_shutdown_notice() {
        round_trip_request(&DataRequest::Update(ServiceUpdate {
            request: crate::messages::requests::CORE_SHUTDOWN.to_string(),
            message: Some("svc-a".to_string()),
        }));
    }

    #[test]
    fn serde_data_brokering() {
        round_trip_request(&DataRequest::Data(DataPayload {
            tport: Transport {
                sender: "svc-a".to_string(),
                target: "svc-b".to_string(),
                method: "orders.list".to_string(),
            },
            data: Some("{\"page\":1}".to_string()),
        }));
    }

    #[test]
    fn serde_response_variants() {
        for msg in [
            DataResponse::Register(RegisterReply {
                address: Some("localhost:49500".to_string()),
                fingerprint: Some("fp".to_string()),
                id: Some("101".to_string()),
                error: None,
            }),
            DataResponse::Pong(Pong {
                time: "now".to_string(),
                status: Some("ok".to_string()),
            }),
            DataResponse::Error {
                error: "invalid.request".to_string(),
            },
        ] {
            let bytes = wire::encode(&msg).unwrap();
            let decoded: DataResponse = wire::decode(&bytes).unwrap();
            assert_eq!(msg, decoded);
        }
    }
}
