//! Wire message schemas for the steward RPC protocol.
//!
//! Both RPC planes exchange single request/reply frames over a
//! length-delimited TCP stream. Every frame is an [`Envelope`] carrying
//! optional call metadata plus one body, serialized as named `MsgPack`
//! (`rmp_serde::to_vec_named()`) with camelCase field names.

pub mod control;
pub mod data;

use serde::{Deserialize, Serialize};

pub use control::{ControlReply, ControlRequest};
pub use data::{
    Action, DataPayload, DataReply, DataRequest, DataResponse, Ping, Pong, Receipt, RegisterReply,
    RegisterRequest, ServiceUpdate, SummaryReceipt, Transport, WhoIsReply, WhoIsRequest,
};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Call metadata recognized on inbound frames.
///
/// Mirrors the three metadata keys of the protocol: `sender`, `target`,
/// and `fingerprint`. All are optional; a default (empty) `Meta` is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fingerprint: Option<String>,
}

impl Meta {
    /// Metadata naming only the sender.
    #[must_use]
    pub fn from_sender(sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            target: None,
            fingerprint: None,
        }
    }
}

/// One framed message: metadata plus a plane-specific body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    #[serde(default)]
    pub meta: Meta,
    pub body: T,
}

impl<T> Envelope<T> {
    #[must_use]
    pub fn new(meta: Meta, body: T) -> Self {
        Self { meta, body }
    }

    /// Envelope with empty metadata.
    #[must_use]
    pub fn bare(body: T) -> Self {
        Self {
            meta: Meta::default(),
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// Protocol request strings
// ---------------------------------------------------------------------------

/// Registration-update and summary request strings understood by the Core.
pub mod requests {
    /// Sent by the Core to every service when it begins shutdown, and by a
    /// worker announcing its own disconnect.
    pub const CORE_SHUTDOWN: &str = "core.shutdown";
    /// Registers a remote container with the Core.
    pub const CONTAINER_REGISTER: &str = "container.register";
    /// Asks a service for its full self-description.
    pub const INFO_ALL: &str = "request.info.all";
    /// Operator: aggregate every service and container.
    pub const SUMMARY_ALL: &str = "summary.all";
    /// Operator: resolve a single `remoteID-target` pair.
    pub const SUMMARY_ONE: &str = "summary.one";
    /// Operator: restart every managed service.
    pub const RESTART_ALL: &str = "restart.all";
    /// Operator: restart one service by id.
    pub const RESTART_ONE: &str = "restart.one";
}
