//! Control-plane messages: the operator surface of the Core.

use serde::{Deserialize, Serialize};

use super::data::Action;
use crate::types::RemoteSummary;

/// Operator request.
///
/// `Start`, `Kill`, and `KillAll` are accepted but unimplemented; the
/// Core answers them with an `unimplemented` status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlRequest {
    Summary(Action),
    Restart(Action),
    Stop,
    Status,
    Start(Action),
    Kill(Action),
    KillAll,
}

/// Operator reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    /// Short textual outcome, e.g. `"success"` or `"pid=4021"`.
    Status { status: String },
    /// Aggregated summary grouped by remote.
    Summary {
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        remotes: Vec<RemoteSummary>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },
    Error { error: String },
}
