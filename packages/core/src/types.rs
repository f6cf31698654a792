//! Shared domain types for the steward control plane.
//!
//! These types cross the wire inside summary replies and registration
//! requests, so they carry serde derives alongside their in-process use
//! by the server crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ServiceMode
// ---------------------------------------------------------------------------

/// How the Core relates to a service's underlying process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// The Core forks, supervises, and restarts the process itself.
    Managed,
    /// A remote container supervises the process; the Core knows it via
    /// federation only.
    Remote,
    /// The process is not supervised by any steward tooling and registers
    /// itself.
    Planetary,
    /// The coordinator's own mode, used for nested Core instances.
    Core,
}

impl ServiceMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceMode::Managed => "managed",
            ServiceMode::Remote => "remote",
            ServiceMode::Planetary => "planetary",
            ServiceMode::Core => "core",
        }
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "managed" => Ok(ServiceMode::Managed),
            "remote" => Ok(ServiceMode::Remote),
            "planetary" => Ok(ServiceMode::Planetary),
            "core" => Ok(ServiceMode::Core),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized mode string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service mode: {0}")]
pub struct UnknownMode(pub String);

// ---------------------------------------------------------------------------
// ServiceState
// ---------------------------------------------------------------------------

/// Last known state of a registered service.
///
/// State machine: `Running -> Shutdown -> Running` (re-attach) and
/// `Running -> Failed` (supervisor retry exhaustion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Attached and believed alive.
    Running,
    /// The service announced shutdown, or the Core observed a disconnect.
    Shutdown,
    /// The supervisor exhausted its restart budget.
    Failed,
}

impl ServiceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Running => "running",
            ServiceState::Shutdown => "shutdown",
            ServiceState::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Summary records
// ---------------------------------------------------------------------------

/// One service's entry in a summary aggregate.
///
/// Unreachable services contribute a stub carrying only `name` and a
/// populated `errors` vector; reachable ones fill every field they know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mode: Option<ServiceMode>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<ServiceState>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub peer_groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}

impl ServiceSummary {
    /// Stub entry for a service that could not be contacted.
    #[must_use]
    pub fn unreachable(name: impl Into<String>, err: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            id: None,
            address: None,
            mode: None,
            state: None,
            peer_groups: Vec::new(),
            parent_id: None,
            errors: vec![format!("could not contact, err={err}")],
        }
    }
}

/// One remote in an operator summary: the Core itself or a federated
/// container, with the services it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub services: Vec<ServiceSummary>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}
