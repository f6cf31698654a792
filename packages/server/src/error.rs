//! Error taxonomy for the Core.
//!
//! Every error that can reach a worker is translated into a reply-field
//! code string (see [`CoreError::code`]); transport-level failure is
//! reserved for the unreachable class.

/// Errors surfaced by the registry, supervisor, broker, and RPC layers.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("service not found: {0}")]
    NotFound(String),
    #[error("duplicate service with live record: {0}")]
    DuplicateService(String),
    #[error("duplicate alias: {0}")]
    DuplicateAlias(String),
    #[error("fingerprint mismatch for {0}")]
    FingerprintMismatch(String),
    #[error("service {0} has reported shutdown")]
    ReportedShutdown(String),
    #[error("address pool exhausted")]
    AddressExhausted,
    #[error("permission denied: {from} -> {to}")]
    PermissionDenied { from: String, to: String },
    #[error("peer unreachable: {addr}")]
    Unreachable { addr: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("could not spawn process: {0}")]
    Spawn(std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Dotted code string carried in reply `error` fields.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "registry.notFound",
            CoreError::DuplicateService(_) => "registry.duplicateService",
            CoreError::DuplicateAlias(_) => "registry.duplicateAlias",
            CoreError::FingerprintMismatch(_) => "verify.fingerprintMismatch",
            CoreError::ReportedShutdown(_) => "verify.reportedShutdown",
            CoreError::AddressExhausted => "addressing.exhausted",
            CoreError::PermissionDenied { .. } => "permission.denied",
            CoreError::Unreachable { .. } => "rpc.unreachable",
            CoreError::InvalidRequest(_) => "request.invalid",
            CoreError::UnsupportedLanguage(_) => "supervisor.unsupportedLanguage",
            CoreError::Spawn(_) => "supervisor.spawn",
            CoreError::Internal(_) => "core.internal",
        }
    }
}

/// Convenience alias used across the server crate.
pub type Result<T> = std::result::Result<T, CoreError>;
