//! steward core — wire message schemas and shared types for the steward
//! control plane.
//!
//! This crate is pure data: the server and any embedded client link it
//! for the protocol types without pulling in a runtime.

pub mod messages;
pub mod types;
pub mod wire;

pub use messages::{requests, Envelope, Meta};
pub use types::{RemoteSummary, ServiceMode, ServiceState, ServiceSummary};
pub use wire::WireError;
