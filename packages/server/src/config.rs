//! Core configuration: endpoint defaults, environment detection, and the
//! optional managed-services manifest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Well-known constants of the control plane.
pub mod defaults {
    use std::time::Duration;

    /// Operator (control-plane) endpoint.
    pub const CONTROL_ADDRESS: &str = "localhost:59997";
    /// Service (data-plane) endpoint.
    pub const DATA_ADDRESS: &str = "localhost:59999";

    /// Host from which worker addresses are vended.
    pub const POOL_HOST: &str = "localhost";
    /// First port of the worker address pool.
    pub const POOL_BASE: u16 = 49500;
    /// Number of ports in the worker address pool.
    pub const POOL_SPAN: u16 = 1000;

    /// Restart budget for a managed service before it is marked failed.
    pub const MAX_RETRIES: u32 = 3;
    /// First service id is issued above this floor.
    pub const STARTING_ID: u64 = 100;

    /// Liveness probe deadline during re-registration.
    pub const PROBE_DEADLINE: Duration = Duration::from_secs(15);
    /// Per-service deadline for summary fan-out.
    pub const SUMMARY_DEADLINE: Duration = Duration::from_secs(1);
    /// Per-service deadline for the shutdown broadcast.
    pub const SHUTDOWN_NOTICE_DEADLINE: Duration = Duration::from_millis(500);
    /// How long a restart waits for the old process to exit.
    pub const RESTART_WAIT: Duration = Duration::from_secs(5);
    /// Deadline when proxying a restart to a remote container.
    pub const REMOTE_RESTART_DEADLINE: Duration = Duration::from_secs(20);

    /// The Core's id in operator summaries and dash-tuple service ids.
    pub const CORE_REMOTE_ID: &str = "core";
}

// ---------------------------------------------------------------------------
// Environment mode
// ---------------------------------------------------------------------------

/// Execution environment of the Core, from `SERVICEMODE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvMode {
    /// No managing parent; SIGINT terminates.
    #[default]
    Standalone,
    /// `"C"`: a planetary peer provided the Core's address.
    CoreProvided,
    /// `"M"`: running as a managed child; SIGUSR2 terminates and
    /// SIGINT/SIGUSR1 pass through to workers.
    Managed,
}

impl EnvMode {
    /// Parses the `SERVICEMODE` value; anything unrecognized is standalone.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "C" => EnvMode::CoreProvided,
            "M" => EnvMode::Managed,
            _ => EnvMode::Standalone,
        }
    }

    /// Reads `SERVICEMODE` from the process environment.
    #[must_use]
    pub fn from_environment() -> Self {
        std::env::var("SERVICEMODE")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EnvMode::Standalone => "",
            EnvMode::CoreProvided => "C",
            EnvMode::Managed => "M",
        }
    }
}

// ---------------------------------------------------------------------------
// Managed-service manifest
// ---------------------------------------------------------------------------

/// Launch spec for one managed service, read from the manifest file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub name: String,
    /// Absolute path to the binary, or relative to `dir`.
    pub path: PathBuf,
    /// Working directory; also the root of the service's log directory.
    pub dir: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// Target language. Only `binary` is launchable; interpreted
    /// runtimes are handled by separate tooling.
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "binary".to_string()
}

impl ServiceSpec {
    /// Resolves the binary path against the working directory when the
    /// manifest used a relative path.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            self.dir.join(&self.path)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    services: Vec<ServiceSpec>,
}

/// Parses the JSON services manifest.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not valid JSON;
/// both are fatal initialization errors for the daemon.
pub fn load_manifest(path: &Path) -> anyhow::Result<Vec<ServiceSpec>> {
    let raw = std::fs::read_to_string(path)?;
    let manifest: Manifest = serde_json::from_str(&raw)?;
    Ok(manifest.services)
}

// ---------------------------------------------------------------------------
// CoreConfig
// ---------------------------------------------------------------------------

/// Deadlines for every class of outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadlines {
    pub probe: Duration,
    pub summary: Duration,
    pub shutdown_notice: Duration,
    pub restart_wait: Duration,
    pub remote_restart: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            probe: defaults::PROBE_DEADLINE,
            summary: defaults::SUMMARY_DEADLINE,
            shutdown_notice: defaults::SHUTDOWN_NOTICE_DEADLINE,
            restart_wait: defaults::RESTART_WAIT,
            remote_restart: defaults::REMOTE_RESTART_DEADLINE,
        }
    }
}

/// Assembled configuration for one Core instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Data-plane bind address.
    pub data_address: String,
    /// Control-plane bind address.
    pub control_address: String,
    /// Host for vended worker addresses.
    pub pool_host: String,
    /// Worker address pool range start.
    pub pool_base: u16,
    /// Worker address pool size.
    pub pool_span: u16,
    /// Environment mode, from `SERVICEMODE`.
    pub env: EnvMode,
    /// Parent container id for nested Cores, from `REMOTE`.
    pub parent_id: Option<String>,
    /// Per-message data-plane logging, from `LOGGING=1`.
    pub log_data_plane: bool,
    /// Outbound call deadlines.
    pub deadlines: Deadlines,
    /// Restart budget for managed services.
    pub max_retries: u32,
    /// Managed services to launch at boot.
    pub services: Vec<ServiceSpec>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_address: defaults::DATA_ADDRESS.to_string(),
            control_address: defaults::CONTROL_ADDRESS.to_string(),
            pool_host: defaults::POOL_HOST.to_string(),
            pool_base: defaults::POOL_BASE,
            pool_span: defaults::POOL_SPAN,
            env: EnvMode::Standalone,
            parent_id: None,
            log_data_plane: false,
            deadlines: Deadlines::default(),
            max_retries: defaults::MAX_RETRIES,
            services: Vec::new(),
        }
    }
}

impl CoreConfig {
    /// Overlays `SERVICEMODE`, `REMOTE`, and `LOGGING` from the process
    /// environment onto this configuration.
    #[must_use]
    pub fn with_environment(mut self) -> Self {
        self.env = EnvMode::from_environment();
        self.parent_id = std::env::var("REMOTE").ok().filter(|v| !v.is_empty());
        self.log_data_plane = std::env::var("LOGGING").as_deref() == Ok("1");
        self
    }
}
