//! Process backends: how a service's child command is assembled.
//!
//! The supervisor state machine is language-agnostic; a backend only
//! decides what to exec. Native binaries are handled here; interpreted
//! runtimes plug in behind the same trait from separate tooling.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::warn;

use crate::config::ServiceSpec;
use crate::error::CoreError;

/// Directory under a service's working dir that holds its log sink.
pub const LOG_DIR: &str = "steward";
/// File name of the redirected stdout/stderr sink.
pub const LOG_FILE: &str = "core.log";

/// Assembles the child command for one service.
pub trait ProcessBackend: Send + Sync {
    /// Builds a ready-to-spawn command: binary, args, env, working
    /// directory, a fresh process group, and log redirection.
    fn command(&self) -> Command;

    /// Absolute path of the log sink this backend writes to.
    fn log_path(&self) -> PathBuf;
}

/// Selects the backend for a launch spec.
///
/// # Errors
///
/// Returns [`CoreError::UnsupportedLanguage`] for anything but a native
/// binary; interpreted runtimes are launched by their own tooling.
pub fn backend_for(spec: &ServiceSpec) -> Result<Box<dyn ProcessBackend>, CoreError> {
    match spec.language.as_str() {
        "binary" => Ok(Box::new(BinaryBackend::new(spec))),
        other => Err(CoreError::UnsupportedLanguage(other.to_string())),
    }
}

/// Backend for natively compiled services.
pub struct BinaryBackend {
    path: PathBuf,
    dir: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl BinaryBackend {
    #[must_use]
    pub fn new(spec: &ServiceSpec) -> Self {
        Self {
            path: spec.binary_path(),
            dir: spec.dir.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
        }
    }

    fn open_log(&self) -> std::io::Result<(File, File)> {
        let dir = self.dir.join(LOG_DIR);
        std::fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))?;
        let second = file.try_clone()?;
        Ok((file, second))
    }
}

impl ProcessBackend for BinaryBackend {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(&self.args)
            .envs(self.env.iter().cloned())
            .current_dir(&self.dir)
            // A fresh group, so signalling the group later reaches the
            // child and any of its descendants but never the Core.
            .process_group(0);

        match self.open_log() {
            Ok((out, err)) => {
                cmd.stdout(Stdio::from(out));
                cmd.stderr(Stdio::from(err));
            }
            Err(err) => {
                warn!(dir = %self.dir.display(), %err, "could not open log sink, inheriting stdio");
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
            }
        }
        cmd
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_DIR).join(LOG_FILE)
    }
}
