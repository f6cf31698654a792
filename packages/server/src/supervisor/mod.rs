//! Per-service process lifecycle management.
//!
//! A [`ProcessManager`] owns one child process: it spawns it in its own
//! process group, redirects its output, watches for exit, applies the
//! restart policy, and performs graceful stops. Retry exhaustion is
//! reported to the owner over an event channel rather than through a
//! back-reference, so the registry stays the sole owner of service
//! records.

pub mod backend;

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{defaults, ServiceSpec};
use crate::error::CoreError;

pub use backend::{backend_for, ProcessBackend};

// ---------------------------------------------------------------------------
// Events & configuration
// ---------------------------------------------------------------------------

/// Out-of-band notifications from a manager to the Core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The restart budget is spent; the owning service should be marked
    /// failed.
    RetriesExhausted { name: String },
}

/// Per-manager policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Auto-restarts allowed before the service is declared failed.
    pub max_retries: u32,
    /// How long a restart waits for the old process before SIGKILL.
    pub restart_wait: Duration,
    /// Signal delivered to the process group on stop/restart. SIGUSR2
    /// when the Core itself runs as a managed child, so SIGINT can pass
    /// through the parent supervisor untouched.
    pub shutdown_signal: Signal,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            restart_wait: defaults::RESTART_WAIT,
            shutdown_signal: Signal::SIGINT,
        }
    }
}

/// Point-in-time view of a manager's runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    pub pid: Option<i32>,
    pub running: bool,
    pub num_restarts: u32,
    pub start_time: Option<SystemTime>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct ProcState {
    pid: Option<i32>,
    running: bool,
    user_killed: bool,
    graceful: bool,
    num_restarts: u32,
    start_time: Option<SystemTime>,
    errors: Vec<String>,
    exit_rx: Option<watch::Receiver<bool>>,
}

enum ExitDecision {
    Quiet,
    Restart,
    Exhausted,
}

// ---------------------------------------------------------------------------
// ProcessManager
// ---------------------------------------------------------------------------

/// Lifecycle manager for one managed service.
pub struct ProcessManager {
    name: String,
    backend: Box<dyn ProcessBackend>,
    config: ManagerConfig,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    inner: Mutex<ProcState>,
}

impl ProcessManager {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        backend: Box<dyn ProcessBackend>,
        config: ManagerConfig,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            config,
            events,
            inner: Mutex::new(ProcState::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the child and returns its pid as soon as it is launched.
    ///
    /// A waiter task watches for exit in the background; callers never
    /// block on the child.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Spawn`] when the exec fails, or
    /// [`CoreError::Internal`] when the runtime yields no pid.
    pub fn start(self: &Arc<Self>) -> Result<i32, CoreError> {
        let mut cmd = self.backend.command();
        let mut child = cmd.spawn().map_err(CoreError::Spawn)?;
        let raw_pid = child
            .id()
            .ok_or_else(|| CoreError::Internal("spawned child has no pid".to_string()))?;
        let pid = i32::try_from(raw_pid)
            .map_err(|_| CoreError::Internal(format!("pid out of range: {raw_pid}")))?;

        let (tx, rx) = watch::channel(false);
        {
            let mut st = self.inner.lock();
            st.pid = Some(pid);
            st.running = true;
            st.start_time = Some(SystemTime::now());
            st.exit_rx = Some(rx);
        }
        info!(service = %self.name, pid, "process started");

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let status = child.wait().await;
            manager.handle_exit(&status, &tx);
        });

        Ok(pid)
    }

    /// Stops the current process (configured signal, SIGKILL after the
    /// bounded wait) and starts a fresh one.
    ///
    /// `user_initiated` marks the stop as deliberate so the waiter does
    /// not count it against the retry budget or race a second spawn.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::start`] errors for the replacement process.
    pub async fn restart(self: &Arc<Self>, user_initiated: bool) -> Result<i32, CoreError> {
        let (pid, rx) = {
            let mut st = self.inner.lock();
            if user_initiated {
                st.user_killed = true;
            }
            (st.pid, st.exit_rx.clone())
        };

        if let Some(pid) = pid {
            self.signal_group(pid, self.config.shutdown_signal);
            if let Some(mut rx) = rx {
                if !Self::await_exit(&mut rx, self.config.restart_wait).await {
                    warn!(service = %self.name, pid, "process ignored shutdown signal, killing group");
                    self.signal_group(pid, Signal::SIGKILL);
                    Self::await_exit(&mut rx, Duration::from_secs(1)).await;
                }
            }
        }

        {
            let mut st = self.inner.lock();
            st.num_restarts += 1;
            st.user_killed = false;
        }
        self.start()
    }

    /// Signals the process group; with `user_initiated`, auto-restart is
    /// suppressed for the resulting exit.
    pub fn kill(&self, user_initiated: bool) {
        let pid = {
            let mut st = self.inner.lock();
            if user_initiated {
                st.user_killed = true;
            }
            st.pid
        };
        if let Some(pid) = pid {
            self.signal_group(pid, self.config.shutdown_signal);
        }
    }

    /// Marks the manager non-restarting; the next observed exit will not
    /// trigger recovery.
    pub fn graceful_shutdown(&self) {
        self.inner.lock().graceful = true;
    }

    /// Snapshot of the runtime state.
    #[must_use]
    pub fn status(&self) -> ProcessStatus {
        let st = self.inner.lock();
        ProcessStatus {
            pid: st.pid,
            running: st.running,
            num_restarts: st.num_restarts,
            start_time: st.start_time,
            errors: st.errors.clone(),
        }
    }

    fn handle_exit(self: &Arc<Self>, status: &io::Result<ExitStatus>, tx: &watch::Sender<bool>) {
        let decision = {
            let mut st = self.inner.lock();
            st.running = false;
            st.pid = None;
            if st.user_killed {
                st.user_killed = false;
                ExitDecision::Quiet
            } else if st.graceful {
                ExitDecision::Quiet
            } else {
                match status {
                    Ok(s) => st.errors.push(format!("process exited: {s}")),
                    Err(e) => st.errors.push(format!("wait failed: {e}")),
                }
                if st.num_restarts < self.config.max_retries {
                    st.num_restarts += 1;
                    ExitDecision::Restart
                } else {
                    ExitDecision::Exhausted
                }
            }
        };
        // Notify restart() waiters only after the state settles.
        let _ = tx.send(true);

        match decision {
            ExitDecision::Quiet => {
                debug!(service = %self.name, "process exit observed, no recovery needed");
            }
            ExitDecision::Restart => {
                info!(service = %self.name, "process exited unexpectedly, restarting");
                if let Err(err) = self.start() {
                    warn!(service = %self.name, %err, "restart failed");
                    let _ = self.events.send(SupervisorEvent::RetriesExhausted {
                        name: self.name.clone(),
                    });
                }
            }
            ExitDecision::Exhausted => {
                warn!(service = %self.name, retries = self.config.max_retries, "restart budget exhausted");
                let _ = self.events.send(SupervisorEvent::RetriesExhausted {
                    name: self.name.clone(),
                });
            }
        }
    }

    async fn await_exit(rx: &mut watch::Receiver<bool>, wait: Duration) -> bool {
        tokio::time::timeout(wait, async {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    /// Sends `signal` to the child's process group. The child is its
    /// group leader (`process_group(0)` at spawn), so the negative pid
    /// reaches every descendant.
    fn signal_group(&self, pid: i32, signal: Signal) {
        if let Err(err) = kill(Pid::from_raw(-pid), signal) {
            debug!(service = %self.name, pid, %signal, %err, "signal not delivered");
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor table
// ---------------------------------------------------------------------------

/// All process managers, keyed by service name.
pub struct Supervisor {
    managers: DashMap<String, Arc<ProcessManager>>,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    manager_config: ManagerConfig,
}

impl Supervisor {
    /// Creates the supervisor and the event stream the Core consumes.
    #[must_use]
    pub fn new(manager_config: ManagerConfig) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                managers: DashMap::new(),
                events_tx,
                manager_config,
            },
            events_rx,
        )
    }

    /// Creates a manager for the launch spec and starts its process.
    ///
    /// # Errors
    ///
    /// Backend selection and spawn errors propagate; a failed spawn
    /// leaves the manager registered so a later restart can retry it.
    pub fn launch(&self, spec: &ServiceSpec) -> Result<i32, CoreError> {
        let backend = backend_for(spec)?;
        let manager = Arc::new(ProcessManager::new(
            spec.name.clone(),
            backend,
            self.manager_config,
            self.events_tx.clone(),
        ));
        self.managers.insert(spec.name.clone(), Arc::clone(&manager));
        manager.start()
    }

    /// The manager for `name`, if the service is managed.
    #[must_use]
    pub fn manager(&self, name: &str) -> Option<Arc<ProcessManager>> {
        self.managers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether the Core supervises a process for `name`.
    #[must_use]
    pub fn is_managed(&self, name: &str) -> bool {
        self.managers.contains_key(name)
    }

    /// All managers in no particular order.
    #[must_use]
    pub fn managers(&self) -> Vec<Arc<ProcessManager>> {
        self.managers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Marks every manager non-restarting and signals its group. Used
    /// during Core shutdown.
    pub fn stop_all(&self) {
        for manager in self.managers() {
            manager.graceful_shutdown();
            manager.kill(true);
        }
    }
}
