//! The Core: one coordinator instance owning the registry, the process
//! supervisor, the remote broker, and the lifecycle controller.
//!
//! RPC handlers receive an `Arc<Core>` and close over it; the process-
//! wide construction guard only ensures the daemon cannot build two
//! coordinators by accident. Tests construct independent instances
//! directly with [`Core::new`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use nix::sys::signal::Signal;
use parking_lot::Mutex;
use steward_core::{RemoteSummary, ServiceMode, ServiceState, ServiceSummary};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{defaults, CoreConfig, EnvMode};
use crate::error::CoreError;
use crate::lifecycle::LifecycleController;
use crate::registry::{AddressHandler, Registry};
use crate::remote::RemoteBroker;
use crate::supervisor::{ManagerConfig, Supervisor, SupervisorEvent};

static CORE: OnceLock<Arc<Core>> = OnceLock::new();

/// The coordinator.
pub struct Core {
    config: CoreConfig,
    registry: Registry,
    broker: RemoteBroker,
    supervisor: Supervisor,
    lifecycle: LifecycleController,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
    msg_counter: AtomicU64,
}

impl Core {
    /// Builds an independent Core instance.
    #[must_use]
    pub fn new(config: CoreConfig) -> Arc<Self> {
        let addresses = Arc::new(AddressHandler::new(
            config.pool_host.clone(),
            config.pool_base,
            config.pool_span,
        ));
        let shutdown_signal = if config.env == EnvMode::Managed {
            // The parent supervisor owns SIGINT; managed children are
            // stopped with SIGUSR2 to stay out of its way.
            Signal::SIGUSR2
        } else {
            Signal::SIGINT
        };
        let (supervisor, events_rx) = Supervisor::new(ManagerConfig {
            max_retries: config.max_retries,
            restart_wait: config.deadlines.restart_wait,
            shutdown_signal,
        });

        Arc::new(Self {
            registry: Registry::new(Arc::clone(&addresses), config.deadlines.clone()),
            broker: RemoteBroker::new(addresses),
            supervisor,
            lifecycle: LifecycleController::new(),
            events_rx: Mutex::new(Some(events_rx)),
            msg_counter: AtomicU64::new(1),
            config,
        })
    }

    /// Process-wide construction guard: at most one daemon Core. A
    /// second initialization returns the existing instance.
    #[must_use]
    pub fn initialize(config: CoreConfig) -> Arc<Self> {
        Arc::clone(CORE.get_or_init(|| Self::new(config)))
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn broker(&self) -> &RemoteBroker {
        &self.broker
    }

    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// Next data-plane message number, for per-message logging.
    pub fn next_msg_id(&self) -> u64 {
        self.msg_counter.fetch_add(1, Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // Boot
    // -----------------------------------------------------------------------

    /// Launches every managed service from the manifest and starts the
    /// supervisor event consumer. Launch failures are logged; the
    /// manager stays registered so an operator restart can retry.
    pub fn boot_services(self: &Arc<Self>) {
        for spec in &self.config.services {
            match self.supervisor.launch(spec) {
                Ok(pid) => info!(service = %spec.name, pid, "managed service launched"),
                Err(err) => warn!(service = %spec.name, %err, "managed service failed to launch"),
            }
        }

        let events_rx = self.events_rx.lock().take();
        if let Some(mut events_rx) = events_rx {
            let core = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    match event {
                        SupervisorEvent::RetriesExhausted { name } => {
                            if let Some(service) = core.registry.lookup(&name) {
                                service.update_state(ServiceState::Failed);
                            } else {
                                warn!(service = %name, "exhausted service has no registry record");
                            }
                        }
                    }
                }
            });
        }
    }

    // -----------------------------------------------------------------------
    // Summaries
    // -----------------------------------------------------------------------

    /// The Core's own entry in summary aggregates.
    #[must_use]
    pub fn core_summary(&self) -> ServiceSummary {
        ServiceSummary {
            name: defaults::CORE_REMOTE_ID.to_string(),
            id: Some(defaults::CORE_REMOTE_ID.to_string()),
            address: Some(self.config.data_address.clone()),
            mode: Some(ServiceMode::Core),
            state: Some(ServiceState::Running),
            peer_groups: Vec::new(),
            parent_id: self.config.parent_id.clone(),
            errors: Vec::new(),
        }
    }

    /// Operator `summary.all`: local registry records plus every
    /// container, proxied in parallel with per-target deadlines.
    pub async fn summary_all(&self) -> Vec<RemoteSummary> {
        let parent_id = self.config.parent_id.as_deref();
        let local = RemoteSummary {
            id: defaults::CORE_REMOTE_ID.to_string(),
            address: Some(self.config.data_address.clone()),
            services: self
                .registry
                .all_services()
                .iter()
                .map(|s| s.summary(parent_id))
                .collect(),
            error: None,
        };

        let deadline = self.config.deadlines.summary;
        let containers = self.broker.all();
        let proxied = containers
            .iter()
            .map(|c| self.broker.summarize(c, deadline));

        let mut out = vec![local];
        out.extend(futures_util::future::join_all(proxied).await);
        out
    }

    /// Operator `summary.one`: resolve a single `remoteID-target` pair.
    pub async fn summary_one(&self, remote_id: &str, target: &str) -> RemoteSummary {
        if remote_id == defaults::CORE_REMOTE_ID {
            let found = self
                .registry
                .lookup_by_id(target)
                .or_else(|| self.registry.lookup(target));
            return match found {
                Some(service) => RemoteSummary {
                    id: defaults::CORE_REMOTE_ID.to_string(),
                    address: Some(self.config.data_address.clone()),
                    services: vec![service.summary(self.config.parent_id.as_deref())],
                    error: None,
                },
                None => RemoteSummary {
                    id: defaults::CORE_REMOTE_ID.to_string(),
                    address: Some(self.config.data_address.clone()),
                    services: Vec::new(),
                    error: Some(CoreError::NotFound(target.to_string()).code().to_string()),
                },
            };
        }

        match self.broker.get(remote_id) {
            Some(container) => {
                let mut summary = self
                    .broker
                    .summarize(&container, self.config.deadlines.summary)
                    .await;
                summary
                    .services
                    .retain(|s| s.name == target || s.id.as_deref() == Some(target));
                if summary.services.is_empty() && summary.error.is_none() {
                    summary.error =
                        Some(CoreError::NotFound(target.to_string()).code().to_string());
                }
                summary
            }
            None => RemoteSummary {
                id: remote_id.to_string(),
                address: None,
                services: Vec::new(),
                error: Some(CoreError::NotFound(remote_id.to_string()).code().to_string()),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Restarts
    // -----------------------------------------------------------------------

    /// Restarts every managed service; per-target failures are logged
    /// and do not abort the sweep.
    pub async fn restart_all(self: &Arc<Self>) {
        for service in self.registry.all_services() {
            if service.mode != ServiceMode::Managed {
                continue;
            }
            let Some(manager) = self.supervisor.manager(&service.name) else {
                warn!(service = %service.name, "managed service has no process manager");
                continue;
            };
            match manager.restart(true).await {
                Ok(pid) => info!(service = %service.name, pid, "service restarted"),
                Err(err) => warn!(service = %service.name, %err, "restart failed"),
            }
        }
    }

    /// Restarts one locally managed service by id or name.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for an unknown target,
    /// [`CoreError::InvalidRequest`] when the target is not managed by
    /// this Core, and any spawn error from the replacement process.
    pub async fn restart_one_local(&self, target: &str) -> Result<String, CoreError> {
        let service = self
            .registry
            .lookup_by_id(target)
            .or_else(|| self.registry.lookup(target))
            .ok_or_else(|| CoreError::NotFound(target.to_string()))?;

        if service.mode != ServiceMode::Managed {
            return Err(CoreError::InvalidRequest(format!(
                "service {} is not managed by this core",
                service.name
            )));
        }
        let manager = self
            .supervisor
            .manager(&service.name)
            .ok_or_else(|| CoreError::Internal("managed service has no manager".to_string()))?;
        let pid = manager.restart(true).await?;
        Ok(format!("pid={pid}"))
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Orderly shutdown: fan out `core.shutdown` notices (unless the
    /// Core is itself a managed child), stop the children, and wake
    /// every subscriber. Safe to call from a signal and an operator
    /// concurrently; only the first caller runs the procedure.
    pub async fn shutdown(&self, remote: bool, source: &str) {
        if !self.lifecycle.begin_shutdown() {
            return;
        }
        info!(remote, source, "shutdown procedure started");

        if self.config.env != EnvMode::Managed {
            self.registry.send_shutdown_notices().await;
        }
        self.supervisor.stop_all();

        self.lifecycle.notify_stopped();
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> CoreConfig {
        CoreConfig {
            data_address: "localhost:0".to_string(),
            control_address: "localhost:0".to_string(),
            deadlines: crate::config::Deadlines {
                probe: Duration::from_millis(200),
                summary: Duration::from_millis(200),
                shutdown_notice: Duration::from_millis(300),
                ..crate::config::Deadlines::default()
            },
            ..CoreConfig::default()
        }
    }

    #[tokio::test]
    async fn initialize_returns_the_same_instance() {
        let first = Core::initialize(test_config());
        let second = Core::initialize(test_config());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn summary_one_unknown_remote_reports_not_found() {
        let core = Core::new(test_config());
        let summary = core.summary_one("r7", "101").await;
        assert_eq!(summary.error.as_deref(), Some("registry.notFound"));
    }

    #[tokio::test]
    async fn restart_one_local_rejects_unmanaged_targets() {
        let core = Core::new(test_config());
        core.registry()
            .add_service("svc-a", &[], &[], "", "", ServiceMode::Planetary)
            .await
            .unwrap();

        let err = core.restart_one_local("svc-a").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));

        let err = core.restart_one_local("no-such").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn shutdown_runs_once_and_reaches_stopped() {
        let core = Core::new(test_config());
        let mut rx = core.lifecycle().subscribe();

        core.shutdown(false, "test").await;
        // Second call is a no-op rather than a duplicate fan-out.
        core.shutdown(true, "operator").await;

        rx.changed().await.unwrap();
        assert_eq!(
            core.lifecycle().health_state(),
            crate::lifecycle::HealthState::Stopped
        );
    }

    #[tokio::test]
    async fn summary_all_lists_local_services_under_the_core_remote() {
        let core = Core::new(test_config());
        core.registry()
            .add_service("svc-a", &[], &["g1".to_string()], "", "", ServiceMode::Planetary)
            .await
            .unwrap();

        let remotes = core.summary_all().await;
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].id, "core");
        assert_eq!(remotes[0].services.len(), 1);
        assert_eq!(remotes[0].services[0].name, "svc-a");
    }
}
