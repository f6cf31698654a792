//! Federation with remote containers.
//!
//! A container is a remote host running its own supervisor. It registers
//! over the data plane (`container.register`), receives an address from
//! the worker pool plus an id, and afterwards answers proxied operator
//! actions (summary, restart) on that address with the control protocol.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use steward_core::messages::{requests, Action, ControlReply, ControlRequest};
use steward_core::RemoteSummary;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::registry::AddressHandler;
use crate::rpc::client;

/// One federated remote host.
#[derive(Debug)]
pub struct Container {
    /// Broker-issued id, used as the remote part of dash-tuple ids.
    pub id: String,
    /// Address assigned from the worker pool; the container binds its
    /// proxy endpoint there.
    pub address: String,
    /// Names of the services the container manages.
    pub services: Vec<String>,
    /// When the container registered.
    pub registered: SystemTime,
}

/// Tracks containers and proxies operator actions to them.
pub struct RemoteBroker {
    containers: DashMap<String, Arc<Container>>,
    addresses: Arc<AddressHandler>,
    id_counter: AtomicU64,
}

impl RemoteBroker {
    #[must_use]
    pub fn new(addresses: Arc<AddressHandler>) -> Self {
        Self {
            containers: DashMap::new(),
            addresses,
            id_counter: AtomicU64::new(0),
        }
    }

    /// Registers a container, assigning it an address and an id.
    ///
    /// `services` is the comma-separated list carried in the
    /// registration message; empty entries are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AddressExhausted`] when the pool is drained.
    pub fn add_container(&self, services: &str) -> Result<Arc<Container>, CoreError> {
        let address = self.addresses.next_address()?;
        let id = format!("r{}", self.id_counter.fetch_add(1, Ordering::Relaxed) + 1);
        let container = Arc::new(Container {
            id: id.clone(),
            address,
            services: services
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            registered: SystemTime::now(),
        });
        info!(id = %container.id, address = %container.address, "container registered");
        self.containers.insert(id, Arc::clone(&container));
        Ok(container)
    }

    /// Resolves a container id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Every known container.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Container>> {
        self.containers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Asks a container for its service summary; an unreachable
    /// container yields a stub entry instead of an error.
    pub async fn summarize(&self, container: &Container, deadline: Duration) -> RemoteSummary {
        let request = ControlRequest::Summary(Action::request(requests::SUMMARY_ALL));
        match client::call_control(&container.address, request, deadline).await {
            Ok(ControlReply::Summary { remotes, error: None }) => RemoteSummary {
                id: container.id.clone(),
                address: Some(container.address.clone()),
                services: remotes.into_iter().flat_map(|r| r.services).collect(),
                error: None,
            },
            Ok(ControlReply::Summary { error: Some(error), .. })
            | Ok(ControlReply::Error { error }) => Self::stub(container, error),
            Ok(ControlReply::Status { status }) => Self::stub(container, status),
            Err(err) => {
                debug!(id = %container.id, %err, "container summary failed");
                Self::stub(container, "could not contact")
            }
        }
    }

    /// Forwards a restart for `target` to the container.
    pub async fn restart_remote(
        &self,
        container: &Container,
        target: &str,
        deadline: Duration,
    ) -> String {
        let mut action = Action::request(requests::RESTART_ONE);
        action.target = Some(target.to_string());
        match client::call_control(&container.address, ControlRequest::Restart(action), deadline)
            .await
        {
            Ok(ControlReply::Status { status }) => status,
            Ok(ControlReply::Error { error }) => error,
            Ok(ControlReply::Summary { .. }) => "unexpected reply".to_string(),
            Err(err) => err.code().to_string(),
        }
    }

    fn stub(container: &Container, error: impl Into<String>) -> RemoteSummary {
        RemoteSummary {
            id: container.id.clone(),
            address: Some(container.address.clone()),
            services: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> RemoteBroker {
        RemoteBroker::new(Arc::new(AddressHandler::new("localhost", 49500, 8)))
    }

    #[test]
    fn containers_get_sequential_ids_and_pool_addresses() {
        let broker = broker();
        let first = broker.add_container("svc-a,svc-b").unwrap();
        let second = broker.add_container("svc-c").unwrap();

        assert_eq!(first.id, "r1");
        assert_eq!(second.id, "r2");
        assert_ne!(first.address, second.address);
        assert_eq!(first.services, vec!["svc-a", "svc-b"]);
        assert_eq!(broker.len(), 2);
    }

    #[test]
    fn empty_service_entries_are_dropped() {
        let broker = broker();
        let container = broker.add_container("svc-a, ,,svc-b,").unwrap();
        assert_eq!(container.services, vec!["svc-a", "svc-b"]);
    }

    #[test]
    fn lookup_by_id() {
        let broker = broker();
        let container = broker.add_container("svc-a").unwrap();
        assert_eq!(broker.get(&container.id).unwrap().address, container.address);
        assert!(broker.get("r99").is_none());
    }

    #[test]
    fn pool_exhaustion_fails_registration() {
        let broker = RemoteBroker::new(Arc::new(AddressHandler::new("localhost", 49500, 1)));
        broker.add_container("svc-a").unwrap();
        assert!(matches!(
            broker.add_container("svc-b"),
            Err(CoreError::AddressExhausted)
        ));
    }

    #[tokio::test]
    async fn unreachable_container_summarizes_to_stub() {
        let broker = broker();
        let container = broker.add_container("svc-a").unwrap();
        let summary = broker
            .summarize(&container, Duration::from_millis(200))
            .await;
        assert_eq!(summary.id, container.id);
        assert_eq!(summary.error.as_deref(), Some("could not contact"));
        assert!(summary.services.is_empty());
    }
}
