//! The registry's service record.

use std::collections::HashSet;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use steward_core::{ServiceMode, ServiceState, ServiceSummary};
use tracing::info;
use uuid::Uuid;

/// One attached worker.
///
/// Identity fields are immutable for the record's lifetime; only the
/// state and last-ping timestamps mutate, each behind its own lock so
/// readers never block registration.
#[derive(Debug)]
pub struct Service {
    /// Monotonic id issued by the registry.
    pub id: String,
    /// Unique primary name.
    pub name: String,
    /// Unique secondary names; share the primary namespace.
    pub aliases: Vec<String>,
    /// `host:port` where the service accepts data-plane calls.
    pub address: String,
    pub mode: ServiceMode,
    /// Authorization tags; two services may converse iff these intersect.
    /// Refreshed when a service re-attaches under an existing record.
    peer_groups: RwLock<HashSet<String>>,
    /// Identity token issued at registration, echoed on later calls.
    pub fingerprint: String,
    /// When the record was created.
    pub added: SystemTime,
    state: Mutex<ServiceState>,
    last_ping: Mutex<SystemTime>,
}

impl Service {
    #[must_use]
    pub fn new(
        id: String,
        name: impl Into<String>,
        aliases: Vec<String>,
        address: impl Into<String>,
        peer_groups: impl IntoIterator<Item = String>,
        mode: ServiceMode,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            aliases,
            address: address.into(),
            mode,
            peer_groups: RwLock::new(peer_groups.into_iter().collect()),
            fingerprint: Uuid::new_v4().simple().to_string(),
            added: SystemTime::now(),
            state: Mutex::new(ServiceState::Running),
            last_ping: Mutex::new(SystemTime::now()),
        }
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// Records a state transition; no-op when the state is unchanged.
    pub fn update_state(&self, next: ServiceState) {
        let mut state = self.state.lock();
        if *state != next {
            info!(name = %self.name, id = %self.id, from = %state, to = %next, "service state change");
            *state = next;
        }
    }

    /// Refreshes the liveness timestamp.
    pub fn touch_ping(&self) {
        *self.last_ping.lock() = SystemTime::now();
    }

    #[must_use]
    pub fn last_ping(&self) -> SystemTime {
        *self.last_ping.lock()
    }

    /// Whether this service shares at least one peer group with `other`.
    #[must_use]
    pub fn shares_peer_group(&self, other: &Service) -> bool {
        !self
            .peer_groups
            .read()
            .is_disjoint(&other.peer_groups.read())
    }

    /// Replaces the peer groups, used when a re-attaching registration
    /// carries a new set.
    pub fn set_peer_groups(&self, groups: impl IntoIterator<Item = String>) {
        *self.peer_groups.write() = groups.into_iter().collect();
    }

    /// Summary record for operator listings and fan-out aggregates.
    #[must_use]
    pub fn summary(&self, parent_id: Option<&str>) -> ServiceSummary {
        let mut peer_groups: Vec<String> = self.peer_groups.read().iter().cloned().collect();
        peer_groups.sort();
        ServiceSummary {
            name: self.name.clone(),
            id: Some(self.id.clone()),
            address: Some(self.address.clone()),
            mode: Some(self.mode),
            state: Some(self.state()),
            peer_groups,
            parent_id: parent_id.map(str::to_string),
            errors: Vec::new(),
        }
    }
}
