//! The registry/router: the process-wide directory of attached services.
//!
//! One mutex guards the name map, the ordered name list, and the id
//! counter, so an observer either sees none of a registering service's
//! entries or all of them. Fan-outs snapshot the name list under the
//! lock and then work the snapshot without it; holding the registry
//! lock across an RPC call is forbidden.

pub mod address;
pub mod service;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use steward_core::{Meta, ServiceMode, ServiceState, ServiceSummary};
use tracing::{debug, info, warn};

use crate::config::{defaults, Deadlines};
use crate::error::CoreError;
use crate::rpc::client;

pub use address::AddressHandler;
pub use service::Service;

struct Inner {
    /// `(Name | Alias) -> Service`; names and aliases share one namespace.
    map: HashMap<String, Arc<Service>>,
    /// Primary names in registration order. Walking the map directly
    /// would visit a record once per alias.
    names: Vec<String>,
    /// Pre-incremented id counter; ids are never reused.
    id_counter: u64,
}

/// Directory of services keyed by name and alias, with address
/// allocation and liveness-aware re-registration.
pub struct Registry {
    inner: Mutex<Inner>,
    addresses: Arc<AddressHandler>,
    deadlines: Deadlines,
}

impl Registry {
    #[must_use]
    pub fn new(addresses: Arc<AddressHandler>, deadlines: Deadlines) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                names: Vec::new(),
                id_counter: defaults::STARTING_ID,
            }),
            addresses,
            deadlines,
        }
    }

    /// The registry's address allocator.
    #[must_use]
    pub fn addresses(&self) -> &AddressHandler {
        &self.addresses
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Attaches a service.
    ///
    /// When `env != "C"` an address is vended from the pool; otherwise
    /// the caller-provided address is adopted. A prior record under the
    /// same name is reused when it reported shutdown or no longer
    /// answers a liveness probe (re-attach: same id and fingerprint,
    /// peer groups refreshed); a prior record that still answers makes
    /// the registration fail.
    ///
    /// # Errors
    ///
    /// [`CoreError::AddressExhausted`], [`CoreError::DuplicateService`],
    /// or [`CoreError::DuplicateAlias`].
    pub async fn add_service(
        &self,
        name: &str,
        aliases: &[String],
        peer_groups: &[String],
        env: &str,
        client_address: &str,
        mode: ServiceMode,
    ) -> Result<Arc<Service>, CoreError> {
        let (address, vended) = if env == "C" {
            (client_address.to_string(), false)
        } else {
            (self.addresses.next_address()?, true)
        };

        if let Some(existing) = self.lookup(name) {
            let result = self.try_reattach(&existing, peer_groups).await;
            if vended {
                // The record keeps its original address either way.
                self.addresses.release(&address);
            }
            return result;
        }

        let service = Arc::new(Service::new(
            self.next_id(),
            name,
            aliases
                .iter()
                .filter(|a| !a.is_empty())
                .cloned()
                .collect(),
            address.clone(),
            peer_groups.iter().cloned(),
            mode,
        ));

        if let Err(err) = self.insert(&service) {
            if vended {
                self.addresses.release(&address);
            }
            return Err(err);
        }

        info!(name = %service.name, id = %service.id, address = %service.address, "service registered");
        Ok(service)
    }

    async fn try_reattach(
        &self,
        existing: &Arc<Service>,
        peer_groups: &[String],
    ) -> Result<Arc<Service>, CoreError> {
        if existing.state() == ServiceState::Shutdown {
            debug!(name = %existing.name, "re-attaching record that reported shutdown");
            existing.set_peer_groups(peer_groups.iter().cloned());
            existing.update_state(ServiceState::Running);
            return Ok(Arc::clone(existing));
        }

        // The record claims to be running; believe it only if it answers.
        if self.check_is_alive(&existing.address).await {
            warn!(name = %existing.name, "record still alive, rejecting duplicate registration");
            return Err(CoreError::DuplicateService(existing.name.clone()));
        }

        debug!(name = %existing.name, "record on file is unresponsive, treating registration as re-attach");
        existing.set_peer_groups(peer_groups.iter().cloned());
        existing.update_state(ServiceState::Running);
        Ok(Arc::clone(existing))
    }

    /// Inserts the primary name and every alias atomically.
    fn insert(&self, service: &Arc<Service>) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        if inner.map.contains_key(&service.name) {
            return Err(CoreError::DuplicateService(service.name.clone()));
        }
        for alias in &service.aliases {
            if inner.map.contains_key(alias) {
                return Err(CoreError::DuplicateAlias(alias.clone()));
            }
        }

        inner
            .map
            .insert(service.name.clone(), Arc::clone(service));
        let name = service.name.clone();
        inner.names.push(name);
        for alias in &service.aliases {
            inner.map.insert(alias.clone(), Arc::clone(service));
        }
        Ok(())
    }

    fn next_id(&self) -> String {
        let mut inner = self.inner.lock();
        inner.id_counter += 1;
        inner.id_counter.to_string()
    }

    // -----------------------------------------------------------------------
    // Lookup & verification
    // -----------------------------------------------------------------------

    /// Resolves a name or alias to its service record.
    #[must_use]
    pub fn lookup(&self, name_or_alias: &str) -> Option<Arc<Service>> {
        self.inner.lock().map.get(name_or_alias).cloned()
    }

    /// Resolves a registry-issued id to its service record.
    #[must_use]
    pub fn lookup_by_id(&self, id: &str) -> Option<Arc<Service>> {
        let inner = self.inner.lock();
        inner
            .names
            .iter()
            .filter_map(|n| inner.map.get(n))
            .find(|s| s.id == id)
            .cloned()
    }

    /// Validates a caller's identity token and refreshes its liveness.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`], [`CoreError::FingerprintMismatch`], or
    /// [`CoreError::ReportedShutdown`].
    pub fn verify(&self, name: &str, fingerprint: &str) -> Result<(), CoreError> {
        let service = self
            .lookup(name)
            .ok_or_else(|| CoreError::NotFound(name.to_string()))?;
        if service.fingerprint != fingerprint {
            return Err(CoreError::FingerprintMismatch(name.to_string()));
        }
        if service.state() == ServiceState::Shutdown {
            return Err(CoreError::ReportedShutdown(name.to_string()));
        }
        service.touch_ping();
        Ok(())
    }

    /// Returns `to`'s address iff `from` and `to` share a peer group.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] for either party, or
    /// [`CoreError::PermissionDenied`] when their groups are disjoint.
    pub fn grant_permissions(&self, from: &str, to: &str) -> Result<String, CoreError> {
        let from_svc = self
            .lookup(from)
            .ok_or_else(|| CoreError::NotFound(from.to_string()))?;
        let to_svc = self
            .lookup(to)
            .ok_or_else(|| CoreError::NotFound(to.to_string()))?;
        if from_svc.shares_peer_group(&to_svc) {
            Ok(to_svc.address.clone())
        } else {
            Err(CoreError::PermissionDenied {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Every service in registration order.
    #[must_use]
    pub fn all_services(&self) -> Vec<Arc<Service>> {
        let inner = self.inner.lock();
        inner
            .names
            .iter()
            .filter_map(|n| inner.map.get(n))
            .cloned()
            .collect()
    }

    /// Number of registered services (aliases not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().names.is_empty()
    }

    // -----------------------------------------------------------------------
    // Fan-outs
    // -----------------------------------------------------------------------

    /// Queries every attached service for its self-summary in parallel
    /// (1 s per call), prepending `core_summary`. Unreachable services
    /// contribute stub entries rather than aborting the aggregate.
    pub async fn core_service_data(&self, core_summary: ServiceSummary) -> Vec<ServiceSummary> {
        let targets: Vec<(String, String, String)> = self
            .all_services()
            .iter()
            .map(|s| (s.name.clone(), s.address.clone(), s.fingerprint.clone()))
            .collect();

        let deadline = self.deadlines.summary;
        let calls = targets.into_iter().map(|(name, addr, fingerprint)| async move {
            let meta = Meta {
                sender: Some("core".to_string()),
                target: Some(name.clone()),
                fingerprint: Some(fingerprint),
            };
            match client::request_summary(&addr, meta, deadline).await {
                Ok(receipt) if receipt.services.is_empty() => {
                    vec![ServiceSummary::unreachable(
                        &name,
                        receipt.error.unwrap_or_else(|| "empty summary".to_string()),
                    )]
                }
                Ok(receipt) => receipt.services,
                Err(err) => vec![ServiceSummary::unreachable(&name, err)],
            }
        });

        let mut out = vec![core_summary];
        for mut services in join_all(calls).await {
            out.append(&mut services);
        }
        out
    }

    /// Broadcasts `core.shutdown` to every service concurrently with a
    /// 500 ms per-call deadline. Resolves once every notice has
    /// succeeded, failed, or timed out.
    pub async fn send_shutdown_notices(&self) {
        let targets: Vec<(String, String)> = self
            .all_services()
            .iter()
            .map(|s| (s.name.clone(), s.address.clone()))
            .collect();

        let deadline = self.deadlines.shutdown_notice;
        let notices = targets
            .into_iter()
            .map(|(name, addr)| async move {
                client::send_shutdown_notice(&addr, &name, deadline).await;
            });
        join_all(notices).await;
    }

    /// Probes an address for liveness with the re-registration deadline.
    pub async fn check_is_alive(&self, addr: &str) -> bool {
        client::check_alive(addr, self.deadlines.probe).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> Registry {
        // Short probe so re-attach tests don't sit out the full window.
        let deadlines = Deadlines {
            probe: Duration::from_millis(200),
            shutdown_notice: Duration::from_millis(200),
            ..Deadlines::default()
        };
        Registry::new(
            Arc::new(AddressHandler::new("localhost", 49500, 16)),
            deadlines,
        )
    }

    async fn add(
        registry: &Registry,
        name: &str,
        aliases: &[&str],
        groups: &[&str],
    ) -> Result<Arc<Service>, CoreError> {
        registry
            .add_service(
                name,
                &aliases.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
                &groups.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
                "",
                "",
                ServiceMode::Planetary,
            )
            .await
    }

    #[tokio::test]
    async fn register_then_lookup_returns_same_record() {
        let registry = registry();
        let svc = add(&registry, "svc-a", &[], &["g1"]).await.unwrap();
        assert_eq!(svc.address, "localhost:49500");

        let found = registry.lookup("svc-a").unwrap();
        assert_eq!(found.id, svc.id);
        assert_eq!(found.fingerprint, svc.fingerprint);
    }

    #[tokio::test]
    async fn aliases_resolve_to_the_same_record() {
        let registry = registry();
        let svc = add(&registry, "svc-a", &["alpha", "a"], &[]).await.unwrap();
        for key in ["svc-a", "alpha", "a"] {
            assert_eq!(registry.lookup(key).unwrap().id, svc.id);
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn empty_string_alias_is_omitted() {
        let registry = registry();
        let svc = add(&registry, "svc-a", &["", "alpha"], &[]).await.unwrap();
        assert_eq!(svc.aliases, vec!["alpha"]);
        assert!(registry.lookup("").is_none());
    }

    #[tokio::test]
    async fn alias_collision_rejects_and_leaves_registry_unchanged() {
        let registry = registry();
        add(&registry, "svc-a", &[], &["g1"]).await.unwrap();

        let err = add(&registry, "svc-b", &["svc-a"], &["g1"]).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateAlias(_)));
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("svc-b").is_none());
        // The address vended for the failed registration went back.
        assert_eq!(registry.addresses().reserved_count(), 1);
    }

    #[tokio::test]
    async fn ids_are_sequential_from_the_floor() {
        let registry = registry();
        let a = add(&registry, "a", &[], &[]).await.unwrap();
        let b = add(&registry, "b", &[], &[]).await.unwrap();
        assert_eq!(a.id, "101");
        assert_eq!(b.id, "102");
        assert_eq!(registry.lookup_by_id("102").unwrap().name, "b");
    }

    #[tokio::test]
    async fn reattach_after_shutdown_keeps_id_and_fingerprint() {
        let registry = registry();
        let first = add(&registry, "svc-a", &[], &["g1"]).await.unwrap();
        first.update_state(ServiceState::Shutdown);

        let again = add(&registry, "svc-a", &[], &["g1", "g2"]).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.fingerprint, first.fingerprint);
        assert_eq!(again.state(), ServiceState::Running);
        // The speculative allocation for the re-attach was released.
        assert_eq!(registry.addresses().reserved_count(), 1);
    }

    #[tokio::test]
    async fn unresponsive_running_record_is_reattached() {
        // Nothing listens on the vended address, so the probe fails and
        // the new registration assumes the old record.
        let registry = registry();
        let first = add(&registry, "svc-a", &[], &["g1"]).await.unwrap();
        assert_eq!(first.state(), ServiceState::Running);

        let again = add(&registry, "svc-a", &[], &["g1"]).await.unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.state(), ServiceState::Running);
    }

    #[tokio::test]
    async fn verify_checks_fingerprint_and_state() {
        let registry = registry();
        let svc = add(&registry, "svc-a", &[], &[]).await.unwrap();

        assert!(matches!(
            registry.verify("ghost", &svc.fingerprint),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            registry.verify("svc-a", "wrong"),
            Err(CoreError::FingerprintMismatch(_))
        ));

        let before = svc.last_ping();
        std::thread::sleep(Duration::from_millis(5));
        registry.verify("svc-a", &svc.fingerprint).unwrap();
        assert!(svc.last_ping() > before);

        svc.update_state(ServiceState::Shutdown);
        assert!(matches!(
            registry.verify("svc-a", &svc.fingerprint),
            Err(CoreError::ReportedShutdown(_))
        ));
    }

    #[tokio::test]
    async fn permissions_require_group_intersection() {
        let registry = registry();
        add(&registry, "a", &[], &["g1"]).await.unwrap();
        let b = add(&registry, "b", &[], &["g2"]).await.unwrap();

        assert!(matches!(
            registry.grant_permissions("a", "b"),
            Err(CoreError::PermissionDenied { .. })
        ));

        b.set_peer_groups(["g1".to_string(), "g2".to_string()]);
        assert_eq!(registry.grant_permissions("a", "b").unwrap(), b.address);
    }

    #[tokio::test]
    async fn running_addresses_stay_reserved_in_the_pool() {
        let registry = registry();
        let a = add(&registry, "a", &[], &[]).await.unwrap();
        let b = add(&registry, "b", &[], &[]).await.unwrap();
        assert_ne!(a.address, b.address);
        assert!(registry.addresses().is_reserved(&a.address));
        assert!(registry.addresses().is_reserved(&b.address));
    }

    #[tokio::test]
    async fn core_provided_address_is_adopted_not_vended() {
        let registry = registry();
        let svc = registry
            .add_service("peer", &[], &[], "C", "localhost:61000", ServiceMode::Planetary)
            .await
            .unwrap();
        assert_eq!(svc.address, "localhost:61000");
        assert_eq!(registry.addresses().reserved_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_notices_resolve_with_unreachable_targets() {
        let registry = registry();
        add(&registry, "a", &[], &[]).await.unwrap();
        add(&registry, "b", &[], &[]).await.unwrap();

        let started = std::time::Instant::now();
        registry.send_shutdown_notices().await;
        // Two parallel notices to dead addresses resolve within one window.
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
