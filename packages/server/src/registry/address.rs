//! Worker address allocation from the Core's reserved port range.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::error::CoreError;

/// Vends unique `host:port` pairs from `[base, base + span)`.
///
/// Allocation is serialized behind the handler's own mutex and always
/// returns the lowest unused port, so released ports are reused before
/// the range grows upward.
#[derive(Debug)]
pub struct AddressHandler {
    host: String,
    base: u16,
    span: u16,
    in_use: Mutex<BTreeSet<u16>>,
}

impl AddressHandler {
    #[must_use]
    pub fn new(host: impl Into<String>, base: u16, span: u16) -> Self {
        Self {
            host: host.into(),
            base,
            span,
            in_use: Mutex::new(BTreeSet::new()),
        }
    }

    /// Reserves the lowest unused port and returns its address.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AddressExhausted`] when every port in the
    /// range is reserved.
    pub fn next_address(&self) -> Result<String, CoreError> {
        let mut in_use = self.in_use.lock();
        let port = (self.base..self.base.saturating_add(self.span))
            .find(|p| !in_use.contains(p))
            .ok_or(CoreError::AddressExhausted)?;
        in_use.insert(port);
        Ok(format!("{}:{port}", self.host))
    }

    /// Returns a previously vended address to the pool.
    ///
    /// Addresses outside the pool (or never vended) are ignored.
    pub fn release(&self, addr: &str) {
        if let Some(port) = Self::port_of(addr) {
            self.in_use.lock().remove(&port);
        }
    }

    /// Whether the pool currently holds a reservation for `addr`.
    #[must_use]
    pub fn is_reserved(&self, addr: &str) -> bool {
        Self::port_of(addr).is_some_and(|port| self.in_use.lock().contains(&port))
    }

    /// Number of outstanding reservations.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.in_use.lock().len()
    }

    fn port_of(addr: &str) -> Option<u16> {
        addr.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
    }
}
