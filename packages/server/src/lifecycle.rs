//! Lifecycle control: health state, the shutdown signal, and Unix
//! signal dispatch.
//!
//! Uses `ArcSwap` for lock-free state transitions and a set-once flag so
//! a signal arriving mid-broadcast cannot duplicate the shutdown fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::config::EnvMode;

/// Core health state, transitioned by the lifecycle controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// The Core is initializing (endpoints not yet bound).
    Starting,
    /// Both RPC planes are accepting calls.
    Ready,
    /// Shutdown has begun; notices are fanning out.
    Draining,
    /// The Core has fully stopped.
    Stopped,
}

/// Coordinates startup and orderly shutdown across the Core.
///
/// 1. `set_ready()` once both listeners are bound
/// 2. `begin_shutdown()` claims the (single) shutdown; duplicates no-op
/// 3. `notify_stopped()` signals every subscriber once teardown is done
#[derive(Debug)]
pub struct LifecycleController {
    shutdown_signal: watch::Sender<bool>,
    health_state: ArcSwap<HealthState>,
    shutting_down: AtomicBool,
}

impl LifecycleController {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            health_state: ArcSwap::from_pointee(HealthState::Starting),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Transitions to `Ready`.
    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Returns a receiver notified when the Core has shut down.
    ///
    /// Accept loops select on this alongside `accept()`.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Claims the shutdown. Returns `true` exactly once; later callers
    /// (a second signal, an operator stop racing a signal) get `false`
    /// and must not run the fan-out again.
    pub fn begin_shutdown(&self) -> bool {
        let first = !self.shutting_down.swap(true, Ordering::SeqCst);
        if first {
            self.health_state.store(Arc::new(HealthState::Draining));
        }
        first
    }

    /// Whether a shutdown has been claimed.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Marks teardown complete and wakes every subscriber.
    pub fn notify_stopped(&self) {
        self.health_state.store(Arc::new(HealthState::Stopped));
        // Receivers may already be gone during teardown.
        let _ = self.shutdown_signal.send(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks until the Core's termination signal arrives.
///
/// Standalone Cores terminate on SIGINT. A Core running as a managed
/// child listens for SIGUSR2 instead and drains SIGINT/SIGUSR1 without
/// acting, so those signals pass through to workers unmolested.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn wait_for_signal(env: EnvMode) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    if env == EnvMode::Managed {
        let mut usr2 = signal(SignalKind::user_defined2())?;
        let mut int = signal(SignalKind::interrupt())?;
        let mut usr1 = signal(SignalKind::user_defined1())?;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = int.recv() => {}
                    _ = usr1.recv() => {}
                }
            }
        });
        usr2.recv().await;
    } else {
        let mut int = signal(SignalKind::interrupt())?;
        int.recv().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_starting() {
        let controller = LifecycleController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);
        assert!(!controller.is_shutting_down());
    }

    #[test]
    fn set_ready_transitions_state() {
        let controller = LifecycleController::new();
        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);
    }

    #[test]
    fn begin_shutdown_is_claimed_exactly_once() {
        let controller = LifecycleController::new();
        controller.set_ready();

        assert!(controller.begin_shutdown());
        assert_eq!(controller.health_state(), HealthState::Draining);

        // A racing signal must not re-run the fan-out.
        assert!(!controller.begin_shutdown());
        assert!(controller.is_shutting_down());
    }

    #[tokio::test]
    async fn subscribers_wake_on_stop() {
        let controller = LifecycleController::new();
        let mut rx = controller.subscribe();
        assert!(!*rx.borrow());

        controller.begin_shutdown();
        controller.notify_stopped();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[test]
    fn full_state_machine_walk() {
        let controller = LifecycleController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);
        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);
        controller.begin_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
        controller.notify_stopped();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }
}
