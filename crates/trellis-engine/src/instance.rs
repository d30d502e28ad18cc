//! Running instantiation of one selected provider.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use trellis_providers::{Capability, ProviderDescriptor, RegisteredProvider};

use crate::lifecycle::LifecycleState;

/// Slot holding the live capability once `init` succeeded.
///
/// Every capability call locks the slot, so operations on one instance never
/// overlap.
pub(crate) type CapabilitySlot = Arc<Mutex<Option<Box<dyn Capability>>>>;

/// Locks a mutex, recovering the data when a worker panicked while holding it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable bookkeeping guarded by the instance's state lock.
#[derive(Debug)]
pub(crate) struct InstanceStatus {
    pub(crate) state: LifecycleState,
    pub(crate) consecutive_failures: u32,
    pub(crate) escalated: bool,
    pub(crate) last_error: Option<String>,
}

impl InstanceStatus {
    pub(crate) fn reset_health(&mut self) {
        self.consecutive_failures = 0;
        self.escalated = false;
    }
}

pub(crate) struct ProviderInstance {
    provider: RegisteredProvider,
    slot: CapabilitySlot,
    status: Mutex<InstanceStatus>,
    check_started: Arc<Mutex<Option<Instant>>>,
}

impl ProviderInstance {
    pub(crate) fn new(provider: RegisteredProvider) -> Self {
        Self {
            provider,
            slot: Arc::new(Mutex::new(None)),
            status: Mutex::new(InstanceStatus {
                state: LifecycleState::Registered,
                consecutive_failures: 0,
                escalated: false,
                last_error: None,
            }),
            check_started: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.provider.name()
    }

    pub(crate) fn descriptor(&self) -> &ProviderDescriptor {
        self.provider.descriptor()
    }

    pub(crate) const fn provider(&self) -> &RegisteredProvider {
        &self.provider
    }

    pub(crate) fn is_core(&self) -> bool {
        self.descriptor().kind().is_core()
    }

    pub(crate) fn slot(&self) -> CapabilitySlot {
        Arc::clone(&self.slot)
    }

    /// Start time of the health check currently holding the slot, if any.
    ///
    /// Written only by probe workers while they hold the slot.
    pub(crate) fn check_clock(&self) -> Arc<Mutex<Option<Instant>>> {
        Arc::clone(&self.check_started)
    }

    pub(crate) fn status(&self) -> MutexGuard<'_, InstanceStatus> {
        lock(&self.status)
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.status().state
    }
}
