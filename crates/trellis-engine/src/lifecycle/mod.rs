//! Per-provider lifecycle state machine.
//!
//! ```text
//! Registered -> Configuring -> Initializing -> Ready <-> Degraded
//!                    |              |           |          |
//!                    v              v           v          v
//!                  Failed         Failed     ReloadPending -> Ready | Failed
//!
//! any non-terminal state -> ShuttingDown -> Stopped
//! ```
//!
//! `Failed` and `Stopped` are terminal. Every mutation goes through
//! [`validate_transition`], so an instance can never skip a step.

use serde::Serialize;
use strum::{Display, EnumString};

use crate::error::LifecycleError;

/// State of one provider instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LifecycleState {
    /// Selected for the service but not yet touched.
    Registered,
    /// Configuration slice is being bound.
    Configuring,
    /// `init` is running.
    Initializing,
    /// Running normally.
    Ready,
    /// Running, but the last health probe failed.
    Degraded,
    /// Applying a configuration change.
    ReloadPending,
    /// `shutdown` is running.
    ShuttingDown,
    /// Shut down.
    Stopped,
    /// Failed to start, reload, or inherit a working dependency.
    Failed,
}

impl LifecycleState {
    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// Returns `true` while the provider is serving, healthy or not.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded | Self::ReloadPending)
    }
}

/// Checks whether `from -> to` is a legal transition for `provider`.
///
/// # Errors
///
/// Returns [`LifecycleError::InvalidTransition`] for any edge not present in
/// the state machine.
pub fn validate_transition(
    provider: &str,
    from: LifecycleState,
    to: LifecycleState,
) -> Result<(), LifecycleError> {
    use LifecycleState::{
        Configuring, Degraded, Failed, Initializing, Ready, Registered, ReloadPending,
        ShuttingDown, Stopped,
    };

    let allowed = match (from, to) {
        (Registered, Configuring)
        | (Configuring, Initializing)
        | (Initializing, Ready)
        | (Ready, Degraded)
        | (Degraded, Ready)
        | (Ready | Degraded, ReloadPending)
        | (ReloadPending, Ready)
        | (ShuttingDown, Stopped) => true,
        (Configuring | Initializing | Ready | ReloadPending, Failed) => true,
        (state, ShuttingDown) => !state.is_terminal() && state != ShuttingDown,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition {
            provider: provider.to_owned(),
            from,
            to,
        })
    }
}
