//! Hook registry for circuit breaker events.

use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;

type HookFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// A registry for circuit breaker event hooks.
///
/// Every hook receives the name of the dependency whose breaker fired it. Hooks run
/// after the breaker has released its lock, so they may read breaker snapshots.
pub struct HookRegistry {
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
    on_rejected: RwLock<Option<HookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
            on_rejected: RwLock::new(None),
        }
    }

    /// Sets the hook to call when a breaker opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a breaker closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a breaker half-opens.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when an open breaker rejects a call.
    pub fn set_on_rejected<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_rejected.write() = Some(Arc::new(f));
    }

    /// Executes the appropriate hook for a state transition.
    pub fn execute_state_transition_hook(&self, dependency: &str, to: State) {
        let slot = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        // Clone out of the lock so a hook may re-register hooks.
        let hook = slot.read().clone();
        if let Some(hook) = hook {
            hook(dependency);
        }
    }

    /// Executes the rejection hook.
    pub fn execute_rejected_hook(&self, dependency: &str) {
        let hook = self.on_rejected.read().clone();
        if let Some(hook) = hook {
            hook(dependency);
        }
    }
}
