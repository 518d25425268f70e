//! Module lifecycle state shared with the worker thread

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`Module`](super::Module)
///
/// ```text
/// Created ──param/subscribe──▶ Ready ──execute──▶ Executing ──done/finish/fault──▶ Finished
///    └────────────execute──────────────────────────▲    ▲────────re-execute──────────┘
/// any ──clear/drop──▶ Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ModuleState {
    #[default]
    Created = 0,
    Ready = 1,
    Executing = 2,
    Finished = 3,
    Destroyed = 4,
}

impl ModuleState {
    /// Unknown values read as `Destroyed`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Ready,
            2 => Self::Executing,
            3 => Self::Finished,
            _ => Self::Destroyed,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parameters and subscriptions may change in this state.
    pub fn is_configurable(self) -> bool {
        matches!(self, Self::Created | Self::Ready | Self::Finished)
    }

    pub fn can_execute(self) -> bool {
        self.is_configurable()
    }
}

/// Atomic [`ModuleState`]
///
/// Written by the caller (execute, clear) and by the worker (finish).
///
/// # Example
///
/// ```rust
/// use ziapi_client::module::{AtomicModuleState, ModuleState};
/// use std::sync::atomic::Ordering;
///
/// let state = AtomicModuleState::new(ModuleState::Ready);
/// assert!(state.transition(ModuleState::Ready, ModuleState::Executing, Ordering::AcqRel));
/// assert!(!state.transition(ModuleState::Ready, ModuleState::Executing, Ordering::AcqRel));
/// assert_eq!(state.get(Ordering::Acquire), ModuleState::Executing);
/// ```
#[derive(Debug)]
pub struct AtomicModuleState {
    inner: AtomicU8,
}

impl AtomicModuleState {
    pub fn new(state: ModuleState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> ModuleState {
        ModuleState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: ModuleState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }

    /// Move `from → to`; false if the current state is not `from`.
    pub fn transition(&self, from: ModuleState, to: ModuleState, ordering: Ordering) -> bool {
        self.inner
            .compare_exchange(from.as_u8(), to.as_u8(), ordering, Ordering::Acquire)
            .is_ok()
    }

    /// Mark destroyed; returns the previous state.
    pub fn destroy(&self, ordering: Ordering) -> ModuleState {
        ModuleState::from_u8(self.inner.swap(ModuleState::Destroyed.as_u8(), ordering))
    }
}

impl Default for AtomicModuleState {
    fn default() -> Self {
        Self::new(ModuleState::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_roundtrip() {
        for state in [
            ModuleState::Created,
            ModuleState::Ready,
            ModuleState::Executing,
            ModuleState::Finished,
            ModuleState::Destroyed,
        ] {
            assert_eq!(ModuleState::from_u8(state.as_u8()), state);
        }
        assert_eq!(ModuleState::from_u8(200), ModuleState::Destroyed);
    }

    #[test]
    fn test_configurable_states() {
        assert!(ModuleState::Created.is_configurable());
        assert!(ModuleState::Finished.is_configurable());
        assert!(!ModuleState::Executing.is_configurable());
        assert!(!ModuleState::Destroyed.is_configurable());
    }

    #[test]
    fn test_destroy_reports_previous() {
        let state = AtomicModuleState::new(ModuleState::Executing);
        assert_eq!(state.destroy(Ordering::AcqRel), ModuleState::Executing);
        assert_eq!(state.destroy(Ordering::AcqRel), ModuleState::Destroyed);
    }

    #[test]
    fn test_worker_cannot_finish_destroyed_module() {
        let state = AtomicModuleState::new(ModuleState::Executing);
        state.destroy(Ordering::AcqRel);
        assert!(!state.transition(ModuleState::Executing, ModuleState::Finished, Ordering::AcqRel));
        assert_eq!(state.get(Ordering::Acquire), ModuleState::Destroyed);
    }
}
