//! Connection state shared with the IO thread

use std::sync::atomic::{AtomicU8, Ordering};

/// Transport state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Connected = 0,
    Closed = 1,
}

impl ConnectionState {
    /// Unknown values read as `Closed`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connected,
            _ => Self::Closed,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Atomic [`ConnectionState`]
///
/// The IO thread flips it to `Closed` when the server goes away; the caller
/// flips it on `close()`.
///
/// # Example
///
/// ```rust
/// use ziapi_driver::state::{AtomicConnectionState, ConnectionState};
/// use std::sync::atomic::Ordering;
///
/// let state = AtomicConnectionState::new(ConnectionState::Connected);
/// assert!(state.close(Ordering::AcqRel));
/// assert!(!state.close(Ordering::AcqRel));
/// assert_eq!(state.get(Ordering::Acquire), ConnectionState::Closed);
/// ```
#[derive(Debug)]
pub struct AtomicConnectionState {
    inner: AtomicU8,
}

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: ConnectionState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }

    /// Move to `Closed`; returns `true` only for the caller that did it.
    pub fn close(&self, ordering: Ordering) -> bool {
        self.inner.swap(ConnectionState::Closed.as_u8(), ordering)
            == ConnectionState::Connected.as_u8()
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8() {
        assert_eq!(ConnectionState::from_u8(0), ConnectionState::Connected);
        assert_eq!(ConnectionState::from_u8(1), ConnectionState::Closed);
        assert_eq!(ConnectionState::from_u8(255), ConnectionState::Closed);
    }

    #[test]
    fn test_atomic_set_get() {
        let state = AtomicConnectionState::default();
        assert!(state.get(Ordering::Relaxed).is_connected());
        state.set(ConnectionState::Closed, Ordering::Relaxed);
        assert!(!state.get(Ordering::Relaxed).is_connected());
        assert!(!state.close(Ordering::Relaxed));
    }
}
