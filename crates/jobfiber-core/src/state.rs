//! Coroutine state type

use core::fmt;

/// Lifecycle state of a coroutine
///
/// ```text
/// Unstarted --start--> Suspended <--resume/yield--> Running --return--> Finished
/// ```
///
/// A coroutine never leaves `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroutineState {
    /// Created, no execution context yet
    Unstarted = 0,

    /// Has a context and is waiting to be resumed
    Suspended = 1,

    /// Currently executing on some thread
    Running = 2,

    /// Entry returned (or panicked); cannot be resumed again
    Finished = 3,
}

impl CoroutineState {
    /// Check if the coroutine can still be resumed at some point
    #[inline]
    pub const fn is_live(&self) -> bool {
        matches!(self, CoroutineState::Suspended | CoroutineState::Running)
    }

    /// Check if the entry function has returned
    #[inline]
    pub const fn is_finished(&self) -> bool {
        matches!(self, CoroutineState::Finished)
    }
}

impl From<u8> for CoroutineState {
    fn from(v: u8) -> Self {
        match v {
            0 => CoroutineState::Unstarted,
            1 => CoroutineState::Suspended,
            2 => CoroutineState::Running,
            _ => CoroutineState::Finished,
        }
    }
}

impl From<CoroutineState> for u8 {
    fn from(state: CoroutineState) -> u8 {
        state as u8
    }
}

impl fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoroutineState::Unstarted => write!(f, "UNSTARTED"),
            CoroutineState::Suspended => write!(f, "SUSPENDED"),
            CoroutineState::Running => write!(f, "RUNNING"),
            CoroutineState::Finished => write!(f, "FINISHED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness() {
        assert!(!CoroutineState::Unstarted.is_live());
        assert!(CoroutineState::Suspended.is_live());
        assert!(CoroutineState::Running.is_live());
        assert!(!CoroutineState::Finished.is_live());
        assert!(CoroutineState::Finished.is_finished());
    }

    #[test]
    fn test_u8_conversion() {
        for state in [
            CoroutineState::Unstarted,
            CoroutineState::Suspended,
            CoroutineState::Running,
            CoroutineState::Finished,
        ] {
            assert_eq!(CoroutineState::from(u8::from(state)), state);
        }
    }
}
