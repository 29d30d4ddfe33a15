//! Session state machine
//!
//! Every state change of a streaming session goes through
//! [`SessionState::apply`], so the legal transitions are all listed in one
//! match.

use std::fmt;

use crate::{Error, Result};

/// Lifecycle of one streaming session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection exists
    #[default]
    Idle,
    /// Connect request issued, waiting for the ready acknowledgment
    Connecting,
    /// Audio flows out, transcript events flow in
    Open,
    /// Turn finished or cancelled, remote channel being released
    Closing,
    /// Remote channel released
    Closed,
    /// Connect failure, transport failure or remote error
    Failed(String),
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Connect,
    Ready,
    TurnComplete,
    Cancel,
    Close,
    Fail(String),
}

impl SessionState {
    /// `Closed` and `Failed` accept nothing but `Close`
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }

    /// Whether outbound chunks may be sent
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether a connection is being set up or in use
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Compute the state after `transition`
    ///
    /// `Close` is idempotent and leaves `Failed` in place so the failure
    /// reason survives teardown.
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the transition is not legal from this state
    pub fn apply(&self, transition: &Transition) -> Result<Self> {
        use Transition as T;

        let next = match (self, transition) {
            (Self::Idle, T::Connect) => Self::Connecting,
            (Self::Connecting, T::Ready) => Self::Open,
            (Self::Open, T::TurnComplete) => Self::Closing,
            (Self::Idle | Self::Connecting | Self::Open | Self::Closing, T::Cancel) => {
                Self::Closing
            }
            (Self::Idle | Self::Connecting | Self::Open | Self::Closing, T::Fail(reason)) => {
                Self::Failed(reason.clone())
            }
            (Self::Closing | Self::Closed, T::Close) => Self::Closed,
            (Self::Failed(reason), T::Close) => Self::Failed(reason.clone()),
            (state, transition) => {
                return Err(Error::Session(format!(
                    "illegal transition {transition:?} from {state}"
                )));
            }
        };
        Ok(next)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(transitions: &[Transition]) -> Result<SessionState> {
        transitions
            .iter()
            .try_fold(SessionState::Idle, |state, t| state.apply(t))
    }

    #[test]
    fn test_happy_path() {
        let state = walk(&[
            Transition::Connect,
            Transition::Ready,
            Transition::TurnComplete,
            Transition::Close,
        ])
        .unwrap();
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let closed = walk(&[Transition::Cancel, Transition::Close]).unwrap();
        assert_eq!(closed.apply(&Transition::Close).unwrap(), SessionState::Closed);
    }

    #[test]
    fn test_fail_reachable_from_every_non_terminal_state() {
        let prefixes: [&[Transition]; 4] = [
            &[],
            &[Transition::Connect],
            &[Transition::Connect, Transition::Ready],
            &[Transition::Connect, Transition::Cancel],
        ];
        for prefix in prefixes {
            let state = walk(prefix).unwrap();
            assert!(!state.is_terminal());
            let failed = state.apply(&Transition::Fail("boom".to_string())).unwrap();
            assert_eq!(failed, SessionState::Failed("boom".to_string()));
        }
    }

    #[test]
    fn test_terminal_states_reject_everything_but_close() {
        let failed = SessionState::Failed("x".to_string());
        assert!(failed.apply(&Transition::Ready).is_err());
        assert!(failed.apply(&Transition::Cancel).is_err());
        assert!(failed.apply(&Transition::Fail("y".to_string())).is_err());
        assert_eq!(failed.apply(&Transition::Close).unwrap(), failed);

        assert!(SessionState::Closed.apply(&Transition::Connect).is_err());
    }

    #[test]
    fn test_turn_complete_only_from_open() {
        assert!(SessionState::Connecting.apply(&Transition::TurnComplete).is_err());
        assert!(SessionState::Closing.apply(&Transition::TurnComplete).is_err());
    }

    #[test]
    fn test_cancel_from_any_non_terminal_state() {
        for state in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Closing,
        ] {
            assert_eq!(state.apply(&Transition::Cancel).unwrap(), SessionState::Closing);
        }
    }
}
