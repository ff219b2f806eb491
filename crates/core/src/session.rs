//! Lifecycle state machine for one calculation session.
//!
//! ```text
//! Idle -> Receiving -> Calculating -> Extracting -> Delivering -> Closed
//!            |             |              |
//!            +-------------+--------------+--> Failed -> Closed
//!
//! any non-terminal state --(disconnect)--> Abandoned
//! ```

use std::fmt;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Receiving,
    Calculating,
    Extracting,
    Delivering,
    Failed,
    Closed,
    Abandoned,
}

impl SessionState {
    /// States reachable from `self` in one step.
    pub fn valid_transitions(self) -> &'static [SessionState] {
        use SessionState::*;
        match self {
            Idle => &[Receiving, Abandoned],
            Receiving => &[Calculating, Failed, Abandoned],
            Calculating => &[Extracting, Failed, Abandoned],
            Extracting => &[Delivering, Failed, Abandoned],
            Delivering => &[Closed, Abandoned],
            Failed => &[Closed, Abandoned],
            Closed | Abandoned => &[],
        }
    }

    pub fn can_transition(self, to: SessionState) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Abandoned)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Receiving => "receiving",
            Self::Calculating => "calculating",
            Self::Extracting => "extracting",
            Self::Delivering => "delivering",
            Self::Failed => "failed",
            Self::Closed => "closed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tracks the current state of one session and rejects illegal moves.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`, or fail without changing state.
    pub fn advance(&mut self, next: SessionState) -> Result<(), CoreError> {
        if !self.state.can_transition(next) {
            return Err(CoreError::Validation(format!(
                "Cannot move session from '{}' to '{}'. Allowed transitions: {:?}",
                self.state,
                next,
                self.state.valid_transitions()
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Mark the session abandoned after a transport disconnect.
    ///
    /// Returns `false` when the session had already reached a terminal state.
    pub fn abandon(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = SessionState::Abandoned;
        true
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
