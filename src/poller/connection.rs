//! Connection state machine.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Connection state of the current job, as seen by the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No job is being polled.
    #[default]
    Idle,
    /// A query is out and nothing has come back yet.
    Connecting,
    /// Still no first response, and long enough that the service is likely cold-starting.
    Waking,
    /// The job has answered at least once.
    Connected,
    /// A query failed; polling stopped until restarted.
    Error,
}

impl ConnectionState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, target),
            (Idle, Connecting) |
            (Connecting, Waking) | (Connecting, Connected) |
            (Connecting, Error) | (Connecting, Idle) |
            (Waking, Connected) | (Waking, Error) | (Waking, Idle) |
            (Connected, Error) | (Connected, Idle) |
            // Explicit restart after a failure
            (Error, Connecting)
        )
    }

    /// Terminal states stop the polling loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::Error)
    }

    /// No response has succeeded yet for the current job.
    pub fn is_awaiting_first_response(&self) -> bool {
        matches!(self, Self::Connecting | Self::Waking)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Waking => "waking",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: Option<String>,
}

/// Current connection state, guarded by the transition table.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    state: ConnectionState,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Start over for a new job in `Connecting`, from whatever state the
    /// previous job left behind.
    pub fn reset_for_new_job(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Transition to a new state. Returns the transition that was applied.
    pub fn transition_to(
        &mut self,
        target: ConnectionState,
        reason: Option<String>,
    ) -> Result<StateTransition, SessionError> {
        if !self.state.can_transition_to(target) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }

        let transition = StateTransition {
            from: self.state,
            to: target,
            reason,
        };
        self.state = target;
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL: [ConnectionState; 5] = [Idle, Connecting, Waking, Connected, Error];

    #[test]
    fn forward_transitions_valid() {
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Waking));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Waking.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Error));
        assert!(Waking.can_transition_to(Error));
        assert!(Error.can_transition_to(Connecting));
    }

    #[test]
    fn connected_never_reverts() {
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Waking));
        assert!(!Waking.can_transition_to(Connecting));
    }

    #[test]
    fn error_only_leaves_via_restart() {
        for target in ALL {
            assert_eq!(Error.can_transition_to(target), target == Connecting);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(Idle.is_terminal());
        assert!(Error.is_terminal());
        assert!(!Connecting.is_terminal());
        assert!(!Waking.is_terminal());
        assert!(!Connected.is_terminal());
    }

    #[test]
    fn tracker_rejects_illegal_transition() {
        let mut tracker = ConnectionTracker::new();
        tracker.reset_for_new_job();
        tracker.transition_to(Connected, None).unwrap();

        let err = tracker.transition_to(Waking, None).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                from: Connected,
                to: Waking
            }
        );
        assert_eq!(tracker.state(), Connected);
    }

    #[test]
    fn reset_recovers_from_any_state() {
        let mut tracker = ConnectionTracker::new();
        tracker.reset_for_new_job();
        let t = tracker.transition_to(Error, Some("boom".to_string())).unwrap();
        assert_eq!((t.from, t.to), (Connecting, Error));
        assert_eq!(t.reason.as_deref(), Some("boom"));

        tracker.reset_for_new_job();
        assert_eq!(tracker.state(), Connecting);
        assert!(tracker.transition_to(Connected, None).is_ok());
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&Waking).unwrap(), "\"waking\"");
        assert_eq!(Connected.to_string(), "connected");
    }
}
