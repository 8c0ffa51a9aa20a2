/// Worker lifecycle definitions
///
/// This module defines the states a category worker moves through and which
/// moves between them are legal.
use crate::HarvestError;
use std::fmt;

/// Represents the lifecycle state of one category worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    // ===== Active States =====
    /// Worker is known to the supervisor but has not been launched
    Idle,

    /// Worker thread is being spawned
    Starting,

    /// Worker is running its crawl session
    Running,

    // ===== Terminal States =====
    /// Session finished (completed, stopped or paused) without a fatal error
    Completed,

    /// Worker reported a fatal error or exited abnormally
    Error,

    /// Worker was stopped by the supervisor
    Terminated,
}

impl WorkerState {
    /// Returns true if the worker thread is expected to be alive
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Terminated)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    ///
    /// Every terminal state may be relaunched through `Starting`, and an
    /// active worker may fail or be terminated at any time.
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Terminated)
                | (Running, Completed)
                | (Running, Error)
                | (Running, Terminated)
                | (Completed, Starting)
                | (Error, Starting)
                | (Terminated, Starting)
                | (Idle, Terminated)
        )
    }

    /// Performs a checked transition
    ///
    /// # Returns
    ///
    /// * `Ok(WorkerState)` - The new state
    /// * `Err(HarvestError::InvalidTransition)` - The move is not allowed
    pub fn transition(self, next: WorkerState) -> Result<WorkerState, HarvestError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(HarvestError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = WorkerState::Idle;
        let state = state.transition(WorkerState::Starting).unwrap();
        let state = state.transition(WorkerState::Running).unwrap();
        let state = state.transition(WorkerState::Completed).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_restart_after_error() {
        let state = WorkerState::Running.transition(WorkerState::Error).unwrap();
        assert_eq!(
            state.transition(WorkerState::Starting).unwrap(),
            WorkerState::Starting
        );
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(WorkerState::Idle.transition(WorkerState::Running).is_err());
        assert!(WorkerState::Completed
            .transition(WorkerState::Running)
            .is_err());
        assert!(matches!(
            WorkerState::Error.transition(WorkerState::Completed),
            Err(HarvestError::InvalidTransition {
                from: WorkerState::Error,
                to: WorkerState::Completed
            })
        ));
    }

    #[test]
    fn test_active_and_terminal_are_disjoint() {
        for state in [
            WorkerState::Idle,
            WorkerState::Starting,
            WorkerState::Running,
            WorkerState::Completed,
            WorkerState::Error,
            WorkerState::Terminated,
        ] {
            assert!(!(state.is_active() && state.is_terminal()));
        }
    }
}
