//! Process state machine.

/// Lifecycle state of a command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcState {
    /// Command bound, child not yet spawned.
    #[default]
    NotStarted,
    /// Child spawned and watchdog armed.
    Running,
    /// Watchdog killed the child before it exited.
    TimedOut,
    /// Child exited and its output was drained.
    Finished,
}

impl ProcState {
    /// Check if transition to target state is valid.
    ///
    /// Valid transitions:
    /// - NotStarted -> Running
    /// - Running -> Finished
    /// - Running -> TimedOut
    pub fn can_transition_to(&self, target: ProcState) -> bool {
        use ProcState::*;
        matches!(
            (*self, target),
            (NotStarted, Running) | (Running, Finished) | (Running, TimedOut)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&mut self, target: ProcState) -> crate::Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(crate::error::ShcmdError::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcState::Finished | ProcState::TimedOut)
    }

    /// Short lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcState::NotStarted => "not started",
            ProcState::Running => "running",
            ProcState::TimedOut => "timed out",
            ProcState::Finished => "finished",
        }
    }
}

impl std::fmt::Display for ProcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
