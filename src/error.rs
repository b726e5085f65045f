//! Error types for shcmd.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::execution::ProcState;

/// Main error type for shcmd operations.
#[derive(Error, Debug)]
pub enum ShcmdError {
    /// Malformed command specification.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The child did not exit before its deadline and was killed.
    #[error("command `{command}` timed out after {elapsed:?}")]
    Timeout { command: String, elapsed: Duration },

    /// The child exited with a non-zero status.
    #[error("running `{command}` @<{}> failed with exit code {exit_code}", .cwd.display())]
    CommandFailed {
        command: String,
        cwd: PathBuf,
        exit_code: i32,
        stderr: String,
    },

    /// A finite output stream was iterated a second time.
    #[error("command output already consumed")]
    AlreadyConsumed,

    /// Output accessors were used before the command reached a terminal state.
    #[error("output not ready: current state is {0:?}")]
    AccessNotReady(ProcState),

    /// The child process could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: ProcState, to: ProcState },

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShcmdError {
    /// Check whether this error reports an expired deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShcmdError::Timeout { .. })
    }

    /// Exit code carried by a `CommandFailed` error.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ShcmdError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Convenience Result type for shcmd operations.
pub type Result<T> = std::result::Result<T, ShcmdError>;
