//! Execution result types.

use std::borrow::Cow;
use std::time::Duration;

use super::state::ProcState;

/// How a command's output was consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Captured in full by a blocking call; replayable.
    Blocking,
    /// Pulled chunk by chunk; single-pass.
    Streaming,
}

/// Terminal outcome of a command.
#[derive(Debug, Clone)]
pub struct Output {
    /// Terminal state, `Finished` or `TimedOut`.
    pub state: ProcState,
    /// Exit code; `-signal` when the child was killed by a signal.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: Vec<u8>,
    /// Captured stderr.
    pub stderr: Vec<u8>,
    /// Wall-clock time from spawn to exit.
    pub elapsed: Duration,
    /// How the output was consumed.
    pub mode: RunMode,
}

impl Output {
    /// Create a finished result.
    pub fn finished(
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        elapsed: Duration,
        mode: RunMode,
    ) -> Self {
        Self {
            state: ProcState::Finished,
            exit_code,
            stdout,
            stderr,
            elapsed,
            mode,
        }
    }

    /// Create a result indicating timeout.
    pub fn timed_out(
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        elapsed: Duration,
        mode: RunMode,
    ) -> Self {
        Self {
            state: ProcState::TimedOut,
            ..Self::finished(exit_code, stdout, stderr, elapsed, mode)
        }
    }

    /// Check if the command finished with exit code 0.
    pub fn ok(&self) -> bool {
        self.state == ProcState::Finished && self.exit_code == 0
    }

    /// Check if the watchdog killed the command.
    pub fn is_timed_out(&self) -> bool {
        self.state == ProcState::TimedOut
    }

    /// Stdout decoded as UTF-8 (lossy).
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Stderr decoded as UTF-8 (lossy).
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Stdout, trimmed.
    pub fn stdout_trimmed(&self) -> String {
        self.stdout_text().trim().to_string()
    }

    /// Stdout lines.
    pub fn lines(&self) -> Vec<String> {
        self.stdout_text().lines().map(str::to_string).collect()
    }
}
