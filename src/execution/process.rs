//! Process execution core.
//!
//! [`Proc`] owns one child process for its whole lifetime. It can be
//! driven either to completion with [`Proc::block`] or incrementally with
//! [`Proc::iter_content`] / [`Proc::iter_lines`]; only one spawn ever
//! happens per handle, and the terminal outcome is cached.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, error, warn};

use super::args::CommandLine;
use super::command::CommandSpec;
use super::result::{Output, RunMode};
use super::state::ProcState;
use super::stream::{ContentStream, Cursor, Delimiter, LineStream, LiveRun};
use super::watchdog::{KillReason, KillSwitch, Watchdog};
use crate::error::ShcmdError;
use crate::Result;

const DRAIN_BUFFER_SIZE: usize = 8192;

/// Whether a non-zero exit is raised or returned as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorMode {
    Raise,
    WarnOnly,
}

/// Handle to a single command execution.
pub struct Proc {
    spec: CommandSpec,
    state: Mutex<ProcState>,
    /// Held for the whole live execution, blocking or streaming.
    gate: tokio::sync::Mutex<()>,
    output: OnceLock<Output>,
    switch: Arc<KillSwitch>,
    spawns: AtomicUsize,
}

impl Proc {
    /// Bind a command to a new handle. The child is not spawned yet.
    pub fn open(spec: CommandSpec) -> Result<Self> {
        spec.validate()?;
        debug!(command = %spec.display_command(), cwd = %spec.cwd().display(), "command opened");

        Ok(Self {
            spec,
            state: Mutex::new(ProcState::NotStarted),
            gate: tokio::sync::Mutex::new(()),
            output: OnceLock::new(),
            switch: Arc::new(KillSwitch::new()),
            spawns: AtomicUsize::new(0),
        })
    }

    /// The bound command.
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// The argument vector.
    pub fn cmd(&self) -> &[String] {
        self.spec.args()
    }

    /// The working directory.
    pub fn cwd(&self) -> &Path {
        self.spec.cwd()
    }

    /// Environment overrides.
    pub fn env(&self) -> &HashMap<String, String> {
        self.spec.env()
    }

    /// Execution deadline.
    pub fn timeout(&self) -> Duration {
        self.spec.timeout()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How many times a child has been spawned for this handle (0 or 1).
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// The terminal outcome.
    ///
    /// Fails with `AccessNotReady` until the command has finished or timed out.
    pub fn output(&self) -> Result<&Output> {
        self.output
            .get()
            .ok_or_else(|| ShcmdError::AccessNotReady(self.state()))
    }

    /// Exit code of the finished command.
    pub fn exit_code(&self) -> Result<i32> {
        self.output().map(|out| out.exit_code)
    }

    /// Stdout decoded as UTF-8.
    pub fn stdout(&self) -> Result<Cow<'_, str>> {
        self.output().map(Output::stdout_text)
    }

    /// Stderr decoded as UTF-8.
    pub fn stderr(&self) -> Result<Cow<'_, str>> {
        self.output().map(Output::stderr_text)
    }

    /// Raw stdout bytes.
    pub fn content(&self) -> Result<&[u8]> {
        self.output().map(|out| out.stdout.as_slice())
    }

    /// `true` once the command has finished with exit code 0.
    pub fn ok(&self) -> bool {
        self.output.get().is_some_and(Output::ok)
    }

    /// Fail with `CommandFailed` (or `Timeout`) unless the command succeeded.
    pub fn raise_for_error(&self) -> Result<&Output> {
        let out = self.output()?;
        self.check(out, ErrorMode::Raise)
    }

    /// Run the command to completion.
    ///
    /// Idempotent: a second call returns the cached outcome without
    /// spawning again. A non-zero exit fails with `CommandFailed`.
    pub async fn block(&self) -> Result<&Output> {
        self.execute(ErrorMode::Raise).await
    }

    /// Like [`Proc::block`], but a non-zero exit is logged and returned as data.
    pub async fn block_warn_only(&self) -> Result<&Output> {
        self.execute(ErrorMode::WarnOnly).await
    }

    async fn execute(&self, mode: ErrorMode) -> Result<&Output> {
        let _gate = self.gate.lock().await;
        if let Some(out) = self.output.get() {
            return self.check(out, mode);
        }
        if self.state() != ProcState::NotStarted {
            // an abandoned stream already used the one spawn
            return Err(ShcmdError::AlreadyConsumed);
        }

        let mut child = self.spawn()?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;
        let mut watchdog = Watchdog::arm(self.spec.timeout(), &self.switch);

        let exited = async {
            let (status, reason) = wait_for_exit(&mut child, &self.switch, None).await?;
            Ok::<_, io::Error>((status, reason, watchdog.elapsed()))
        };
        let (stdout, stderr, (status, reason, elapsed)) = tokio::try_join!(
            drain(stdout, self.switch.grace_expired()),
            drain(stderr, self.switch.grace_expired()),
            exited,
        )?;
        // disarmed only now: the deadline also bounds pipes held open by descendants
        watchdog.disarm();

        let out = self.complete(status, reason, stdout, stderr, elapsed, RunMode::Blocking)?;
        self.check(out, mode)
    }

    /// Stream stdout in chunks of at most `chunk_size` bytes.
    ///
    /// Before any execution this spawns the child lazily on the first pull.
    /// After a completed [`Proc::block`] it replays the captured stdout.
    /// After a completed stream it fails with `AlreadyConsumed`.
    pub async fn iter_content(&self, chunk_size: usize) -> Result<ContentStream<'_>> {
        if chunk_size == 0 {
            return Err(ShcmdError::InvalidArgument(
                "chunk size must be positive".into(),
            ));
        }

        let gate = self.gate.lock().await;
        let cursor = match self.output.get() {
            Some(out) if out.mode == RunMode::Streaming => {
                return Err(ShcmdError::AlreadyConsumed)
            }
            Some(out) if out.is_timed_out() => return Err(self.timeout_error(out)),
            Some(out) => Cursor::Replay {
                data: &out.stdout,
                pos: 0,
            },
            None if self.state() != ProcState::NotStarted => {
                return Err(ShcmdError::AlreadyConsumed)
            }
            None => Cursor::Pending,
        };

        Ok(ContentStream::new(self, gate, chunk_size, cursor))
    }

    /// Stream stdout split on `delimiter`.
    pub async fn iter_lines(
        &self,
        chunk_size: usize,
        delimiter: Delimiter,
    ) -> Result<LineStream<'_>> {
        let content = self.iter_content(chunk_size).await?;
        Ok(LineStream::new(content, delimiter))
    }

    /// Kill the live child.
    ///
    /// A no-op when the child was never started or has already exited.
    pub fn kill(&self) {
        match self.state() {
            ProcState::Running if self.switch.trip(KillReason::Requested) => {
                debug!(command = %self.spec.display_command(), "kill requested");
            }
            state => {
                debug!(command = %self.spec.display_command(), %state, "kill ignored");
            }
        }
    }

    pub(super) fn switch(&self) -> &KillSwitch {
        &self.switch
    }

    pub(super) fn start_live(&self) -> Result<LiveRun> {
        let mut child = self.spawn()?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;
        let switch = Arc::clone(&self.switch);
        let stderr = tokio::spawn(async move { drain(stderr, switch.grace_expired()).await });
        let watchdog = Watchdog::arm(self.spec.timeout(), &self.switch);
        Ok(LiveRun::new(child, stdout, stderr, watchdog))
    }

    fn spawn(&self) -> Result<Child> {
        let mut command = Command::new(self.spec.program());
        command
            .args(&self.spec.args()[1..])
            .current_dir(self.spec.cwd())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.spec.inherit_env() {
            command.env_clear();
        }
        command.envs(self.spec.env());

        let child = command.spawn().map_err(|source| {
            error!(
                command = %self.spec.display_command(),
                cwd = %self.spec.cwd().display(),
                error = %source,
                "failed to spawn command"
            );
            ShcmdError::Spawn {
                command: self.spec.display_command(),
                source,
            }
        })?;

        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.transition(ProcState::Running)?;
        debug!(pid = ?child.id(), command = %self.spec.display_command(), "command spawned");
        Ok(child)
    }

    fn transition(&self, target: ProcState) -> Result<()> {
        self.state
            .lock()
            .map_err(|_| ShcmdError::LockPoisoned)?
            .transition_to(target)
    }

    /// Record the terminal outcome of a live run.
    pub(super) fn complete(
        &self,
        status: ExitStatus,
        reason: Option<KillReason>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        elapsed: Duration,
        mode: RunMode,
    ) -> Result<&Output> {
        let exit_code = exit_code_of(status);
        let out = if reason == Some(KillReason::Timeout) && killed_by_signal(status) {
            error!(
                command = %self.spec.display_command(),
                cwd = %self.spec.cwd().display(),
                ?elapsed,
                timeout = ?self.spec.timeout(),
                "command timed out"
            );
            Output::timed_out(exit_code, stdout, stderr, elapsed, mode)
        } else {
            debug!(command = %self.spec.display_command(), exit_code, ?elapsed, "command finished");
            Output::finished(exit_code, stdout, stderr, elapsed, mode)
        };

        let target = out.state;
        let mut state = self.state.lock().map_err(|_| ShcmdError::LockPoisoned)?;
        if !state.can_transition_to(target) || self.output.set(out).is_err() {
            return Err(ShcmdError::InvalidStateTransition {
                from: *state,
                to: target,
            });
        }
        *state = target;
        drop(state);

        self.output()
    }

    /// Map a terminal outcome to the caller-facing result.
    pub(super) fn check<'a>(&self, out: &'a Output, mode: ErrorMode) -> Result<&'a Output> {
        if out.is_timed_out() {
            return Err(self.timeout_error(out));
        }
        if out.exit_code == 0 {
            return Ok(out);
        }

        match mode {
            ErrorMode::Raise => {
                error!(
                    command = %self.spec.display_command(),
                    cwd = %self.spec.cwd().display(),
                    exit_code = out.exit_code,
                    stdout = %out.stdout_text(),
                    stderr = %out.stderr_text(),
                    "command failed"
                );
                Err(ShcmdError::CommandFailed {
                    command: self.spec.display_command(),
                    cwd: self.spec.cwd().to_path_buf(),
                    exit_code: out.exit_code,
                    stderr: out.stderr_text().into_owned(),
                })
            }
            ErrorMode::WarnOnly => {
                warn!(
                    command = %self.spec.display_command(),
                    cwd = %self.spec.cwd().display(),
                    exit_code = out.exit_code,
                    "command exited with non-zero status"
                );
                Ok(out)
            }
        }
    }

    fn timeout_error(&self, out: &Output) -> ShcmdError {
        ShcmdError::Timeout {
            command: self.spec.display_command(),
            elapsed: out.elapsed,
        }
    }
}

impl std::fmt::Debug for Proc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proc")
            .field("spec", &self.spec)
            .field("state", &self.state())
            .field("exit_code", &self.output.get().map(|o| o.exit_code))
            .finish()
    }
}

impl std::fmt::Display for Proc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ret = match self.output.get() {
            Some(out) => out.exit_code.to_string(),
            None => "None".to_string(),
        };
        write!(
            f,
            "<{}@{}  ret: {} state: {}>",
            self.spec.display_command(),
            self.spec.cwd().display(),
            ret,
            self.state()
        )
    }
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T> {
    pipe.ok_or_else(|| {
        ShcmdError::Io(io::Error::other(format!("child {} was not captured", name)))
    })
}

/// Read a pipe to end of file, or until `cutoff` resolves.
///
/// Bytes read before the cutoff are kept.
pub(super) async fn drain<R, F>(mut pipe: R, cutoff: F) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(cutoff);
    let mut captured = Vec::new();
    let mut buf = [0u8; DRAIN_BUFFER_SIZE];

    loop {
        tokio::select! {
            n = pipe.read(&mut buf) => match n? {
                0 => break,
                n => captured.extend_from_slice(&buf[..n]),
            },
            () = &mut cutoff => {
                debug!(bytes = captured.len(), "pipe still open after kill, abandoning it");
                break;
            }
        }
    }
    Ok(captured)
}

/// Wait for the child to exit, killing it if the switch trips first.
///
/// `pending` is a kill already issued by the caller.
pub(super) async fn wait_for_exit(
    child: &mut Child,
    switch: &KillSwitch,
    pending: Option<KillReason>,
) -> io::Result<(ExitStatus, Option<KillReason>)> {
    if pending.is_some() {
        return Ok((child.wait().await?, pending));
    }

    tokio::select! {
        status = child.wait() => Ok((status?, None)),
        reason = switch.tripped() => {
            send_kill(child, reason);
            let status = child.wait().await?;
            Ok((status, Some(reason)))
        }
    }
}

pub(super) fn send_kill(child: &mut Child, reason: KillReason) {
    match child.start_kill() {
        Ok(()) => debug!(pid = ?child.id(), ?reason, "kill signal sent"),
        Err(e) => debug!(error = %e, ?reason, "kill skipped, child already exited"),
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Exit signature of a child that was killed rather than exiting on its own.
#[cfg(unix)]
fn killed_by_signal(status: ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGKILL)
}

#[cfg(not(unix))]
fn killed_by_signal(status: ExitStatus) -> bool {
    !status.success()
}

/// Open and block on a command with default settings.
pub async fn run(cmd: impl Into<CommandLine>) -> Result<Proc> {
    let proc = Proc::open(CommandSpec::new(cmd)?)?;
    proc.block().await?;
    Ok(proc)
}

/// Open and block on a command with the given timeout.
pub async fn run_with_timeout(cmd: impl Into<CommandLine>, timeout: Duration) -> Result<Proc> {
    let spec = CommandSpec::builder(cmd).timeout(timeout).build()?;
    let proc = Proc::open(spec)?;
    proc.block().await?;
    Ok(proc)
}
