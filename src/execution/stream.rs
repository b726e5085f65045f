//! Streaming consumption of command output.
//!
//! [`ContentStream`] is a pull-based cursor over a child's stdout: each
//! `next().await` reads at most one chunk from the pipe. [`LineStream`]
//! re-splits those chunks on a delimiter, carrying partial segments
//! across chunk boundaries.

use std::io;

use futures_util::Stream;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::process::{send_kill, wait_for_exit, ErrorMode, Proc};
use super::result::RunMode;
use super::watchdog::{KillReason, KillSwitch, Watchdog, KILL_GRACE};
use crate::error::ShcmdError;
use crate::Result;

/// Default chunk size for line iteration.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

pub(super) enum Cursor<'a> {
    /// Child not spawned yet; spawns on first pull.
    Pending,
    Live(Box<LiveRun>),
    /// Replaying output captured by a blocking run.
    Replay { data: &'a [u8], pos: usize },
    Done,
}

/// A live child whose stdout is being streamed.
pub(super) struct LiveRun {
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<io::Result<Vec<u8>>>,
    watchdog: Watchdog,
    captured: Vec<u8>,
    buf: Vec<u8>,
    kill_reason: Option<KillReason>,
    /// Stdout is abandoned after this instant once the child was killed.
    kill_deadline: Option<Instant>,
}

enum Step {
    Read(usize),
    Killed(KillReason),
    Abandoned,
}

impl LiveRun {
    pub(super) fn new(
        child: Child,
        stdout: ChildStdout,
        stderr: JoinHandle<io::Result<Vec<u8>>>,
        watchdog: Watchdog,
    ) -> Self {
        Self {
            child,
            stdout,
            stderr,
            watchdog,
            captured: Vec::new(),
            buf: Vec::new(),
            kill_reason: None,
            kill_deadline: None,
        }
    }

    /// Read the next chunk, or `None` once stdout is closed.
    async fn read_chunk(
        &mut self,
        chunk_size: usize,
        switch: &KillSwitch,
    ) -> io::Result<Option<Vec<u8>>> {
        self.buf.resize(chunk_size, 0);

        loop {
            let step = match self.kill_deadline {
                Some(deadline) => tokio::select! {
                    n = self.stdout.read(&mut self.buf) => Step::Read(n?),
                    () = tokio::time::sleep_until(deadline) => Step::Abandoned,
                },
                None => tokio::select! {
                    n = self.stdout.read(&mut self.buf) => Step::Read(n?),
                    reason = switch.tripped() => Step::Killed(reason),
                },
            };

            match step {
                Step::Killed(reason) => {
                    send_kill(&mut self.child, reason);
                    self.kill_reason = Some(reason);
                    self.kill_deadline = Some(Instant::now() + KILL_GRACE);
                }
                Step::Abandoned => {
                    debug!(pid = ?self.child.id(), "stdout still open after kill, abandoning it");
                    return Ok(None);
                }
                Step::Read(0) => return Ok(None),
                Step::Read(n) => {
                    self.captured.extend_from_slice(&self.buf[..n]);
                    if self.kill_reason == Some(KillReason::Timeout) {
                        // the stream ends in Timeout; nothing more is yielded
                        continue;
                    }
                    trace!(bytes = n, "stdout chunk");
                    return Ok(Some(self.buf[..n].to_vec()));
                }
            }
        }
    }

    /// Wait for exit, collect stderr and record the outcome.
    async fn finish(&mut self, proc: &Proc, mode: ErrorMode) -> Result<()> {
        let (status, reason) = wait_for_exit(&mut self.child, proc.switch(), self.kill_reason).await?;
        let elapsed = self.watchdog.elapsed();

        // the watchdog stays armed so a stderr held open by descendants is bounded too
        let stderr = (&mut self.stderr).await.map_err(io::Error::other)??;
        self.watchdog.disarm();

        let stdout = std::mem::take(&mut self.captured);
        let out = proc.complete(status, reason, stdout, stderr, elapsed, RunMode::Streaming)?;
        proc.check(out, mode).map(|_| ())
    }
}

impl Drop for LiveRun {
    fn drop(&mut self) {
        self.watchdog.disarm();
        if let Ok(None) = self.child.try_wait() {
            debug!(pid = ?self.child.id(), "output stream abandoned, killing child");
            let _ = self.child.start_kill();
        }
        self.stderr.abort();
    }
}

/// Single-pass stream of stdout chunks.
///
/// Holds the handle's execution gate until dropped, so a concurrent
/// [`Proc::block`] waits for the stream to finish and then observes its
/// outcome.
pub struct ContentStream<'a> {
    proc: &'a Proc,
    _gate: MutexGuard<'a, ()>,
    chunk_size: usize,
    mode: ErrorMode,
    cursor: Cursor<'a>,
}

impl<'a> ContentStream<'a> {
    pub(super) fn new(
        proc: &'a Proc,
        gate: MutexGuard<'a, ()>,
        chunk_size: usize,
        cursor: Cursor<'a>,
    ) -> Self {
        Self {
            proc,
            _gate: gate,
            chunk_size,
            mode: ErrorMode::Raise,
            cursor,
        }
    }

    /// Return a non-zero exit as data instead of a final `CommandFailed` item.
    pub fn warn_only(mut self) -> Self {
        self.mode = ErrorMode::WarnOnly;
        self
    }

    /// Maximum bytes per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether this stream replays output captured by a blocking run.
    pub fn is_replay(&self) -> bool {
        matches!(self.cursor, Cursor::Replay { .. })
    }

    /// Whether the stream has ended.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.cursor, Cursor::Done)
    }

    /// Pull the next chunk.
    ///
    /// Yields `Err` at most once, as the final item: `Timeout` when the
    /// watchdog killed the child, `CommandFailed` on non-zero exit (unless
    /// warn-only), or an I/O / spawn error.
    pub async fn next(&mut self) -> Option<Result<Vec<u8>>> {
        loop {
            match &mut self.cursor {
                Cursor::Done => return None,
                Cursor::Replay { data, pos } => {
                    if *pos >= data.len() {
                        self.cursor = Cursor::Done;
                        return None;
                    }
                    let end = (*pos + self.chunk_size).min(data.len());
                    let chunk = data[*pos..end].to_vec();
                    *pos = end;
                    return Some(Ok(chunk));
                }
                Cursor::Pending => match self.proc.start_live() {
                    Ok(run) => self.cursor = Cursor::Live(Box::new(run)),
                    Err(e) => {
                        self.cursor = Cursor::Done;
                        return Some(Err(e));
                    }
                },
                Cursor::Live(run) => {
                    match run.read_chunk(self.chunk_size, self.proc.switch()).await {
                        Ok(Some(chunk)) => return Some(Ok(chunk)),
                        Ok(None) => {
                            let finished = run.finish(self.proc, self.mode).await;
                            self.cursor = Cursor::Done;
                            return finished.err().map(Err);
                        }
                        Err(e) => {
                            self.cursor = Cursor::Done;
                            return Some(Err(e.into()));
                        }
                    }
                }
            }
        }
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>>> + 'a {
        futures_util::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }
}

/// Line separator for [`LineStream`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Delimiter {
    /// `\n`, with an optional preceding `\r` stripped.
    #[default]
    LineBreak,
    /// An arbitrary non-empty byte sequence.
    Bytes(Vec<u8>),
}

impl Delimiter {
    /// Custom delimiter. Fails on an empty sequence.
    pub fn bytes(delimiter: impl Into<Vec<u8>>) -> Result<Self> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(ShcmdError::InvalidArgument("empty delimiter".into()));
        }
        Ok(Delimiter::Bytes(delimiter))
    }

    fn len(&self) -> usize {
        match self {
            Delimiter::LineBreak => 1,
            Delimiter::Bytes(d) => d.len(),
        }
    }
}

/// Incremental splitter that carries partial segments between chunks.
#[derive(Debug, Clone, Default)]
pub struct LineSplitter {
    delimiter: Delimiter,
    pending: Vec<u8>,
    scanned: usize,
}

impl LineSplitter {
    /// Create a splitter for `delimiter`.
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            delimiter,
            pending: Vec::new(),
            scanned: 0,
        }
    }

    /// Append a chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Take the next complete segment, if one is buffered.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let found = match &self.delimiter {
            Delimiter::LineBreak => self.pending[self.scanned..]
                .iter()
                .position(|&b| b == b'\n'),
            Delimiter::Bytes(d) => self.pending[self.scanned..]
                .windows(d.len())
                .position(|w| w == d.as_slice()),
        };

        let Some(offset) = found else {
            self.scanned = self
                .pending
                .len()
                .saturating_sub(self.delimiter.len() - 1);
            return None;
        };

        let start = self.scanned + offset;
        let mut line: Vec<u8> = self.pending.drain(..start + self.delimiter.len()).collect();
        line.truncate(start);
        if self.delimiter == Delimiter::LineBreak && line.last() == Some(&b'\r') {
            line.pop();
        }
        self.scanned = 0;
        Some(line)
    }

    /// Take the trailing segment that had no delimiter after it.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Stream of stdout lines.
pub struct LineStream<'a> {
    content: ContentStream<'a>,
    splitter: LineSplitter,
    deferred: Option<ShcmdError>,
    exhausted: bool,
}

impl<'a> LineStream<'a> {
    pub(super) fn new(content: ContentStream<'a>, delimiter: Delimiter) -> Self {
        Self {
            content,
            splitter: LineSplitter::new(delimiter),
            deferred: None,
            exhausted: false,
        }
    }

    /// Return a non-zero exit as data instead of a final `CommandFailed` item.
    pub fn warn_only(mut self) -> Self {
        self.content = self.content.warn_only();
        self
    }

    /// Pull the next line.
    ///
    /// A pending partial line is yielded before any terminal error.
    pub async fn next(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(line) = self.splitter.next_line() {
                return Some(Ok(decode(line)));
            }
            if self.exhausted {
                if let Some(rest) = self.splitter.finish() {
                    return Some(Ok(decode(rest)));
                }
                return self.deferred.take().map(Err);
            }

            match self.content.next().await {
                Some(Ok(chunk)) => self.splitter.push(&chunk),
                Some(Err(e)) => {
                    self.deferred = Some(e);
                    self.exhausted = true;
                }
                None => self.exhausted = true,
            }
        }
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + 'a {
        futures_util::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }
}

fn decode(line: Vec<u8>) -> String {
    match String::from_utf8(line) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
