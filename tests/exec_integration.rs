//! Process execution integration tests.
//!
//! These tests spawn real commands and exercise blocking and streaming
//! consumption, timeouts and the one-spawn-per-handle guarantee.

#![cfg(unix)]

use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use shcmd::execution::RunMode;
use shcmd::{CommandSpec, Delimiter, Proc, ProcState, ShcmdError};

fn open(cmd: &str) -> Proc {
    Proc::open(CommandSpec::new(cmd).unwrap()).unwrap()
}

fn open_with_timeout(cmd: &str, timeout: Duration) -> Proc {
    let spec = CommandSpec::builder(cmd).timeout(timeout).build().unwrap();
    Proc::open(spec).unwrap()
}

fn populated_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    for name in ["alpha.txt", "beta.txt", "gamma.txt"] {
        std::fs::write(dir.path().join(name), name).unwrap();
    }
    dir
}

async fn collect(proc: &Proc, chunk_size: usize) -> (Vec<Vec<u8>>, Option<ShcmdError>) {
    let mut stream = proc.iter_content(chunk_size).await.unwrap();
    let mut chunks = Vec::new();
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => error = Some(e),
        }
    }
    (chunks, error)
}

// ============================================================================
// Blocking Execution Tests
// ============================================================================

#[tokio::test]
async fn test_block_lists_directory() {
    let dir = populated_dir();
    let cmd = format!("ls {}", dir.path().display());
    let proc = open(&cmd);

    let out = proc.block().await.unwrap();
    assert_eq!(out.lines(), vec!["alpha.txt", "beta.txt", "gamma.txt"]);
    assert_eq!(out.exit_code, 0);
    assert_eq!(proc.state(), ProcState::Finished);
}

#[tokio::test]
async fn test_block_is_idempotent() {
    let proc = open("echo once");

    let first = assert_ok!(proc.block().await).stdout.clone();
    let second = assert_ok!(proc.block().await).stdout.clone();

    assert_eq!(first, second);
    assert_eq!(proc.spawn_count(), 1);
}

#[tokio::test]
async fn test_concurrent_blocks_spawn_once() {
    let proc = open("sh -c 'sleep 0.1; echo done'");

    let (a, b) = tokio::join!(proc.block(), proc.block());

    assert_eq!(a.unwrap().stdout, b"done\n");
    assert_eq!(b.unwrap().stdout, b"done\n");
    assert_eq!(proc.spawn_count(), 1);
}

#[tokio::test]
async fn test_run_helper() {
    let proc = shcmd::run("echo 上海崇明岛").await.unwrap();
    assert_eq!(proc.stdout().unwrap(), "上海崇明岛\n");

    let proc = shcmd::run(vec!["printf", "%s", "a b"]).await.unwrap();
    assert_eq!(proc.content().unwrap(), b"a b");
}

#[tokio::test]
async fn test_nonzero_exit_raises() {
    let proc = open("ls /nonexistent-shcmd-path");

    let err = assert_err!(proc.block().await);
    match err {
        ShcmdError::CommandFailed {
            exit_code, stderr, ..
        } => {
            assert_ne!(exit_code, 0);
            assert!(!stderr.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // the outcome is still recorded
    assert_eq!(proc.state(), ProcState::Finished);
    assert!(!proc.ok());
    assert_err!(proc.raise_for_error());
}

#[tokio::test]
async fn test_nonzero_exit_warn_only() {
    let proc = open("sh -c 'echo partial; echo oops >&2; exit 3'");

    let out = proc.block_warn_only().await.unwrap();
    assert!(!out.ok());
    assert_eq!(out.exit_code, 3);
    assert_eq!(out.stdout, b"partial\n");
    assert_eq!(out.stderr, b"oops\n");
    assert_eq!(proc.exit_code().unwrap(), 3);
}

#[tokio::test]
async fn test_large_output_on_both_pipes() {
    let proc = open("sh -c 'head -c 200000 /dev/zero; head -c 200000 /dev/zero >&2'");

    let out = proc.block().await.unwrap();
    assert_eq!(out.stdout.len(), 200_000);
    assert_eq!(out.stderr.len(), 200_000);
}

#[tokio::test]
async fn test_stdin_is_closed() {
    let proc = open_with_timeout("cat", Duration::from_secs(5));

    let out = proc.block().await.unwrap();
    assert!(out.stdout.is_empty());
}

// ============================================================================
// Timeout Tests
// ============================================================================

#[tokio::test]
async fn test_block_timeout() {
    let proc = open_with_timeout("sleep 5", Duration::from_millis(100));

    let err = proc.block().await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(proc.state(), ProcState::TimedOut);

    let out = proc.output().unwrap();
    assert!(out.is_timed_out());
    assert!(out.elapsed < Duration::from_secs(3));

    // terminal state is absorbing
    assert!(proc.block().await.unwrap_err().is_timeout());
    assert_eq!(proc.spawn_count(), 1);
}

#[tokio::test]
async fn test_run_with_timeout_helper() {
    let err = shcmd::run_with_timeout("sleep 5", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, ShcmdError::Timeout { .. }));
}

#[tokio::test]
async fn test_stream_timeout() {
    let proc = open_with_timeout("sh -c 'echo early; exec sleep 5'", Duration::from_millis(200));

    let (chunks, error) = collect(&proc, 64).await;
    assert_eq!(chunks.concat(), b"early\n");
    assert!(error.unwrap().is_timeout());
    assert_eq!(proc.state(), ProcState::TimedOut);
    assert!(proc.output().unwrap().elapsed < Duration::from_secs(3));
}

#[tokio::test]
async fn test_block_timeout_with_descendant_holding_pipes() {
    // without exec the shell forks, so `sleep` keeps both pipes open after the kill
    let proc = open_with_timeout("sh -c 'sleep 3; true'", Duration::from_millis(100));

    let started = std::time::Instant::now();
    let err = assert_err!(proc.block().await);
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(proc.state(), ProcState::TimedOut);
    assert!(proc.output().unwrap().elapsed < Duration::from_secs(1));
}

#[tokio::test]
async fn test_stream_timeout_with_descendant_holding_pipes() {
    let proc = open_with_timeout("sh -c 'echo early; sleep 3; true'", Duration::from_millis(200));

    let started = std::time::Instant::now();
    let (chunks, error) = collect(&proc, 64).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(chunks.concat(), b"early\n");
    assert!(error.unwrap().is_timeout());
    assert_eq!(proc.state(), ProcState::TimedOut);
}

#[tokio::test]
async fn test_exited_child_with_background_descendant_is_bounded() {
    // the shell exits at once; the background sleep inherits stdout and stderr
    let proc = open_with_timeout("sh -c 'echo ready; sleep 3 &'", Duration::from_millis(200));

    let started = std::time::Instant::now();
    let out = assert_ok!(proc.block().await);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(out.stdout, b"ready\n");
    assert_eq!(proc.state(), ProcState::Finished);
}

#[tokio::test]
async fn test_iter_after_blocking_timeout() {
    let proc = open_with_timeout("sleep 5", Duration::from_millis(100));
    proc.block().await.unwrap_err();

    let err = proc.iter_content(16).await.err().unwrap();
    assert!(err.is_timeout());
}

// ============================================================================
// Streaming Tests
// ============================================================================

#[tokio::test]
async fn test_stream_matches_block_output() {
    let dir = populated_dir();
    let cmd = format!("ls -la {}", dir.path().display());

    let blocking = open(&cmd);
    let expected = blocking.block().await.unwrap().stdout.clone();

    let streaming = open(&cmd);
    let (chunks, error) = collect(&streaming, 7).await;
    assert!(error.is_none());
    assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 7));
    assert_eq!(chunks.concat(), expected);

    let out = streaming.output().unwrap();
    assert_eq!(out.mode, RunMode::Streaming);
    assert_eq!(out.stdout, expected);
}

#[tokio::test]
async fn test_stream_spawns_lazily() {
    let proc = open("echo lazy");

    let mut stream = proc.iter_content(1024).await.unwrap();
    assert_eq!(proc.spawn_count(), 0);
    assert_eq!(proc.state(), ProcState::NotStarted);

    let chunk = stream.next().await.unwrap().unwrap();
    assert_eq!(chunk, b"lazy\n");
    assert_eq!(proc.spawn_count(), 1);

    assert!(stream.next().await.is_none());
    assert!(stream.is_exhausted());
    drop(stream);
    assert_eq!(proc.state(), ProcState::Finished);
}

#[tokio::test]
async fn test_replay_after_block() {
    let proc = open("printf 0123456789");
    proc.block().await.unwrap();

    let mut stream = proc.iter_content(4).await.unwrap();
    assert!(stream.is_replay());
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.unwrap());
    }
    assert_eq!(chunks, vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]);
    drop(stream);

    // replay can be repeated; nothing is spawned again
    let (again, _) = collect(&proc, 100).await;
    assert_eq!(again.concat(), b"0123456789");
    assert_eq!(proc.spawn_count(), 1);
}

#[tokio::test]
async fn test_second_stream_is_consumed() {
    let proc = open("echo single");
    let (chunks, _) = collect(&proc, 1024).await;
    assert_eq!(chunks.concat(), b"single\n");

    let err = proc.iter_content(1024).await.err().unwrap();
    assert!(matches!(err, ShcmdError::AlreadyConsumed));

    // block observes the streamed outcome
    let out = proc.block().await.unwrap();
    assert_eq!(out.stdout, b"single\n");
    assert_eq!(proc.spawn_count(), 1);
}

#[tokio::test]
async fn test_stream_failure_is_last_item() {
    let proc = open("sh -c 'echo out; exit 4'");
    let (chunks, error) = collect(&proc, 1024).await;
    assert_eq!(chunks.concat(), b"out\n");
    assert_eq!(error.unwrap().exit_code(), Some(4));

    let proc = open("sh -c 'echo out; exit 4'");
    let mut stream = proc.iter_content(1024).await.unwrap().warn_only();
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item.unwrap());
    }
    drop(stream);
    assert_eq!(items.concat(), b"out\n");
    assert_eq!(proc.exit_code().unwrap(), 4);
}

#[tokio::test]
async fn test_abandoned_stream() {
    let proc = open("sh -c 'echo first; exec sleep 5'");

    let mut stream = proc.iter_content(1024).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, b"first\n");
    drop(stream);

    assert_eq!(proc.state(), ProcState::Running);
    assert!(matches!(
        proc.output(),
        Err(ShcmdError::AccessNotReady(ProcState::Running))
    ));
    assert!(matches!(
        proc.block().await,
        Err(ShcmdError::AlreadyConsumed)
    ));
    assert!(matches!(
        proc.iter_content(1024).await.err(),
        Some(ShcmdError::AlreadyConsumed)
    ));
    assert_eq!(proc.spawn_count(), 1);
}

#[tokio::test]
async fn test_kill_while_streaming() {
    let proc = open("sh -c 'echo first; exec sleep 5'");

    let mut stream = proc.iter_content(1024).await.unwrap().warn_only();
    assert_eq!(stream.next().await.unwrap().unwrap(), b"first\n");
    proc.kill();
    assert!(stream.next().await.is_none());
    drop(stream);

    assert_eq!(proc.state(), ProcState::Finished);
    assert_eq!(proc.exit_code().unwrap(), -libc::SIGKILL);
}

#[tokio::test]
async fn test_into_stream_adapter() {
    let proc = open("printf abcdef");
    let chunks: Vec<Vec<u8>> = proc
        .iter_content(2)
        .await
        .unwrap()
        .into_stream()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(chunks, vec![b"ab".to_vec(), b"cd".to_vec(), b"ef".to_vec()]);
}

// ============================================================================
// Line Streaming Tests
// ============================================================================

#[tokio::test]
async fn test_iter_lines_default_delimiter() {
    let proc = open("printf 'one\\ntwo\\r\\nthree'");

    let mut lines = proc.iter_lines(3, Delimiter::LineBreak).await.unwrap();
    let mut collected = Vec::new();
    while let Some(line) = lines.next().await {
        collected.push(line.unwrap());
    }
    assert_eq!(collected, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_iter_lines_custom_delimiter() {
    let proc = open("printf 'a::b::::c'");
    let delimiter = Delimiter::bytes("::").unwrap();

    let lines: Vec<String> = proc
        .iter_lines(1, delimiter)
        .await
        .unwrap()
        .into_stream()
        .map(|line| line.unwrap())
        .collect()
        .await;
    assert_eq!(lines, vec!["a", "b", "", "c"]);
}

#[tokio::test]
async fn test_iter_lines_yields_partial_line_before_error() {
    let proc = open("sh -c 'printf tail; exit 1'");

    let mut lines = proc.iter_lines(1024, Delimiter::LineBreak).await.unwrap();
    assert_eq!(lines.next().await.unwrap().unwrap(), "tail");
    assert!(matches!(
        lines.next().await,
        Some(Err(ShcmdError::CommandFailed { exit_code: 1, .. }))
    ));
    assert!(lines.next().await.is_none());
}

// ============================================================================
// Environment and Working Directory Tests
// ============================================================================

#[tokio::test]
async fn test_env_merged_with_parent() {
    let spec = CommandSpec::builder("sh -c 'echo $SHCMD_TEST_VALUE'")
        .env("SHCMD_TEST_VALUE", "merged")
        .build()
        .unwrap();
    let proc = Proc::open(spec).unwrap();

    let out = proc.block().await.unwrap();
    assert_eq!(out.stdout_trimmed(), "merged");
}

#[tokio::test]
async fn test_env_replaces_parent() {
    let spec = CommandSpec::builder("/usr/bin/env")
        .env("ONLY_VAR", "1")
        .inherit_env(false)
        .build()
        .unwrap();
    let proc = Proc::open(spec).unwrap();

    let out = proc.block().await.unwrap();
    assert_eq!(out.lines(), vec!["ONLY_VAR=1"]);
}

#[tokio::test]
async fn test_cwd_is_used() {
    let dir = TempDir::new().unwrap();
    let spec = CommandSpec::builder("pwd -P")
        .cwd(dir.path())
        .build()
        .unwrap();
    let proc = Proc::open(spec).unwrap();

    let out = proc.block().await.unwrap();
    assert_eq!(
        out.stdout_trimmed(),
        dir.path().canonicalize().unwrap().to_str().unwrap()
    );
}

#[test]
fn test_invalid_commands() {
    let err = CommandSpec::builder("ls")
        .cwd("/nonexistent-shcmd-dir")
        .build()
        .unwrap_err();
    assert!(matches!(err, ShcmdError::InvalidArgument(_)));

    let err = CommandSpec::new("").unwrap_err();
    assert!(matches!(err, ShcmdError::InvalidArgument(_)));

    let err = CommandSpec::new("echo #note").unwrap_err();
    assert!(matches!(err, ShcmdError::InvalidArgument(_)));

    let err = CommandSpec::new("echo 'unbalanced").unwrap_err();
    assert!(matches!(err, ShcmdError::InvalidArgument(_)));
}
