//! Command execution engine.
//!
//! This module provides the process execution core:
//! - Argument expansion (shell-quoted line or pre-split vector)
//! - Blocking execution with concurrent pipe draining
//! - Pull-based streaming of stdout in chunks or lines
//! - A cancellable timeout watchdog per command
//!
//! # Example
//!
//! ```no_run
//! use shcmd::execution::{CommandSpec, Delimiter, Proc};
//! use std::time::Duration;
//!
//! # async fn demo() -> shcmd::Result<()> {
//! // Blocking
//! let proc = shcmd::run("ls -la /tmp").await?;
//! println!("{}", proc.stdout()?);
//!
//! // Streaming, line by line
//! let spec = CommandSpec::builder("ping -c 3 localhost")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//! let proc = Proc::open(spec)?;
//! let mut lines = proc.iter_lines(1024, Delimiter::LineBreak).await?;
//! while let Some(line) = lines.next().await {
//!     println!("{}", line?);
//! }
//! # Ok(())
//! # }
//! ```

mod args;
mod command;
mod process;
mod result;
mod state;
mod stream;
mod watchdog;

pub use args::{expand_args, CommandLine};
pub use command::{
    resolve_timeout, resolve_timeout_secs, CommandSpec, CommandSpecBuilder, DEFAULT_TIMEOUT,
};
pub use process::{run, run_with_timeout, Proc};
pub use result::{Output, RunMode};
pub use state::ProcState;
pub use stream::{ContentStream, Delimiter, LineSplitter, LineStream, DEFAULT_CHUNK_SIZE};
pub use watchdog::{KillReason, KillSwitch, Watchdog, KILL_GRACE};
