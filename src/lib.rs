//! # shcmd
//!
//! Run external commands with a wall-clock timeout and consume their
//! output either as one blocking result or as an incremental stream.
//!
//! ## Features
//!
//! - **Blocking or streaming**: await the full result, or pull stdout in
//!   chunks or lines as the child produces it
//! - **Timeouts**: a per-command watchdog kills the child at its deadline
//! - **Coherent state**: output accessors fail fast until the command has
//!   finished, and a handle never spawns its child twice
//!
//! ## Quick Start
//!
//! ```no_run
//! use shcmd::{CommandSpec, Proc};
//!
//! #[tokio::main]
//! async fn main() -> shcmd::Result<()> {
//!     shcmd::logging::try_init().ok();
//!
//!     let proc = Proc::open(CommandSpec::new("echo hello")?)?;
//!     let output = proc.block().await?;
//!     assert!(output.ok());
//!     println!("{}", proc.stdout()?);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod scope;

// Re-export commonly used types
pub use error::{Result, ShcmdError};
pub use execution::{
    expand_args, run, run_with_timeout, CommandLine, CommandSpec, ContentStream, Delimiter,
    LineStream, Output, Proc, ProcState, DEFAULT_TIMEOUT,
};
pub use scope::{in_dir, DirGuard};
