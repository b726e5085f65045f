//! Command specification and builder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::args::CommandLine;
use crate::config::ExecutionSection;
use crate::error::ShcmdError;
use crate::Result;

/// Default execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolve a caller-supplied timeout, falling back to [`DEFAULT_TIMEOUT`]
/// for unset or non-positive values.
pub fn resolve_timeout(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(t) if !t.is_zero() => t,
        _ => DEFAULT_TIMEOUT,
    }
}

/// Resolve a timeout given in (possibly fractional, possibly negative) seconds.
pub fn resolve_timeout_secs(secs: f64) -> Duration {
    resolve_timeout(Duration::try_from_secs_f64(secs).ok())
}

/// An immutable, fully resolved command.
///
/// The argument vector is non-empty and the working directory is absolute
/// and canonical once a `CommandSpec` exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    args: Vec<String>,
    cwd: PathBuf,
    env: HashMap<String, String>,
    inherit_env: bool,
    timeout: Duration,
}

impl CommandSpec {
    /// Start building a spec for the given command.
    pub fn builder(cmd: impl Into<CommandLine>) -> CommandSpecBuilder {
        CommandSpecBuilder::new(cmd)
    }

    /// Build a spec with all defaults.
    pub fn new(cmd: impl Into<CommandLine>) -> Result<Self> {
        Self::builder(cmd).build()
    }

    /// The argument vector.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The program (first argument).
    pub fn program(&self) -> &str {
        &self.args[0]
    }

    /// The command joined with spaces, for diagnostics.
    pub fn display_command(&self) -> String {
        self.args.join(" ")
    }

    /// Absolute working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Environment overrides.
    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Whether overrides are merged into the parent environment.
    pub fn inherit_env(&self) -> bool {
        self.inherit_env
    }

    /// Execution deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check the invariants a runnable command must hold.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.args.is_empty() {
            return Err(ShcmdError::InvalidArgument("empty command".into()));
        }
        if !self.cwd.is_dir() {
            return Err(ShcmdError::InvalidArgument(format!(
                "working directory does not exist: {}",
                self.cwd.display()
            )));
        }
        Ok(())
    }
}

/// Builder for [`CommandSpec`].
#[derive(Debug, Clone)]
pub struct CommandSpecBuilder {
    cmd: CommandLine,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
    inherit_env: bool,
    timeout: Option<Duration>,
}

impl CommandSpecBuilder {
    /// Create a new builder.
    pub fn new(cmd: impl Into<CommandLine>) -> Self {
        Self {
            cmd: cmd.into(),
            cwd: None,
            env: HashMap::new(),
            inherit_env: true,
            timeout: None,
        }
    }

    /// Set the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Merge overrides into the parent environment (`true`, the default)
    /// or replace it entirely (`false`).
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Set the execution timeout. A zero duration means the default.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set the execution timeout in seconds. Non-positive means the default.
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout = Some(resolve_timeout_secs(secs));
        self
    }

    /// Apply configured defaults.
    pub fn apply_config(mut self, section: &ExecutionSection) -> Self {
        self.timeout = Some(section.timeout());
        self.inherit_env = section.inherit_env;
        self
    }

    /// Expand the command and resolve the working directory.
    ///
    /// Fails with `InvalidArgument` if the command expands to no arguments
    /// or the working directory cannot be resolved.
    pub fn build(self) -> Result<CommandSpec> {
        let args = self.cmd.expand()?;
        if args.is_empty() {
            return Err(ShcmdError::InvalidArgument("empty command".into()));
        }

        let base = match self.cwd {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => std::env::current_dir()?.join(dir),
            None => std::env::current_dir()?,
        };
        let cwd = base.canonicalize().map_err(|e| {
            ShcmdError::InvalidArgument(format!(
                "cannot resolve working directory {}: {}",
                base.display(),
                e
            ))
        })?;

        Ok(CommandSpec {
            args,
            cwd,
            env: self.env,
            inherit_env: self.inherit_env,
            timeout: resolve_timeout(self.timeout),
        })
    }
}
