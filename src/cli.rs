//! Command-line interface for shcmd.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Command to run. One element is tokenized; several are used verbatim.
    pub command: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Environment overrides.
    pub env: Vec<(String, String)>,
    /// Timeout in seconds.
    pub timeout: Option<f64>,
    /// Stream stdout chunks as they arrive.
    pub stream: bool,
    /// Stream stdout line by line.
    pub lines: bool,
    /// Line delimiter for `--lines`.
    pub delimiter: Option<String>,
    /// Chunk size in bytes for streaming.
    pub chunk_size: Option<usize>,
    /// Do not fail on non-zero exit.
    pub warn_only: bool,
    /// Start the command with only the given environment.
    pub no_inherit_env: bool,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('C') | Long("cwd") => {
                result.cwd = Some(parser.value()?.parse()?);
            }
            Short('e') | Long("env") => {
                let value: String = parser.value()?.parse()?;
                let (key, val) = value
                    .split_once('=')
                    .filter(|(key, _)| !key.is_empty())
                    .ok_or_else(|| ArgsError::InvalidValue("env", value.clone()))?;
                result.env.push((key.to_string(), val.to_string()));
            }
            Short('t') | Long("timeout") => {
                let value: String = parser.value()?.parse()?;
                let secs: f64 = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("timeout", value.clone()))?;
                if !secs.is_finite() {
                    return Err(ArgsError::InvalidValue("timeout", value));
                }
                result.timeout = Some(secs);
            }
            Short('s') | Long("stream") => {
                result.stream = true;
            }
            Short('L') | Long("lines") => {
                result.lines = true;
            }
            Short('d') | Long("delimiter") => {
                let value: String = parser.value()?.parse()?;
                if value.is_empty() {
                    return Err(ArgsError::InvalidValue("delimiter", value));
                }
                result.delimiter = Some(value);
            }
            Short('b') | Long("chunk-size") => {
                let value: String = parser.value()?.parse()?;
                let size: usize = value
                    .parse()
                    .ok()
                    .filter(|&size| size > 0)
                    .ok_or_else(|| ArgsError::InvalidValue("chunk-size", value.clone()))?;
                result.chunk_size = Some(size);
            }
            Short('w') | Long("warn-only") => {
                result.warn_only = true;
            }
            Long("no-inherit-env") => {
                result.no_inherit_env = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                // everything after the program belongs to the command
                result.command.push(val.string()?);
                for raw in parser.raw_args()? {
                    result.command.push(raw.string()?);
                }
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    if result.command.is_empty() && !result.help && !result.version {
        return Err(ArgsError::MissingCommand);
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shcmd {version}
Run a command with a timeout, blocking or streaming its output

USAGE:
    shcmd [OPTIONS] [--] <COMMAND>...

A single COMMAND argument is split with shell quoting rules; several
arguments are passed to the program as-is.

OPTIONS:
    -C, --cwd <DIR>         Working directory [default: current directory]
    -e, --env <KEY=VALUE>   Set an environment variable (repeatable)
    -t, --timeout <SECS>    Kill the command after SECS [default: 60]
    -s, --stream            Stream stdout as it is produced
    -L, --lines             Stream stdout line by line
    -d, --delimiter <STR>   Line delimiter for --lines [default: newline]
    -b, --chunk-size <N>    Bytes per streamed chunk [default: 1024]
    -w, --warn-only         Do not fail on non-zero exit status
        --no-inherit-env    Start the command with only the --env variables
    -c, --config <FILE>     Path to configuration file (JSON)
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT VARIABLES:
    SHCMD_TIMEOUT           Timeout in seconds (overrides config)
    SHCMD_CHUNK_SIZE        Streaming chunk size (overrides config)
    SHCMD_LOG_LEVEL         Log level (overrides config)
    RUST_LOG                Alternative log level setting

EXIT STATUS:
    The command's exit status, 124 on timeout, 2 on usage errors.

EXAMPLES:
    shcmd 'ls -la /tmp'
    shcmd -t 5 --lines -- tail -n 20 /var/log/syslog
    shcmd -C /srv/app -e RUST_LOG=debug -- cargo test
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shcmd {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// No command given.
    MissingCommand,
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::MissingCommand => write!(f, "no command given"),
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
