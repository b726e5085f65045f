//! shcmd binary entry point.

use std::process::ExitCode;

use shcmd::cli::{self, Args};
use shcmd::config::Config;
use shcmd::execution::{CommandLine, CommandSpec, Delimiter, Proc};
use shcmd::{logging, ShcmdError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

/// Exit status reported when the command timed out, as timeout(1) does.
const EXIT_TIMEOUT: u8 = 124;
const EXIT_USAGE: u8 = 2;
const EXIT_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("shcmd: {}", e);
            eprintln!("Try 'shcmd --help' for more information.");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shcmd: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    logging::init_with_filter(config.log_filter()).ok();
    debug!(?config, "configuration loaded");

    match execute(&args, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("shcmd: {}", e);
            ExitCode::from(exit_status_for(&e))
        }
    }
}

async fn execute(args: &Args, config: &Config) -> shcmd::Result<u8> {
    let command = match args.command.as_slice() {
        [line] => CommandLine::from(line),
        argv => CommandLine::from(argv),
    };

    let mut builder = CommandSpec::builder(command)
        .apply_config(&config.execution)
        .envs(args.env.iter().cloned());
    if let Some(ref cwd) = args.cwd {
        builder = builder.cwd(cwd);
    }
    let proc = Proc::open(builder.build()?)?;
    let warn_only = config.execution.warn_only;
    let chunk_size = config.execution.chunk_size;

    if args.lines {
        let delimiter = match args.delimiter {
            Some(ref d) => Delimiter::bytes(d.as_str())?,
            None => Delimiter::LineBreak,
        };
        let mut lines = proc.iter_lines(chunk_size, delimiter).await?;
        if warn_only {
            lines = lines.warn_only();
        }
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines.next().await {
            stdout.write_all(line?.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    } else if args.stream {
        let mut chunks = proc.iter_content(chunk_size).await?;
        if warn_only {
            chunks = chunks.warn_only();
        }
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = chunks.next().await {
            stdout.write_all(&chunk?).await?;
            stdout.flush().await?;
        }
    } else {
        let output = if warn_only {
            proc.block_warn_only().await?
        } else {
            proc.block().await?
        };
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&output.stdout).await?;
        stdout.flush().await?;
    }

    let output = proc.output()?;
    let mut stderr = tokio::io::stderr();
    stderr.write_all(&output.stderr).await?;
    stderr.flush().await?;

    Ok(clamp_exit_code(output.exit_code))
}

fn clamp_exit_code(code: i32) -> u8 {
    match u8::try_from(code) {
        Ok(code) => code,
        // killed by signal N: report 128 + N like a shell
        Err(_) if code < 0 => 128u8.saturating_add(u8::try_from(-code).unwrap_or(u8::MAX)),
        Err(_) => EXIT_FAILURE,
    }
}

fn exit_status_for(err: &ShcmdError) -> u8 {
    match err {
        ShcmdError::Timeout { .. } => EXIT_TIMEOUT,
        ShcmdError::CommandFailed { exit_code, stderr, .. } => {
            eprint!("{}", stderr);
            clamp_exit_code(*exit_code)
        }
        ShcmdError::InvalidArgument(_) => EXIT_USAGE,
        other => {
            error!(error = %other, "command could not be run");
            EXIT_FAILURE
        }
    }
}
