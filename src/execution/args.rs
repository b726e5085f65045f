//! Argument expansion.
//!
//! Normalizes the ways a caller can spell a command (a shell-quoted line,
//! raw UTF-8 bytes, or an already split argument vector) into one ordered
//! argument vector.

use crate::error::ShcmdError;
use crate::Result;

/// A command as supplied by the caller, before expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Shell-quoted command line.
    Line(String),
    /// Shell-quoted command line as UTF-8 bytes.
    Bytes(Vec<u8>),
    /// Pre-split argument vector, used verbatim.
    Argv(Vec<String>),
}

impl CommandLine {
    /// Expand into an argument vector.
    pub fn expand(&self) -> Result<Vec<String>> {
        match self {
            CommandLine::Argv(argv) => Ok(argv.clone()),
            CommandLine::Line(line) => split_line(line),
            CommandLine::Bytes(bytes) => {
                let line = std::str::from_utf8(bytes).map_err(|e| {
                    ShcmdError::InvalidArgument(format!("command is not valid UTF-8: {}", e))
                })?;
                split_line(line)
            }
        }
    }
}

fn split_line(line: &str) -> Result<Vec<String>> {
    // shlex drops everything after a `#` word; refuse instead of losing arguments
    if starts_comment(line) {
        return Err(ShcmdError::InvalidArgument(format!(
            "unquoted `#` in `{}` would start a comment; quote or escape it",
            line
        )));
    }
    shlex::split(line).ok_or_else(|| {
        ShcmdError::InvalidArgument(format!(
            "unbalanced quoting or dangling escape in `{}`",
            line
        ))
    })
}

/// Whether an unquoted, unescaped `#` begins a word.
fn starts_comment(line: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut word_start = true;

    for c in line.chars() {
        if escaped {
            escaped = false;
        } else {
            match (quote, c) {
                (Some('\''), '\'') => quote = None,
                (Some('\''), _) => {}
                (Some(_), '\\') | (None, '\\') => escaped = true,
                (Some(_), '"') => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, '#') if word_start => return true,
                (None, ' ' | '\t' | '\n') => {
                    word_start = true;
                    continue;
                }
                (None, _) => {}
            }
        }
        word_start = false;
    }
    false
}

/// Expand a command specification into an ordered argument vector.
///
/// Strings and byte strings are tokenized with POSIX shell-word rules;
/// sequences are copied as-is. An empty line yields an empty vector.
/// Comments are not supported: a word starting with an unquoted `#`
/// fails with `InvalidArgument`.
pub fn expand_args(cmd: impl Into<CommandLine>) -> Result<Vec<String>> {
    cmd.into().expand()
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        CommandLine::Line(line.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(line: String) -> Self {
        CommandLine::Line(line)
    }
}

impl From<&String> for CommandLine {
    fn from(line: &String) -> Self {
        CommandLine::Line(line.clone())
    }
}

impl From<&[u8]> for CommandLine {
    fn from(bytes: &[u8]) -> Self {
        CommandLine::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for CommandLine {
    fn from(bytes: &[u8; N]) -> Self {
        CommandLine::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for CommandLine {
    fn from(bytes: Vec<u8>) -> Self {
        CommandLine::Bytes(bytes)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(argv: Vec<String>) -> Self {
        CommandLine::Argv(argv)
    }
}

impl From<Vec<&str>> for CommandLine {
    fn from(argv: Vec<&str>) -> Self {
        CommandLine::Argv(argv.into_iter().map(String::from).collect())
    }
}

impl From<&[&str]> for CommandLine {
    fn from(argv: &[&str]) -> Self {
        CommandLine::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&[String]> for CommandLine {
    fn from(argv: &[String]) -> Self {
        CommandLine::Argv(argv.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(argv: [&str; N]) -> Self {
        CommandLine::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}
