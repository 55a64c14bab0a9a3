//! Error taxonomy for a clone run.
//!
//! Every failure in the library surfaces as a [`CloneError`] and travels back
//! to `main`, which is the only place that turns it into a process exit code.

use std::fmt;
use std::path::PathBuf;

use crate::rewrite::RewriteError;

/// Exit code used when `mysqldump` or `mysql` cannot be located.
pub const EXIT_TOOLS_NOT_FOUND: i32 = 1;
/// Exit code used when restore-only mode points at a dump file that is missing.
pub const EXIT_MISSING_DUMP_FILE: i32 = 2;
/// Exit code for configuration and local I/O problems.
pub const EXIT_GENERAL_FAILURE: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error(
        "Unable to find {}. Either ensure they are in your path or set the MYSQL_BIN environment variable to the path in which they can be found",
        missing.join(" and ")
    )]
    ToolNotFound { missing: Vec<String> },

    #[error("dump file not found at {}", path.display())]
    MissingDumpFile { path: PathBuf },

    #[error("{0}")]
    ChildProcess(ChildFailure),

    #[error(transparent)]
    RewriteConfiguration(#[from] RewriteError),

    #[error("invalid configuration:\n  {}", problems.join("\n  "))]
    Config { problems: Vec<String> },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CloneError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CloneError::Io {
            context: context.into(),
            source,
        }
    }

    /// The exit code this error maps to. Child failures pass the tool's own
    /// code through untouched.
    pub fn exit_code(&self) -> i32 {
        match self {
            CloneError::ToolNotFound { .. } => EXIT_TOOLS_NOT_FOUND,
            CloneError::MissingDumpFile { .. } => EXIT_MISSING_DUMP_FILE,
            CloneError::ChildProcess(failure) => failure.code,
            CloneError::RewriteConfiguration(_)
            | CloneError::Config { .. }
            | CloneError::Io { .. } => EXIT_GENERAL_FAILURE,
        }
    }
}

/// A spawned tool that exited non-zero, with everything captured from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildFailure {
    pub code: i32,
    /// The exact command line that was invoked.
    pub command: String,
    pub stderr: Vec<String>,
    /// Most recent stdout lines, when stdout was captured.
    pub output: Vec<String>,
}

impl fmt::Display for ChildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.stderr {
            writeln!(f, "{line}")?;
        }
        for line in &self.output {
            writeln!(f, "ERR: {line}")?;
        }
        write!(f, "Command was: {}", self.command)
    }
}

impl From<ChildFailure> for CloneError {
    fn from(failure: ChildFailure) -> Self {
        CloneError::ChildProcess(failure)
    }
}

pub type Result<T> = std::result::Result<T, CloneError>;
