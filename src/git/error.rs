//! Git error types.

use std::fmt;

/// Everything that can go wrong while shelling out to `git` or interpreting
/// its output.
#[derive(Debug)]
pub enum GitError {
    /// A `git` invocation exited non-zero. Carries enough to reproduce it.
    CommandFailed {
        command: String,
        stderr: String,
    },
    /// `git` could not even be spawned (not on PATH, permission denied, ...).
    SpawnFailed {
        command: String,
        error: String,
    },
    /// Output from `git` could not be interpreted the way a caller expected.
    ParseError(String),
    /// A ref string was neither a resolvable ref nor a valid, live 40-hex SHA.
    BadRef { repo: String, ref_: String },
}

impl GitError {
    pub(crate) fn command_failed(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        GitError::CommandFailed {
            command: command.into(),
            stderr: stderr.into(),
        }
    }
}

impl fmt::Display for GitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitError::CommandFailed { command, stderr } => {
                write!(f, "`{command}` failed: {}", stderr.trim())
            }
            GitError::SpawnFailed { command, error } => {
                write!(f, "failed to run `{command}`: {error}")
            }
            GitError::ParseError(msg) => write!(f, "{msg}"),
            GitError::BadRef { repo, ref_ } => {
                write!(f, "{ref_} is an invalid reference for repo {repo}")
            }
        }
    }
}

impl std::error::Error for GitError {}
