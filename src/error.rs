use crate::config::GoDuration;
use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds surfaced by the discovery and reconciliation pipeline.
/// Every variant is fatal to the invocation; `main` prints it on one line.
#[derive(Debug, Error)]
pub enum TaskGenError {
    #[error("{0}")]
    Input(String),

    #[error("parse {path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{command} failed in {dir}: {status}{}", detail(.output))]
    Toolchain {
        command: String,
        dir: PathBuf,
        status: String,
        output: String,
    },

    #[error("go test discovery failed in {dir}: {status}{}", detail(.output))]
    Discovery {
        dir: PathBuf,
        status: String,
        output: String,
    },

    #[error("{command} timed out after {timeout} in {dir}")]
    Timeout {
        command: String,
        dir: PathBuf,
        timeout: GoDuration,
    },

    #[error("malformed document {path}: {message}")]
    MalformedDocument { path: PathBuf, message: String },

    #[error("{0}")]
    Config(String),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TaskGenError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TaskGenError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn input(message: impl Into<String>) -> Self {
        TaskGenError::Input(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        TaskGenError::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TaskGenError>;

/// Tool output folded onto the error line: non-blank lines joined by `; `.
fn detail(output: &str) -> String {
    let folded = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ");
    if folded.is_empty() {
        folded
    } else {
        format!(": {}", folded)
    }
}
