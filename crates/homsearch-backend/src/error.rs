//! Error types for the search backend
//!
//! Errors are split by blast radius. [`JobError`] aborts the whole job,
//! [`StageError`] fails a single query and never escapes the scheduler, and
//! [`ArchiveError`] covers delivery of the primary result files.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for job-level operations
pub type Result<T> = std::result::Result<T, JobError>;

/// Configuration could not be loaded or is inconsistent
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Failures that abort the whole job
#[derive(Error, Debug)]
pub enum JobError {
    #[error("No queries found in input '{0}'")]
    NoQueries(String),

    #[error("Failed to read input '{}': {source}", .path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set up '{}': {source}", .path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("All {0} queries failed")]
    NoSuccessfulQueries(usize),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl JobError {
    pub fn setup(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Setup {
            path: path.into(),
            source,
        }
    }
}

/// Failures of a single query's pipeline
///
/// The `Display` text is the detailed diagnostic written to the job log;
/// [`StageError::summary`] is the short text shown to the end user.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{tool} exited with status {status}: {command}")]
    ToolFailed {
        tool: &'static str,
        status: String,
        command: String,
    },

    #[error("Failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} reported success but did not produce '{}'", .path.display())]
    MissingOutput { tool: &'static str, path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Query length {length} exceeds the covariance limit of {limit}")]
    QueryTooLong { length: usize, limit: usize },

    #[error("Profile of format {format} cannot be used with method {method}")]
    MethodMismatch { format: String, method: String },

    #[error("Invalid query input: {0}")]
    InvalidInput(String),
}

impl StageError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short, user-safe description of the failure
    pub fn summary(&self) -> String {
        match self {
            StageError::ToolFailed { tool, .. } | StageError::ToolLaunch { tool, .. } => {
                format!("{} failed to process the query", tool)
            },
            StageError::MissingOutput { tool, .. } => {
                format!("{} produced no result for the query", tool)
            },
            StageError::Io { .. } => "Query files could not be accessed".to_string(),
            StageError::QueryTooLong { length, limit } => format!(
                "Query length {} exceeds the maximum of {} for this method",
                length, limit
            ),
            StageError::MethodMismatch { format, method } => format!(
                "Input profile ({}) does not match the selected method ({})",
                format, method
            ),
            StageError::InvalidInput(msg) => format!("Invalid query: {}", msg),
        }
    }
}

/// Failures while writing the manifest or the primary archive contents
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to write manifest '{}': {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to add '{}' to the archive: {source}", .path.display())]
    Entry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to finish archive '{}': {source}", .path.display())]
    Finish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_summary_hides_command_line() {
        let err = StageError::ToolFailed {
            tool: "makepro",
            status: "1".to_string(),
            command: "makepro -i /srv/jobs/secret/x.afa -o x.pro".to_string(),
        };
        assert!(err.to_string().contains("/srv/jobs/secret"));
        assert!(!err.summary().contains("/srv/jobs/secret"));
        assert_eq!(err.summary(), "makepro failed to process the query");
    }

    #[test]
    fn test_query_too_long_summary() {
        let err = StageError::QueryTooLong {
            length: 1200,
            limit: 1000,
        };
        assert!(err.summary().contains("1200"));
        assert!(err.summary().contains("1000"));
    }
}
