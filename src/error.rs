//! Error types for the scheduler and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("failed to write store snapshot '{}': {source}", path.display())]
    Snapshot {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode store snapshot: {0}")]
    Encoding(#[from] serde_json::Error),
    /// Failure reported by a backend other than
    /// [`MemoryStorage`](crate::storage::MemoryStorage)
    #[error("storage backend error: {message}")]
    Backend { message: String },
}

/// Errors from [`Trigger`](crate::trigger::Trigger) implementations.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("no trigger registered for type '{name}'")]
    UnknownType { name: String },
    #[error("trigger config error: {message}")]
    Config { message: String },
    #[error("trigger runtime error: {message}")]
    Runtime { message: String },
}

/// Errors a [`Processor`](crate::execution::Processor) may return from a run.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("instruction '{instruction}' failed: {message}")]
    Instruction { instruction: String, message: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("processor task panicked: {message}")]
    Panicked { message: String },
}

/// Errors surfaced by the scheduler's public operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid workflow: {message}")]
    InvalidWorkflow { message: String },
    #[error("execution {id} not found")]
    ExecutionNotFound { id: u64 },
    #[error("scheduler has shut down")]
    ShutDown,
}

/// Errors from loading a workflow definitions file.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read definitions file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write definitions file '{path}': {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse definitions YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("definitions failed validation:\n{}", render_list(.0))]
    Invalid(Vec<crate::workflow::validator::ValidationError>),
}

fn render_list(errors: &[crate::workflow::validator::ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::validator::ValidationError;

    #[test]
    fn test_storage_not_found_message() {
        let err = StorageError::NotFound {
            entity: "execution",
            id: 7,
        };
        assert_eq!(err.to_string(), "execution 7 not found");
    }

    #[test]
    fn test_scheduler_error_wraps_storage() {
        let err: SchedulerError = StorageError::Backend {
            message: "down".into(),
        }
        .into();
        assert!(matches!(err, SchedulerError::Storage(_)));
        assert_eq!(err.to_string(), "storage backend error: down");
    }

    #[test]
    fn test_definition_error_lists_every_problem() {
        let err = DefinitionError::Invalid(vec![
            ValidationError::EmptyKey { index: 0 },
            ValidationError::DuplicateId(3),
        ]);
        let text = err.to_string();
        assert!(text.contains("definition #0 has no key"));
        assert!(text.contains("Duplicate workflow id: 3"));
    }
}
