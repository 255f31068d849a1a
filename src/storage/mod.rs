//! Storage Capability
//!
//! The scheduler does not own persistence. It talks to a [`Storage`]
//! backend through short, synchronous transactions that are either
//! committed as a whole or rolled back by dropping them.
//!
//! - [`memory`]: in-process backend with an optional JSON snapshot file
//! - [`repository`]: hook-aware wrapper that fires workflow save hooks and
//!   change notifications around those transactions

pub mod memory;
pub mod repository;

use crate::error::StorageError;
use crate::execution::{Execution, ExecutionFilter, ExecutionStatus, Job};
use crate::workflow::{Workflow, WorkflowFilter};

pub use memory::MemoryStorage;
pub use repository::{ChangeObserver, Repository, SaveHooks, UnitOfWork, WriteMode};

/// A transactional store for workflow, execution and job rows.
pub trait Storage: Send + Sync {
    /// Opens a transaction. Dropping it without [`Transaction::commit`]
    /// discards every write made through it.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError>;
}

/// Reads and writes scoped to one open transaction.
pub trait Transaction {
    fn find_workflows(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StorageError>;

    fn count_workflows(&self, filter: &WorkflowFilter) -> Result<usize, StorageError> {
        Ok(self.find_workflows(filter)?.len())
    }

    fn get_workflow(&self, id: u64) -> Result<Option<Workflow>, StorageError>;

    /// Inserts a workflow, assigning an id when `workflow.id` is `0`.
    fn insert_workflow(&mut self, workflow: &mut Workflow) -> Result<(), StorageError>;

    fn update_workflow(&mut self, workflow: &Workflow) -> Result<(), StorageError>;

    fn delete_workflow(&mut self, id: u64) -> Result<Option<Workflow>, StorageError>;

    /// Returns matching executions ordered by creation time, oldest first.
    fn find_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StorageError>;

    fn count_executions(&self, filter: &ExecutionFilter) -> Result<usize, StorageError> {
        let unlimited = ExecutionFilter {
            limit: None,
            ..filter.clone()
        };
        Ok(self.find_executions(&unlimited)?.len())
    }

    fn get_execution(&self, id: u64) -> Result<Option<Execution>, StorageError>;

    /// Inserts an execution, assigning its id.
    fn insert_execution(&mut self, execution: &mut Execution) -> Result<(), StorageError>;

    fn set_execution_status(&mut self, id: u64, status: ExecutionStatus)
        -> Result<(), StorageError>;

    fn get_job(&self, id: u64) -> Result<Option<Job>, StorageError>;

    /// Inserts a job when `job.id` is `0`, updates it otherwise.
    fn save_job(&mut self, job: &mut Job) -> Result<(), StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;
}
