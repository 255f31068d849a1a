//! Execution and Job records
//!
//! An [`Execution`] is one run of a workflow, created by a trigger firing.
//! A [`Job`] is the checkpoint of a suspended instruction inside a run and
//! is consumed once when the run is resumed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::Workflow;

/// Lifecycle status of an execution.
///
/// The scheduler owns `Created -> Started`; every other transition is
/// written by the processor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Persisted, waiting to be dispatched
    Created,
    /// Dispatched at least once (running or suspended)
    Started,
    /// Finished successfully
    Resolved,
    /// An instruction failed
    Failed,
    /// The processor itself errored or panicked
    Error,
    /// Stopped by an instruction
    Aborted,
    /// Cancelled from outside
    Canceled,
    /// Rejected by an approval step
    Rejected,
}

impl ExecutionStatus {
    /// Returns true for statuses that end a run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::Started)
    }
}

/// One concrete run of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Execution {
    pub id: u64,
    pub workflow_id: u64,
    pub key: String,

    /// Trigger payload, arbitrary shape
    pub context: Value,

    pub status: ExecutionStatus,

    /// Frozen copy of the workflow's flag at creation time
    pub use_transaction: bool,

    /// Execution id the firing claimed to belong to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_execution_id: Option<u64>,

    pub created_at: DateTime<Utc>,

    /// Workflow attached in memory to spare the processor a reload
    #[serde(skip)]
    pub workflow: Option<Workflow>,
}

impl Execution {
    /// Builds an unsaved execution for `workflow`.
    pub fn new(workflow: &Workflow, context: Value) -> Self {
        Self {
            id: 0,
            workflow_id: workflow.id,
            key: workflow.key.clone(),
            context,
            status: ExecutionStatus::Created,
            use_transaction: workflow.use_transaction,
            origin_execution_id: None,
            created_at: Utc::now(),
            workflow: None,
        }
    }

    /// Records the execution id the firing claimed to belong to.
    pub fn with_origin(mut self, origin: Option<u64>) -> Self {
        self.origin_execution_id = origin;
        self
    }

    /// Returns a copy without the in-memory workflow attachment.
    pub fn detached(&self) -> Self {
        Self {
            workflow: None,
            ..self.clone()
        }
    }
}

/// Status of a suspended instruction.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Resolved,
    Failed,
    Error,
}

/// Resumable checkpoint of one suspended instruction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub id: u64,
    pub execution_id: u64,

    /// Name of the instruction that suspended
    pub instruction: String,

    pub status: JobStatus,

    /// Result delivered by the external event that completes the job
    #[serde(default)]
    pub result: Value,

    pub created_at: DateTime<Utc>,

    /// Owning execution, resolved lazily on resume
    #[serde(skip)]
    pub execution: Option<Execution>,
}

impl Job {
    /// Builds an unsaved pending job for `execution_id`.
    pub fn new(execution_id: u64, instruction: impl Into<String>) -> Self {
        Self {
            id: 0,
            execution_id,
            instruction: instruction.into(),
            status: JobStatus::Pending,
            result: Value::Null,
            created_at: Utc::now(),
            execution: None,
        }
    }

    /// Completes the job with a result.
    pub fn resolve(mut self, result: Value) -> Self {
        self.status = JobStatus::Resolved;
        self.result = result;
        self
    }
}

/// Row filter for execution queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionFilter {
    pub workflow_id: Option<u64>,
    pub key: Option<String>,
    pub status: Option<ExecutionStatus>,

    /// Matches an execution whose id or origin equals this value
    pub related_to: Option<u64>,

    /// Executions left out of the result
    pub exclude_ids: Vec<u64>,

    /// Maximum number of rows to return
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    /// Executions of a single workflow version.
    pub fn for_workflow(workflow_id: u64) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            ..Self::default()
        }
    }

    /// Executions of every version sharing `key`.
    pub fn for_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// The oldest execution still waiting to be dispatched.
    pub fn oldest_created() -> Self {
        Self {
            status: Some(ExecutionStatus::Created),
            limit: Some(1),
            ..Self::default()
        }
    }

    /// Restricts to executions created by, or identified by, `execution_id`.
    pub fn related_to(mut self, execution_id: u64) -> Self {
        self.related_to = Some(execution_id);
        self
    }

    /// Leaves the given executions out of the result.
    pub fn excluding(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.exclude_ids.extend(ids);
        self
    }

    /// Returns true if `execution` satisfies every set field (`limit` aside).
    pub fn matches(&self, execution: &Execution) -> bool {
        self.workflow_id
            .map_or(true, |id| execution.workflow_id == id)
            && self.key.as_ref().map_or(true, |key| &execution.key == key)
            && self.status.map_or(true, |status| execution.status == status)
            && self.related_to.map_or(true, |id| {
                execution.id == id || execution.origin_execution_id == Some(id)
            })
            && !self.exclude_ids.contains(&execution.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow() -> Workflow {
        Workflow::new("k1", "interval")
            .with_id(3)
            .with_transaction(true)
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ExecutionStatus::Created.is_terminal());
        assert!(!ExecutionStatus::Started.is_terminal());
        assert!(ExecutionStatus::Resolved.is_terminal());
        assert!(ExecutionStatus::Error.is_terminal());
        assert!(ExecutionStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_execution_copies_workflow_fields() {
        let execution = Execution::new(&workflow(), json!({ "x": 1 })).with_origin(Some(9));

        assert_eq!(execution.workflow_id, 3);
        assert_eq!(execution.key, "k1");
        assert!(execution.use_transaction);
        assert_eq!(execution.status, ExecutionStatus::Created);
        assert_eq!(execution.origin_execution_id, Some(9));
    }

    #[test]
    fn test_attached_workflow_is_not_serialized() {
        let mut execution = Execution::new(&workflow(), json!({}));
        execution.workflow = Some(workflow());

        let text = serde_json::to_string(&execution).unwrap();
        let back: Execution = serde_json::from_str(&text).unwrap();
        assert!(back.workflow.is_none());
        assert_eq!(back.detached(), execution.detached());
        assert!(text.contains("\"status\":\"created\""));
    }

    #[test]
    fn test_related_filter_matches_id_or_origin() {
        let mut own = Execution::new(&workflow(), json!({}));
        own.id = 5;
        let mut child = Execution::new(&workflow(), json!({})).with_origin(Some(5));
        child.id = 6;
        let mut unrelated = Execution::new(&workflow(), json!({}));
        unrelated.id = 7;

        let filter = ExecutionFilter::for_workflow(3).related_to(5);
        assert!(filter.matches(&own));
        assert!(filter.matches(&child));
        assert!(!filter.matches(&unrelated));

        let filter = ExecutionFilter::for_workflow(3).excluding([5, 6]);
        assert!(!filter.matches(&own));
        assert!(!filter.matches(&child));
        assert!(filter.matches(&unrelated));
    }

    #[test]
    fn test_job_resolve() {
        let job = Job::new(4, "delay").resolve(json!("done"));
        assert_eq!(job.status, JobStatus::Resolved);
        assert_eq!(job.result, json!("done"));
        assert!(job.execution.is_none());
    }
}
