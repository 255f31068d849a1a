//! Trigger Capability
//!
//! A trigger decides when a workflow fires. The scheduler only switches
//! triggers on and off; a listening trigger reports each firing through
//! [`SchedulerHandle::trigger`](crate::scheduler::SchedulerHandle::trigger).
//!
//! - [`interval`]: fires on a fixed period
//!
//! `on` and `off` must both be idempotent: the lifecycle manager may toggle
//! the same workflow from a save hook and from the startup scan.

pub mod interval;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TriggerError;
use crate::registry::Registry;
use crate::workflow::Workflow;

pub use interval::{IntervalTrigger, INTERVAL_TRIGGER};

/// A pluggable trigger implementation.
pub trait Trigger: Send + Sync {
    /// Starts listening according to `workflow.config`.
    fn on(&self, workflow: &Workflow) -> Result<(), TriggerError>;

    /// Stops the listener registered for `workflow.config`.
    fn off(&self, workflow: &Workflow) -> Result<(), TriggerError>;
}

/// Triggers keyed by the workflow `type` they serve.
pub type TriggerRegistry = Registry<Arc<dyn Trigger>>;

/// Per-firing options.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TriggerOptions {
    /// Execution this firing claims to belong to (a sub-workflow call, for
    /// instance). At most one execution of the workflow is created per
    /// claimed id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<u64>,
}

impl TriggerOptions {
    /// Options for a firing that belongs to `execution_id`.
    pub fn within(execution_id: u64) -> Self {
        Self {
            execution_id: Some(execution_id),
        }
    }
}
