//! Trigger Event Funnel
//!
//! Turns trigger firings into persisted executions, one at a time and in
//! arrival order. A firing only queues the event; the queue is drained by
//! a task spawned when the queue goes from empty to non-empty, so a burst
//! of firings from one call stack is handled by a single drain pass.

use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::Value;

use super::dispatch::{Pending, Slot};
use super::{lock, Inner};
use crate::error::SchedulerError;
use crate::execution::{Execution, ExecutionFilter};
use crate::storage::WriteMode;
use crate::trigger::TriggerOptions;
use crate::workflow::{Workflow, WorkflowFilter};

/// A firing waiting for its execution row.
#[derive(Debug, Clone)]
pub(crate) struct TriggerEvent {
    pub workflow: Workflow,
    pub context: Value,
    pub options: TriggerOptions,
}

impl Inner {
    /// Queues a firing. A `null` context means "do not run".
    pub(crate) fn trigger(self: &Arc<Self>, workflow: &Workflow, context: Value, options: TriggerOptions) {
        if context.is_null() {
            debug!("Workflow {} fired without context, skipped", workflow.label());
            return;
        }

        let first = {
            let mut events = lock(&self.events);
            events.push_back(TriggerEvent {
                workflow: workflow.clone(),
                context,
                options,
            });
            events.len() == 1
        };
        if !first {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                runtime.spawn(async move { inner.drain() });
            }
            Err(_) => self.drain(),
        }
    }

    /// Processes queued events head first until the queue is empty, then
    /// hands over to dispatch. The head stays queued while it is processed
    /// so concurrent firings never spawn a second drain, and the last one
    /// stays queued until dispatch has claimed the slot.
    pub(crate) fn drain(self: &Arc<Self>) {
        loop {
            let Some(event) = lock(&self.events).front().cloned() else {
                return;
            };

            match self.prepare(&event) {
                Ok(Some(execution)) => self.seed(execution),
                Ok(None) => {}
                Err(e) => error!(
                    "Failed to create execution for workflow {}: {}",
                    event.workflow.label(),
                    e
                ),
            }

            if lock(&self.events).len() == 1 {
                self.dispatch();
            }

            let drained = {
                let mut events = lock(&self.events);
                events.pop_front();
                events.is_empty()
            };
            if drained {
                self.idle.notify_waiters();
                return;
            }
        }
    }

    /// Persists the execution for one event together with the counters.
    ///
    /// Returns `None` when the event claims an execution that this workflow
    /// already recorded.
    fn prepare(&self, event: &TriggerEvent) -> Result<Option<Execution>, SchedulerError> {
        let workflow = &event.workflow;

        if let Some(origin) = event.options.execution_id {
            let filter = ExecutionFilter::for_workflow(workflow.id).related_to(origin);
            if self.repository.count_executions(&filter)? > 0 {
                warn!(
                    "Workflow {} already triggered within execution {}, firing skipped",
                    workflow.label(),
                    origin
                );
                return Ok(None);
            }
        }

        let mut uow = self.repository.begin()?;

        let mut execution =
            Execution::new(workflow, event.context.clone()).with_origin(event.options.execution_id);
        uow.insert_execution(&mut execution)?;

        let executed = uow.count_executions(&ExecutionFilter::for_workflow(workflow.id))? as u64;
        if let Some(mut row) = uow.get_workflow(workflow.id)? {
            row.executed = executed;
            uow.update_workflow(&row, WriteMode::Silent)?;
        }

        let all_executed = uow.count_executions(&ExecutionFilter::for_key(&workflow.key))? as u64;
        for mut version in uow.find_workflows(&WorkflowFilter::by_key(&workflow.key))? {
            if version.all_executed != all_executed {
                version.all_executed = all_executed;
                uow.update_workflow(&version, WriteMode::Quiet)?;
            }
        }

        uow.commit()?;

        debug!(
            "Created execution {} for workflow {} ({} runs, {} across versions)",
            execution.id,
            workflow.label(),
            executed,
            all_executed
        );

        let mut attached = workflow.clone();
        attached.executed = executed;
        attached.all_executed = all_executed;
        execution.workflow = Some(attached);
        Ok(Some(execution))
    }

    /// Queues a fresh execution directly when nothing else competes for the
    /// slot, sparing the next dispatch a storage scan.
    fn seed(&self, execution: Execution) {
        let mut state = lock(&self.state);
        if !state.stopped && state.slot == Slot::Idle && state.pending.is_empty() {
            state.pending.push_back(Pending {
                execution,
                job: None,
            });
        }
    }
}
