//! Single-Flight Dispatch
//!
//! At most one processor runs at any time. Work comes from two places: the
//! in-memory pending queue (resumed jobs and freshly seeded executions),
//! which always wins, and the oldest `created` execution in storage.
//!
//! The slot is claimed before the storage scan, so two dispatch calls can
//! never select the same row. A call that finds the slot taken leaves a
//! re-arm mark instead, and the holder scans again before going idle. A
//! finished run hands the slot straight to the next selection, so the
//! scheduler never looks idle between two runs.
//!
//! An execution whose `started` write fails is marked `error` when
//! possible and parked otherwise. Parked rows are skipped by every scan
//! until the scheduler is started again.

use std::any::Any;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::task::JoinError;

use super::{lock, Inner};
use crate::error::{ProcessorError, SchedulerError};
use crate::execution::{Execution, ExecutionFilter, ExecutionStatus, Job};
use crate::monitoring::EventType;

/// Work waiting for the slot.
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub execution: Execution,
    /// Set when the execution continues from a suspended job
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Idle,
    /// Scanning storage for the next created execution
    Selecting,
    Running(u64),
}

#[derive(Debug)]
pub(crate) struct DispatchState {
    pub slot: Slot,
    pub pending: VecDeque<Pending>,
    pub rearm: bool,
    pub stopped: bool,
    /// Created executions that could not be marked started
    pub parked: BTreeSet<u64>,
}

impl Default for DispatchState {
    fn default() -> Self {
        Self {
            slot: Slot::Idle,
            pending: Default::default(),
            rearm: false,
            stopped: false,
            parked: BTreeSet::new(),
        }
    }
}

impl Inner {
    /// Starts the next run if the slot is free. Never blocks on a run.
    pub(crate) fn dispatch(self: &Arc<Self>) {
        self.advance(None);
    }

    /// Frees the slot held by `finished`, if any, and selects the next run
    /// under the same lock.
    fn advance(self: &Arc<Self>, finished: Option<u64>) {
        {
            let mut state = lock(&self.state);
            if let Some(id) = finished {
                if state.slot == Slot::Running(id) {
                    state.slot = Slot::Idle;
                }
            }
            if state.stopped {
                drop(state);
                self.idle.notify_waiters();
                return;
            }
            if state.slot != Slot::Idle {
                state.rearm = true;
                return;
            }
            if let Some(next) = state.pending.pop_front() {
                state.slot = Slot::Running(next.execution.id);
                drop(state);
                self.spawn_run(next);
                return;
            }
            state.slot = Slot::Selecting;
            state.rearm = false;
        }

        loop {
            let parked: Vec<u64> = lock(&self.state).parked.iter().copied().collect();
            let scanned = self
                .repository
                .executions(&ExecutionFilter::oldest_created().excluding(parked));

            let mut state = lock(&self.state);
            if state.stopped {
                state.slot = Slot::Idle;
                drop(state);
                self.idle.notify_waiters();
                return;
            }
            if let Some(next) = state.pending.pop_front() {
                state.slot = Slot::Running(next.execution.id);
                drop(state);
                self.spawn_run(next);
                return;
            }

            match scanned {
                Ok(rows) => match rows.into_iter().next() {
                    Some(execution) => {
                        state.slot = Slot::Running(execution.id);
                        drop(state);
                        self.spawn_run(Pending {
                            execution,
                            job: None,
                        });
                        return;
                    }
                    None if state.rearm => {
                        state.rearm = false;
                        continue;
                    }
                    None => {
                        state.slot = Slot::Idle;
                        drop(state);
                        debug!("Nothing to dispatch");
                        self.idle.notify_waiters();
                        return;
                    }
                },
                Err(e) => {
                    state.slot = Slot::Idle;
                    drop(state);
                    error!("Failed to scan for created executions: {}", e);
                    self.idle.notify_waiters();
                    return;
                }
            }
        }
    }

    /// Queues a resumed job ahead of any created execution and dispatches.
    pub(crate) fn resume(self: &Arc<Self>, mut job: Job) -> Result<(), SchedulerError> {
        let execution = match job.execution.take() {
            Some(execution) => execution,
            None => self
                .repository
                .execution(job.execution_id)?
                .ok_or(SchedulerError::ExecutionNotFound {
                    id: job.execution_id,
                })?,
        };
        job.execution = Some(execution.detached());

        debug!(
            "Job {} ({}) queued to resume execution {}",
            job.id, job.instruction, execution.id
        );
        lock(&self.state).pending.push_back(Pending {
            execution,
            job: Some(job),
        });
        self.dispatch();
        Ok(())
    }

    fn spawn_run(self: &Arc<Self>, next: Pending) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                runtime.spawn(async move { inner.run(next).await });
            }
            Err(_) => {
                warn!(
                    "No async runtime to run execution {}, left pending",
                    next.execution.id
                );
                {
                    let mut state = lock(&self.state);
                    state.slot = Slot::Idle;
                    state.pending.push_front(next);
                }
                self.idle.notify_waiters();
            }
        }
    }

    /// Hands one execution to a fresh processor and waits for it to return.
    async fn run(self: Arc<Self>, next: Pending) {
        let Pending { mut execution, job } = next;
        let id = execution.id;

        if execution.status == ExecutionStatus::Created {
            if let Err(e) = self
                .repository
                .set_execution_status(id, ExecutionStatus::Started)
            {
                error!("Failed to mark execution {} as started: {}", id, e);
                if !self.mark_errored(id) {
                    warn!("Execution {} parked until the scheduler restarts", id);
                    lock(&self.state).parked.insert(id);
                }
                self.advance(Some(id));
                return;
            }
            execution.status = ExecutionStatus::Started;
        }

        if execution.workflow.is_none() {
            match self.repository.workflow(execution.workflow_id) {
                Ok(workflow) => execution.workflow = workflow,
                Err(e) => warn!(
                    "Failed to load workflow {} for execution {}: {}",
                    execution.workflow_id, id, e
                ),
            }
        }

        let resumed = job.is_some();
        self.record(
            id,
            if resumed {
                EventType::Resumed
            } else {
                EventType::Started
            },
        );
        info!(
            "{} execution {} of workflow {}",
            if resumed { "Resuming" } else { "Starting" },
            id,
            execution.workflow_id
        );

        let mut processor = self.processors.create(execution, self.handle());
        let outcome = tokio::spawn(async move {
            match job {
                Some(job) => processor.resume(job).await,
                None => processor.start().await,
            }
        })
        .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(ProcessorError::Panicked {
                message: join_message(e),
            }),
        };

        match failure {
            None => {
                debug!("Execution {} returned control", id);
                self.record(id, EventType::Finished);
            }
            Some(e) => {
                error!("Execution {} failed: {}", id, e);
                self.mark_errored(id);
                self.record(id, EventType::Errored);
            }
        }

        self.advance(Some(id));
    }

    /// Moves a non-terminal execution to `error`. Returns false when the
    /// row could not be read or written.
    fn mark_errored(&self, id: u64) -> bool {
        let terminal = match self.repository.execution(id) {
            Ok(Some(execution)) => execution.status.is_terminal(),
            Ok(None) => return true,
            Err(e) => {
                error!("Failed to reload execution {}: {}", id, e);
                return false;
            }
        };
        if terminal {
            return true;
        }
        match self
            .repository
            .set_execution_status(id, ExecutionStatus::Error)
        {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to mark execution {} as errored: {}", id, e);
                false
            }
        }
    }

    fn record(&self, id: u64, event: EventType) {
        lock(&self.timeline).add_event(id, event);
    }
}

fn join_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload: Box<dyn Any + Send> = error.into_panic();
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
