//! Workflow Scheduler
//!
//! Owns the pieces that turn trigger firings into processor runs:
//!
//! - [`funnel`]: serialises firings into persisted executions
//! - [`dispatch`]: runs at most one execution at a time, resumed jobs first
//!
//! A [`Scheduler`] is an explicit value; triggers and processors reach it
//! through a [`SchedulerHandle`], which does not keep it alive.

mod dispatch;
mod funnel;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

use crate::error::SchedulerError;
use crate::execution::{Job, ProcessorFactory};
use crate::monitoring::DispatchTimeline;
use crate::storage::{Repository, Storage};
use crate::trigger::{Trigger, TriggerOptions, TriggerRegistry};
use crate::workflow::{Lifecycle, Workflow, WorkflowFilter};

use dispatch::{DispatchState, Slot};
use funnel::TriggerEvent;

/// Scheduler tuning.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchedulerOptions {
    /// Dispatch once on start so executions left `created` by a previous
    /// run are picked up.
    #[serde(default = "default_recover_on_start")]
    pub recover_on_start: bool,
}

fn default_recover_on_start() -> bool {
    true
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            recover_on_start: default_recover_on_start(),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Inner {
    repository: Arc<Repository>,
    triggers: Arc<TriggerRegistry>,
    lifecycle: Arc<Lifecycle>,
    processors: Arc<dyn ProcessorFactory>,
    options: SchedulerOptions,
    events: Mutex<VecDeque<TriggerEvent>>,
    state: Mutex<DispatchState>,
    timeline: Mutex<DispatchTimeline>,
    idle: Notify,
    loaded: Mutex<bool>,
}

impl Inner {
    fn handle(self: &Arc<Self>) -> SchedulerHandle {
        SchedulerHandle {
            inner: Arc::downgrade(self),
        }
    }

    fn is_idle(&self) -> bool {
        if !lock(&self.events).is_empty() {
            return false;
        }
        let state = lock(&self.state);
        state.slot == Slot::Idle && (state.stopped || state.pending.is_empty())
    }
}

/// Sequential workflow scheduler.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(storage: Arc<dyn Storage>, processors: Arc<dyn ProcessorFactory>) -> Self {
        Self::with_options(storage, processors, SchedulerOptions::default())
    }

    pub fn with_options(
        storage: Arc<dyn Storage>,
        processors: Arc<dyn ProcessorFactory>,
        options: SchedulerOptions,
    ) -> Self {
        let triggers = Arc::new(TriggerRegistry::new());
        Self {
            inner: Arc::new(Inner {
                repository: Arc::new(Repository::new(storage)),
                lifecycle: Arc::new(Lifecycle::new(triggers.clone())),
                triggers,
                processors,
                options,
                events: Mutex::new(VecDeque::new()),
                state: Mutex::new(DispatchState::default()),
                timeline: Mutex::new(DispatchTimeline::new()),
                idle: Notify::new(),
                loaded: Mutex::new(false),
            }),
        }
    }

    /// A non-owning handle for triggers and processors.
    pub fn handle(&self) -> SchedulerHandle {
        self.inner.handle()
    }

    pub fn repository(&self) -> Arc<Repository> {
        self.inner.repository.clone()
    }

    pub fn triggers(&self) -> Arc<TriggerRegistry> {
        self.inner.triggers.clone()
    }

    /// Registers the trigger serving workflows of type `name`.
    pub fn register_trigger(&self, name: impl Into<String>, trigger: Arc<dyn Trigger>) {
        self.inner.triggers.register(name, trigger);
    }

    /// Attaches the lifecycle manager to the repository's save channel.
    /// Calling it again has no effect.
    pub fn load(&self) {
        let mut loaded = lock(&self.inner.loaded);
        if *loaded {
            return;
        }
        self.inner
            .repository
            .add_save_hooks(self.inner.lifecycle.clone());
        *loaded = true;
    }

    /// Switches on the trigger of every enabled workflow and, unless
    /// disabled in the options, dispatches once to recover executions left
    /// `created` by a previous run. Executions parked after a failed status
    /// write become eligible again.
    ///
    /// Returns the number of workflows switched on.
    pub fn start(&self) -> Result<usize, SchedulerError> {
        {
            let mut state = lock(&self.inner.state);
            state.stopped = false;
            state.parked.clear();
        }

        let workflows = self.inner.repository.workflows(&WorkflowFilter::enabled())?;
        for workflow in &workflows {
            self.inner.lifecycle.toggle(workflow, None, None);
        }
        info!("Scheduler started with {} enabled workflows", workflows.len());

        if self.inner.options.recover_on_start {
            self.inner.dispatch();
        }
        Ok(workflows.len())
    }

    /// Switches every enabled trigger off and stops dispatching. A run in
    /// flight finishes; queued resumes are dropped.
    pub fn stop(&self) -> Result<usize, SchedulerError> {
        {
            let mut state = lock(&self.inner.state);
            state.stopped = true;
            if !state.pending.is_empty() {
                warn!("Dropping {} queued runs on stop", state.pending.len());
                state.pending.clear();
            }
        }

        let workflows = self.inner.repository.workflows(&WorkflowFilter::enabled())?;
        for workflow in &workflows {
            self.inner.lifecycle.toggle(workflow, None, Some(false));
        }
        info!("Scheduler stopped");
        self.inner.idle.notify_waiters();
        Ok(workflows.len())
    }

    /// Reports a firing of `workflow`. See [`SchedulerHandle::trigger`].
    pub fn trigger(&self, workflow: &Workflow, context: Value, options: TriggerOptions) {
        self.inner.trigger(workflow, context, options);
    }

    /// Queues a suspended execution to continue from `job`.
    pub fn resume(&self, job: Job) -> Result<(), SchedulerError> {
        self.inner.resume(job)
    }

    /// Starts the next run if nothing is running.
    pub fn dispatch(&self) {
        self.inner.dispatch();
    }

    /// Id of the execution currently holding the slot.
    pub fn executing(&self) -> Option<u64> {
        match lock(&self.inner.state).slot {
            Slot::Running(id) => Some(id),
            _ => None,
        }
    }

    /// True when no firing is queued and the slot is free with no run waiting.
    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Waits until [`Scheduler::is_idle`] holds.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Snapshot of the processor invocations so far.
    pub fn timeline(&self) -> DispatchTimeline {
        lock(&self.inner.timeline).clone()
    }
}

/// Non-owning reference to a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Weak<Inner>,
}

impl SchedulerHandle {
    /// A handle bound to no scheduler. Every call reports shutdown.
    pub fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    /// Reports a firing of `workflow`.
    ///
    /// A `null` context is ignored. `options.execution_id` marks the firing
    /// as part of an execution; the workflow then runs at most once for it.
    /// Returns `false` once the scheduler is gone.
    pub fn trigger(&self, workflow: &Workflow, context: Value, options: TriggerOptions) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                inner.trigger(workflow, context, options);
                true
            }
            None => false,
        }
    }

    /// Queues a suspended execution to continue from `job`.
    pub fn resume(&self, job: Job) -> Result<(), SchedulerError> {
        self.inner
            .upgrade()
            .ok_or(SchedulerError::ShutDown)?
            .resume(job)
    }

    pub fn repository(&self) -> Option<Arc<Repository>> {
        self.inner.upgrade().map(|inner| inner.repository.clone())
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("attached", &(self.inner.strong_count() > 0))
            .finish()
    }
}
