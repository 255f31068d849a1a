//! Processor Capability
//!
//! A processor interprets the instructions of one execution. The scheduler
//! creates one per dispatched run and awaits either [`Processor::start`] or
//! [`Processor::resume`]; both return once the run completed or suspended.
//! The processor persists terminal statuses and jobs itself.

use async_trait::async_trait;

use super::model::{Execution, Job};
use crate::error::ProcessorError;
use crate::scheduler::SchedulerHandle;

/// Advances one execution to suspension or completion.
#[async_trait]
pub trait Processor: Send {
    /// Runs a freshly dispatched execution from its first instruction.
    async fn start(&mut self) -> Result<(), ProcessorError>;

    /// Continues a suspended execution from `job`.
    async fn resume(&mut self, job: Job) -> Result<(), ProcessorError>;
}

/// Builds processors bound to an execution and to the scheduler.
///
/// The handle lets a processor fire sub-workflows through
/// [`SchedulerHandle::trigger`] and re-enter scheduling through
/// [`SchedulerHandle::resume`].
pub trait ProcessorFactory: Send + Sync {
    fn create(&self, execution: Execution, scheduler: SchedulerHandle) -> Box<dyn Processor>;
}

impl<F> ProcessorFactory for F
where
    F: Fn(Execution, SchedulerHandle) -> Box<dyn Processor> + Send + Sync,
{
    fn create(&self, execution: Execution, scheduler: SchedulerHandle) -> Box<dyn Processor> {
        self(execution, scheduler)
    }
}
