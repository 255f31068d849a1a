//! FlowRunner - Sequential Workflow Scheduler
//!
//! Turns trigger firings into persisted executions and runs them one at a
//! time. Workflows are versioned by `key`; at most one version per key is
//! current and only the current version listens for its trigger.
//!
//! # Architecture
//!
//! - [`workflow`]: Workflow versions, lifecycle hooks and definitions files
//! - [`execution`]: Execution and job records plus the processor contract
//! - [`trigger`]: Pluggable triggers and the interval trigger
//! - [`scheduler`]: Event funnel and single-flight dispatch
//! - [`storage`]: Transactional storage and the workflow repository
//! - [`monitoring`]: Dispatch timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use flowrunner::execution::{Execution, Processor};
//! use flowrunner::scheduler::{Scheduler, SchedulerHandle};
//! use flowrunner::storage::MemoryStorage;
//! use flowrunner::trigger::{IntervalTrigger, INTERVAL_TRIGGER};
//! use flowrunner::workflow::Workflow;
//!
//! # fn processor(_: Execution, _: SchedulerHandle) -> Box<dyn Processor> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Scheduler::new(Arc::new(MemoryStorage::new()), Arc::new(processor));
//!     scheduler.register_trigger(
//!         INTERVAL_TRIGGER,
//!         Arc::new(IntervalTrigger::new(scheduler.handle())),
//!     );
//!     scheduler.load();
//!
//!     scheduler.repository().save(
//!         Workflow::new("heartbeat", INTERVAL_TRIGGER)
//!             .with_config(serde_json::json!({ "every_ms": 1000 }))
//!             .enabled(true),
//!     )?;
//!     scheduler.start()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod trigger;
pub mod workflow;

// Re-export commonly used types
pub use error::{ProcessorError, SchedulerError, StorageError, TriggerError};
pub use execution::{Execution, ExecutionStatus, Job, Processor, ProcessorFactory};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerOptions};
pub use storage::{MemoryStorage, Repository, Storage};
pub use trigger::{Trigger, TriggerOptions};
pub use workflow::{load_definitions, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
