//! Execution Module
//!
//! Records for workflow runs and the boundary to the processor that
//! interprets them.
//!
//! # Structure
//!
//! - [`model`]: Execution, Job and their statuses and filters
//! - [`processor`]: the start/resume contract the scheduler drives

pub mod model;
pub mod processor;

pub use model::{Execution, ExecutionFilter, ExecutionStatus, Job, JobStatus};
pub use processor::{Processor, ProcessorFactory};
