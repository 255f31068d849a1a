//! Monitoring Module
//!
//! Observability helpers for scheduler runs.
//!
//! # Components
//!
//! - [`DispatchTimeline`]: processor invocation start/end timing

pub mod timeline;

pub use timeline::{DispatchTimeline, EventType, RunSpan, TimelineEvent, DEFAULT_EVENT_CAPACITY};
