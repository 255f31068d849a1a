//! Workflow Definition Module
//!
//! Workflow versions, their lifecycle and the definitions file format.
//!
//! # Structure
//!
//! - [`model`]: Workflow rows and query filters
//! - [`lifecycle`]: Current-version bookkeeping and trigger switching
//! - [`parser`]: YAML definitions loading
//! - [`validator`]: Batch validation of definitions

pub mod lifecycle;
pub mod model;
pub mod parser;
pub mod validator;

pub use lifecycle::Lifecycle;
pub use model::{Workflow, WorkflowFilter};
pub use parser::{load_definitions, parse_definitions, save_definitions};
pub use validator::{validate_definitions, ValidationError};
