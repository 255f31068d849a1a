//! Workflow Data Model
//!
//! A workflow is a versioned automation definition. Every version of the
//! same logical workflow shares a `key`; at most one version per key is
//! `current`, and only the current version may be enabled.
//!
//! # Example YAML Format
//!
//! ```yaml
//! workflows:
//!   - id: 1
//!     key: nightly-report
//!     title: Nightly report
//!     type: interval
//!     enabled: true
//!     config:
//!       every_ms: 60000
//!       context:
//!         report: daily
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A workflow version row.
///
/// An `id` of `0` marks a record that has not been persisted yet; storage
/// assigns one on insert.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    /// Row identity (one per version)
    #[serde(default)]
    pub id: u64,

    /// Logical identity shared by every version of this workflow
    pub key: String,

    /// Human readable title
    #[serde(default)]
    pub title: String,

    /// Trigger type name, resolved through the trigger registry
    #[serde(rename = "type")]
    pub trigger_type: String,

    /// Trigger-specific configuration, opaque to the scheduler
    #[serde(default)]
    pub config: Value,

    /// Whether the trigger of this version is listening
    #[serde(default)]
    pub enabled: bool,

    /// `Some(true)` for the current version of `key`, `None` otherwise.
    ///
    /// Never `Some(false)`: a demoted version is reset to `None` so that a
    /// unique index on `(key) WHERE current` stays satisfiable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<bool>,

    /// Number of executions created for this version
    #[serde(default)]
    pub executed: u64,

    /// Number of executions created across every version of `key`
    #[serde(default)]
    pub all_executed: u64,

    /// Copied onto every execution at creation time
    #[serde(default)]
    pub use_transaction: bool,
}

impl Workflow {
    /// Creates an unsaved, disabled workflow version.
    ///
    /// # Example
    ///
    /// ```
    /// use flowrunner::workflow::Workflow;
    ///
    /// let workflow = Workflow::new("nightly-report", "interval")
    ///     .with_title("Nightly report")
    ///     .with_config(serde_json::json!({ "every_ms": 60000 }))
    ///     .enabled(true);
    /// assert!(workflow.is_new());
    /// ```
    pub fn new(key: impl Into<String>, trigger_type: impl Into<String>) -> Self {
        Self {
            id: 0,
            key: key.into().trim().to_string(),
            title: String::new(),
            trigger_type: trigger_type.into().trim().to_string(),
            config: Value::Null,
            enabled: false,
            current: None,
            executed: 0,
            all_executed: 0,
            use_transaction: false,
        }
    }

    /// Pins the row id (used by definition files and tests).
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the trigger configuration.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Sets the enabled flag.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the use-transaction flag.
    pub fn with_transaction(mut self, use_transaction: bool) -> Self {
        self.use_transaction = use_transaction;
        self
    }

    /// Returns true if the record has never been persisted.
    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    /// Returns true if this version is the current one for its key.
    pub fn is_current(&self) -> bool {
        self.current == Some(true)
    }

    /// Human readable label for log lines.
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            format!("{}#{}", self.key, self.id)
        } else {
            format!("'{}' ({}#{})", self.title, self.key, self.id)
        }
    }
}

/// Row filter for workflow queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowFilter {
    pub key: Option<String>,
    pub enabled: Option<bool>,
    pub current: Option<bool>,
    pub exclude_id: Option<u64>,
}

impl WorkflowFilter {
    /// Every version sharing `key`.
    pub fn by_key(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Every enabled version of every key.
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            ..Self::default()
        }
    }

    /// Restricts to the current version.
    pub fn current(mut self) -> Self {
        self.current = Some(true);
        self
    }

    /// Excludes a single row.
    pub fn excluding(mut self, id: u64) -> Self {
        self.exclude_id = Some(id);
        self
    }

    /// Returns true if `workflow` satisfies every set field.
    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.key.as_ref().map_or(true, |key| &workflow.key == key)
            && self.enabled.map_or(true, |enabled| workflow.enabled == enabled)
            && self
                .current
                .map_or(true, |current| workflow.is_current() == current)
            && self.exclude_id.map_or(true, |id| workflow.id != id)
    }
}
