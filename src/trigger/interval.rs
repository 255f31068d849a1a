//! Interval Trigger
//!
//! Fires a workflow every `every_ms` milliseconds with a fixed context.
//!
//! ```yaml
//! type: interval
//! config:
//!   every_ms: 5000
//!   context:
//!     source: heartbeat
//! ```
//!
//! Listeners are keyed by workflow id and raw config, so switching off a
//! record that carries an older config removes exactly the listener that
//! config started.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use super::{Trigger, TriggerOptions};
use crate::error::TriggerError;
use crate::scheduler::SchedulerHandle;
use crate::workflow::Workflow;

/// Type name under which the trigger is registered by the CLI.
pub const INTERVAL_TRIGGER: &str = "interval";

#[derive(Deserialize, Debug)]
struct IntervalConfig {
    every_ms: u64,
    #[serde(default)]
    context: Value,
}

type ListenerKey = (u64, String);

fn listener_key(workflow: &Workflow) -> ListenerKey {
    (workflow.id, workflow.config.to_string())
}

/// Periodic trigger backed by one tokio task per listener.
pub struct IntervalTrigger {
    scheduler: SchedulerHandle,
    listeners: Mutex<HashMap<ListenerKey, JoinHandle<()>>>,
}

impl IntervalTrigger {
    pub fn new(scheduler: SchedulerHandle) -> Self {
        Self {
            scheduler,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Trigger for IntervalTrigger {
    fn on(&self, workflow: &Workflow) -> Result<(), TriggerError> {
        let config: IntervalConfig =
            serde_json::from_value(workflow.config.clone()).map_err(|e| TriggerError::Config {
                message: format!("workflow {}: {}", workflow.label(), e),
            })?;

        if config.every_ms == 0 {
            return Err(TriggerError::Config {
                message: format!("workflow {}: every_ms must be positive", workflow.label()),
            });
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| TriggerError::Runtime {
            message: e.to_string(),
        })?;

        let key = listener_key(workflow);
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if listeners.contains_key(&key) {
            debug!("Interval listener for {} already running", workflow.label());
            return Ok(());
        }

        let context = match config.context {
            Value::Null => json!({}),
            other => other,
        };
        let period = Duration::from_millis(config.every_ms);
        let scheduler = self.scheduler.clone();
        let snapshot = workflow.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !scheduler.trigger(&snapshot, context.clone(), TriggerOptions::default()) {
                    debug!("Scheduler gone, interval listener for {} exits", snapshot.label());
                    break;
                }
            }
        });

        info!(
            "Interval trigger on for {} (every {} ms)",
            workflow.label(),
            config.every_ms
        );
        listeners.insert(key, handle);
        Ok(())
    }

    fn off(&self, workflow: &Workflow) -> Result<(), TriggerError> {
        let removed = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&listener_key(workflow));

        if let Some(handle) = removed {
            handle.abort();
            info!("Interval trigger off for {}", workflow.label());
        }
        Ok(())
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        let listeners = self.listeners.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in listeners.drain() {
            handle.abort();
        }
    }
}
