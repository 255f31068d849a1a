//! Workflow Lifecycle Manager
//!
//! Listens on the repository's save channel and keeps two things true:
//!
//! - per `key`, at most one version is `current`, and an enabled version is
//!   always the current one;
//! - exactly the enabled versions have a listening trigger.
//!
//! The previously current sibling is demoted inside the same transaction
//! that enables its successor, so the invariant never has to be repaired.

use std::sync::Arc;

use log::{debug, error, info, warn};

use super::model::{Workflow, WorkflowFilter};
use crate::error::{SchedulerError, TriggerError};
use crate::storage::{SaveHooks, UnitOfWork, WriteMode};
use crate::trigger::{Trigger, TriggerRegistry};

/// Save-hook listener maintaining the current-version invariant and the
/// trigger registrations.
pub struct Lifecycle {
    triggers: Arc<TriggerRegistry>,
}

impl Lifecycle {
    pub fn new(triggers: Arc<TriggerRegistry>) -> Self {
        Self { triggers }
    }

    /// The trigger serving `workflow.trigger_type`.
    pub fn trigger_for(&self, workflow: &Workflow) -> Result<Arc<dyn Trigger>, TriggerError> {
        self.triggers
            .get(&workflow.trigger_type)
            .ok_or_else(|| TriggerError::UnknownType {
                name: workflow.trigger_type.clone(),
            })
    }

    /// Switches the trigger of `workflow` on or off.
    ///
    /// `enable` overrides `workflow.enabled` when given. When enabling a
    /// record whose persisted config differs from `previous`, the listener
    /// registered under the old config is removed first.
    pub fn toggle(&self, workflow: &Workflow, previous: Option<&Workflow>, enable: Option<bool>) {
        let trigger = match self.trigger_for(workflow) {
            Ok(trigger) => trigger,
            Err(e) => {
                warn!("Workflow {} left without listener: {}", workflow.label(), e);
                return;
            }
        };

        if enable.unwrap_or(workflow.enabled) {
            if let Some(previous) = previous.filter(|p| p.config != workflow.config) {
                let stale = Workflow {
                    config: previous.config.clone(),
                    ..workflow.clone()
                };
                if let Err(e) = trigger.off(&stale) {
                    warn!(
                        "Failed to remove stale listener for {}: {}",
                        workflow.label(),
                        e
                    );
                }
            }
            if let Err(e) = trigger.on(workflow) {
                error!("Failed to switch on trigger for {}: {}", workflow.label(), e);
            }
        } else if let Err(e) = trigger.off(workflow) {
            error!("Failed to switch off trigger for {}: {}", workflow.label(), e);
        }
    }
}

impl SaveHooks for Lifecycle {
    fn before_save(
        &self,
        workflow: &mut Workflow,
        previous: Option<&Workflow>,
        uow: &mut UnitOfWork<'_>,
    ) -> Result<(), SchedulerError> {
        if workflow.enabled {
            workflow.current = Some(true);
        } else if !workflow.is_current() {
            let siblings = uow.count_workflows(&WorkflowFilter::by_key(&workflow.key))?;
            if siblings == 0 {
                debug!("First version of key '{}' becomes current", workflow.key);
                workflow.current = Some(true);
            }
        }

        let enabled_now = workflow.enabled && previous.map_or(true, |p| !p.enabled);
        if !enabled_now {
            return Ok(());
        }

        let filter = WorkflowFilter::by_key(&workflow.key)
            .current()
            .excluding(workflow.id);
        for mut sibling in uow.find_workflows(&filter)? {
            sibling.enabled = false;
            sibling.current = None;
            uow.update_workflow(&sibling, WriteMode::Quiet)?;

            info!(
                "Workflow {} superseded by {}",
                sibling.label(),
                workflow.label()
            );
            self.toggle(&sibling, None, Some(false));
        }
        Ok(())
    }

    fn after_save(&self, workflow: &Workflow, previous: Option<&Workflow>) {
        self.toggle(workflow, previous, None);
    }

    fn after_destroy(&self, workflow: &Workflow) {
        self.toggle(workflow, None, Some(false));
    }
}
