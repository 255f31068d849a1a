//! Hook-Aware Repository
//!
//! Wraps a [`Storage`] backend with the two notification channels workflow
//! writes go through:
//!
//! - **save hooks** ([`SaveHooks`]) run around [`Repository::save`] and
//!   [`Repository::destroy`]; the lifecycle manager listens here.
//! - **change observers** ([`ChangeObserver`]) hear about every committed
//!   workflow write except [`WriteMode::Silent`] ones.
//!
//! A write made from inside a save hook must not re-enter the save hooks,
//! so [`UnitOfWork::update_workflow`] only ever reaches the observers.

use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use super::{Storage, Transaction};
use crate::error::{SchedulerError, StorageError};
use crate::execution::{Execution, ExecutionFilter, ExecutionStatus, Job};
use crate::workflow::{Workflow, WorkflowFilter};

/// Listener for the save channel.
pub trait SaveHooks: Send + Sync {
    /// Runs inside the saving transaction, before the row is written.
    /// `previous` is the persisted row, `None` for an insert.
    fn before_save(
        &self,
        workflow: &mut Workflow,
        previous: Option<&Workflow>,
        uow: &mut UnitOfWork<'_>,
    ) -> Result<(), SchedulerError>;

    /// Runs after the saving transaction committed.
    fn after_save(&self, workflow: &Workflow, previous: Option<&Workflow>);

    /// Runs after a workflow row was deleted.
    fn after_destroy(&self, workflow: &Workflow);
}

/// Listener for committed workflow writes (cache invalidation and such).
pub trait ChangeObserver: Send + Sync {
    fn workflow_changed(&self, workflow: &Workflow);
}

/// Notification policy for a workflow write inside a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Bypasses save hooks; change observers are notified after commit.
    Quiet,
    /// Bypasses every listener.
    Silent,
}

/// Workflow/execution/job access with hook dispatch.
pub struct Repository {
    storage: Arc<dyn Storage>,
    hooks: RwLock<Vec<Arc<dyn SaveHooks>>>,
    observers: RwLock<Vec<Arc<dyn ChangeObserver>>>,
}

impl Repository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            hooks: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a save-channel listener.
    pub fn add_save_hooks(&self, hooks: Arc<dyn SaveHooks>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hooks);
    }

    /// Registers a change-channel listener.
    pub fn add_observer(&self, observer: Arc<dyn ChangeObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn save_hooks(&self) -> Vec<Arc<dyn SaveHooks>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify(&self, workflows: &[Workflow]) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for workflow in workflows {
            for observer in &observers {
                observer.workflow_changed(workflow);
            }
        }
    }

    /// Opens a unit of work over a fresh transaction.
    pub fn begin(&self) -> Result<UnitOfWork<'_>, StorageError> {
        Ok(UnitOfWork {
            tx: self.storage.begin()?,
            repository: self,
            touched: Vec::new(),
        })
    }

    /// Inserts or updates a workflow through the save channel.
    ///
    /// `before_save` hooks run inside the transaction and may adjust the
    /// row or its siblings; `after_save` hooks run once it committed.
    pub fn save(&self, mut workflow: Workflow) -> Result<Workflow, SchedulerError> {
        if workflow.key.trim().is_empty() {
            return Err(SchedulerError::InvalidWorkflow {
                message: "workflow key must not be empty".to_string(),
            });
        }

        let hooks = self.save_hooks();
        let mut uow = self.begin()?;

        let previous = if workflow.is_new() {
            None
        } else {
            uow.get_workflow(workflow.id)?
        };

        for hook in &hooks {
            hook.before_save(&mut workflow, previous.as_ref(), &mut uow)?;
        }

        if previous.is_some() {
            uow.tx.update_workflow(&workflow)?;
        } else {
            uow.tx.insert_workflow(&mut workflow)?;
        }
        uow.touched.push(workflow.clone());
        uow.commit()?;

        debug!("Saved workflow {}", workflow.label());

        for hook in &hooks {
            hook.after_save(&workflow, previous.as_ref());
        }
        Ok(workflow)
    }

    /// Deletes a workflow row and runs `after_destroy` hooks.
    ///
    /// Returns the deleted row, or `None` if it did not exist.
    pub fn destroy(&self, id: u64) -> Result<Option<Workflow>, SchedulerError> {
        let mut uow = self.begin()?;
        let Some(workflow) = uow.tx.delete_workflow(id)? else {
            return Ok(None);
        };
        uow.touched.push(workflow.clone());
        uow.commit()?;

        debug!("Destroyed workflow {}", workflow.label());

        for hook in self.save_hooks() {
            hook.after_destroy(&workflow);
        }
        Ok(Some(workflow))
    }

    /// Loads one workflow outside of any caller transaction.
    pub fn workflow(&self, id: u64) -> Result<Option<Workflow>, StorageError> {
        self.begin()?.get_workflow(id)
    }

    /// Lists workflows outside of any caller transaction.
    pub fn workflows(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StorageError> {
        self.begin()?.find_workflows(filter)
    }

    /// Loads one execution outside of any caller transaction.
    pub fn execution(&self, id: u64) -> Result<Option<Execution>, StorageError> {
        self.begin()?.get_execution(id)
    }

    /// Lists executions outside of any caller transaction.
    pub fn executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StorageError> {
        self.begin()?.find_executions(filter)
    }

    /// Counts executions outside of any caller transaction.
    pub fn count_executions(&self, filter: &ExecutionFilter) -> Result<usize, StorageError> {
        self.begin()?.count_executions(filter)
    }

    /// Persists a status change for one execution.
    pub fn set_execution_status(
        &self,
        id: u64,
        status: ExecutionStatus,
    ) -> Result<(), StorageError> {
        let mut uow = self.begin()?;
        uow.set_execution_status(id, status)?;
        uow.commit()
    }

    /// Inserts or updates a job.
    pub fn save_job(&self, job: &mut Job) -> Result<(), StorageError> {
        let mut uow = self.begin()?;
        uow.save_job(job)?;
        uow.commit()
    }
}

/// One open transaction plus the workflow writes to announce on commit.
pub struct UnitOfWork<'a> {
    tx: Box<dyn Transaction + 'a>,
    repository: &'a Repository,
    touched: Vec<Workflow>,
}

impl UnitOfWork<'_> {
    pub fn find_workflows(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StorageError> {
        self.tx.find_workflows(filter)
    }

    pub fn count_workflows(&self, filter: &WorkflowFilter) -> Result<usize, StorageError> {
        self.tx.count_workflows(filter)
    }

    pub fn get_workflow(&self, id: u64) -> Result<Option<Workflow>, StorageError> {
        self.tx.get_workflow(id)
    }

    /// Updates a workflow row without running save hooks.
    pub fn update_workflow(
        &mut self,
        workflow: &Workflow,
        mode: WriteMode,
    ) -> Result<(), StorageError> {
        self.tx.update_workflow(workflow)?;
        if mode == WriteMode::Quiet {
            self.touched.push(workflow.clone());
        }
        Ok(())
    }

    pub fn find_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, StorageError> {
        self.tx.find_executions(filter)
    }

    pub fn count_executions(&self, filter: &ExecutionFilter) -> Result<usize, StorageError> {
        self.tx.count_executions(filter)
    }

    pub fn get_execution(&self, id: u64) -> Result<Option<Execution>, StorageError> {
        self.tx.get_execution(id)
    }

    pub fn insert_execution(&mut self, execution: &mut Execution) -> Result<(), StorageError> {
        self.tx.insert_execution(execution)
    }

    pub fn set_execution_status(
        &mut self,
        id: u64,
        status: ExecutionStatus,
    ) -> Result<(), StorageError> {
        self.tx.set_execution_status(id, status)
    }

    pub fn get_job(&self, id: u64) -> Result<Option<Job>, StorageError> {
        self.tx.get_job(id)
    }

    pub fn save_job(&mut self, job: &mut Job) -> Result<(), StorageError> {
        self.tx.save_job(job)
    }

    /// Commits the transaction, then notifies change observers.
    pub fn commit(self) -> Result<(), StorageError> {
        let UnitOfWork {
            tx,
            repository,
            touched,
        } = self;

        tx.commit()?;
        repository.notify(&touched);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ChangeObserver for Recorder {
        fn workflow_changed(&self, workflow: &Workflow) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("changed:{}", workflow.id));
        }
    }

    impl SaveHooks for Recorder {
        fn before_save(
            &self,
            workflow: &mut Workflow,
            previous: Option<&Workflow>,
            _uow: &mut UnitOfWork<'_>,
        ) -> Result<(), SchedulerError> {
            workflow.title = "stamped".to_string();
            self.seen
                .lock()
                .unwrap()
                .push(format!("before:{}", previous.is_some()));
            Ok(())
        }

        fn after_save(&self, workflow: &Workflow, _previous: Option<&Workflow>) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("after:{}", workflow.id));
        }

        fn after_destroy(&self, workflow: &Workflow) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("destroy:{}", workflow.id));
        }
    }

    fn repository() -> (Repository, Arc<Recorder>) {
        let repository = Repository::new(Arc::new(MemoryStorage::new()));
        let recorder = Arc::new(Recorder::default());
        repository.add_save_hooks(recorder.clone());
        repository.add_observer(recorder.clone());
        (repository, recorder)
    }

    #[test]
    fn test_save_runs_hooks_in_order() {
        let (repository, recorder) = repository();

        let saved = repository.save(Workflow::new("k1", "interval")).unwrap();
        assert_eq!(saved.id, 1);
        assert_eq!(saved.title, "stamped");

        let again = repository.save(saved).unwrap();
        assert_eq!(again.id, 1);

        assert_eq!(
            recorder.seen(),
            vec![
                "before:false",
                "changed:1",
                "after:1",
                "before:true",
                "changed:1",
                "after:1"
            ]
        );
    }

    #[test]
    fn test_save_rejects_empty_key() {
        let (repository, recorder) = repository();
        let result = repository.save(Workflow::new("  ", "interval"));

        assert!(matches!(result, Err(SchedulerError::InvalidWorkflow { .. })));
        assert!(recorder.seen().is_empty());
    }

    #[test]
    fn test_write_modes_control_observers() {
        let (repository, recorder) = repository();
        let saved = repository.save(Workflow::new("k1", "interval")).unwrap();
        recorder.seen.lock().unwrap().clear();

        let mut uow = repository.begin().unwrap();
        let mut quiet = saved.clone();
        quiet.executed = 1;
        uow.update_workflow(&quiet, WriteMode::Quiet).unwrap();
        uow.update_workflow(&quiet, WriteMode::Silent).unwrap();
        assert!(recorder.seen().is_empty(), "observers wait for commit");
        uow.commit().unwrap();

        assert_eq!(recorder.seen(), vec!["changed:1"]);
        assert_eq!(repository.workflow(saved.id).unwrap().unwrap().executed, 1);
    }

    #[test]
    fn test_rolled_back_unit_does_not_notify() {
        let (repository, recorder) = repository();
        let saved = repository.save(Workflow::new("k1", "interval")).unwrap();
        recorder.seen.lock().unwrap().clear();

        {
            let mut uow = repository.begin().unwrap();
            let mut changed = saved.clone();
            changed.enabled = true;
            uow.update_workflow(&changed, WriteMode::Quiet).unwrap();
        }

        assert!(recorder.seen().is_empty());
        assert!(!repository.workflow(saved.id).unwrap().unwrap().enabled);
    }

    #[test]
    fn test_destroy_runs_after_destroy() {
        let (repository, recorder) = repository();
        let saved = repository.save(Workflow::new("k1", "interval")).unwrap();
        recorder.seen.lock().unwrap().clear();

        let removed = repository.destroy(saved.id).unwrap();
        assert_eq!(removed.map(|w| w.id), Some(saved.id));
        assert_eq!(recorder.seen(), vec!["changed:1", "destroy:1"]);

        assert!(repository.destroy(saved.id).unwrap().is_none());
    }

    #[test]
    fn test_execution_status_roundtrip() {
        let (repository, _) = repository();
        let workflow = repository.save(Workflow::new("k1", "interval")).unwrap();

        let mut uow = repository.begin().unwrap();
        let mut execution = Execution::new(&workflow, serde_json::json!({}));
        uow.insert_execution(&mut execution).unwrap();
        uow.commit().unwrap();

        repository
            .set_execution_status(execution.id, ExecutionStatus::Resolved)
            .unwrap();
        let stored = repository.execution(execution.id).unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Resolved);
    }
}
