//! In-Memory Storage
//!
//! Keeps every table in process memory. When opened with a snapshot path
//! the tables are loaded from, and rewritten to, a JSON file on every
//! commit, so executions left in `created` survive a restart.
//!
//! Transactions are serialized: `begin` takes the table lock. Reads go
//! straight to the locked tables; the first write stages a full copy that
//! replaces the tables on commit. A transaction that never writes commits
//! without copying or touching the snapshot file.
//!
//! Each committed write clones every table and rewrites the whole snapshot
//! synchronously, so the cost grows with the stored history. This backend
//! suits demos and tests; long-lived deployments should implement
//! [`Storage`] over a real database.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{Storage, Transaction};
use crate::error::StorageError;
use crate::execution::{Execution, ExecutionFilter, ExecutionStatus, Job};
use crate::workflow::{Workflow, WorkflowFilter};

/// Every table of the store.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
struct Tables {
    next_id: u64,
    workflows: BTreeMap<u64, Workflow>,
    executions: BTreeMap<u64, Execution>,
    jobs: BTreeMap<u64, Job>,
}

impl Tables {
    fn allocate(&mut self, requested: u64) -> u64 {
        if requested != 0 {
            self.next_id = self.next_id.max(requested);
            return requested;
        }
        self.next_id += 1;
        self.next_id
    }
}

/// In-process [`Storage`] backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStorage {
    /// Creates an empty store that lives only as long as the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by a JSON snapshot file.
    ///
    /// A missing file yields an empty store; the file is created on the
    /// first commit.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();

        let tables = match fs::read_to_string(&path) {
            Ok(content) => {
                let tables: Tables = serde_json::from_str(&content)?;
                info!(
                    "Loaded store snapshot from {} ({} workflows, {} executions)",
                    path.display(),
                    tables.workflows.len(),
                    tables.executions.len()
                );
                tables
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No store snapshot at {} - starting empty", path.display());
                Tables::default()
            }
            Err(source) => return Err(StorageError::Snapshot { path, source }),
        };

        Ok(Self {
            tables: Mutex::new(tables),
            snapshot_path: Some(path),
        })
    }
}

impl Storage for MemoryStorage {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError> {
        let guard = self.tables.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(Box::new(MemoryTransaction {
            guard,
            staged: None,
            snapshot_path: self.snapshot_path.as_deref(),
        }))
    }
}

struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, Tables>,
    /// Copy of the tables, taken on the first write
    staged: Option<Tables>,
    snapshot_path: Option<&'a Path>,
}

impl MemoryTransaction<'_> {
    fn tables(&self) -> &Tables {
        self.staged.as_ref().unwrap_or(&self.guard)
    }

    fn tables_mut(&mut self) -> &mut Tables {
        let guard = &self.guard;
        self.staged.get_or_insert_with(|| (**guard).clone())
    }
}

fn write_snapshot(path: &Path, tables: &Tables) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StorageError::Snapshot {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let json = serde_json::to_string_pretty(tables)?;
    fs::write(path, json).map_err(|source| StorageError::Snapshot {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Saved store snapshot to {}", path.display());
    Ok(())
}

impl Transaction for MemoryTransaction<'_> {
    fn find_workflows(&self, filter: &WorkflowFilter) -> Result<Vec<Workflow>, StorageError> {
        Ok(self
            .tables()
            .workflows
            .values()
            .filter(|w| filter.matches(w))
            .cloned()
            .collect())
    }

    fn get_workflow(&self, id: u64) -> Result<Option<Workflow>, StorageError> {
        Ok(self.tables().workflows.get(&id).cloned())
    }

    fn insert_workflow(&mut self, workflow: &mut Workflow) -> Result<(), StorageError> {
        let tables = self.tables_mut();
        workflow.id = tables.allocate(workflow.id);
        tables.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    fn update_workflow(&mut self, workflow: &Workflow) -> Result<(), StorageError> {
        let row = self
            .tables_mut()
            .workflows
            .get_mut(&workflow.id)
            .ok_or(StorageError::NotFound {
                entity: "workflow",
                id: workflow.id,
            })?;
        *row = workflow.clone();
        Ok(())
    }

    fn delete_workflow(&mut self, id: u64) -> Result<Option<Workflow>, StorageError> {
        Ok(self.tables_mut().workflows.remove(&id))
    }

    fn find_executions(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StorageError> {
        let mut rows: Vec<Execution> = self
            .tables()
            .executions
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn get_execution(&self, id: u64) -> Result<Option<Execution>, StorageError> {
        Ok(self.tables().executions.get(&id).cloned())
    }

    fn insert_execution(&mut self, execution: &mut Execution) -> Result<(), StorageError> {
        let tables = self.tables_mut();
        execution.id = tables.allocate(execution.id);
        tables
            .executions
            .insert(execution.id, execution.detached());
        Ok(())
    }

    fn set_execution_status(
        &mut self,
        id: u64,
        status: ExecutionStatus,
    ) -> Result<(), StorageError> {
        let row = self
            .tables_mut()
            .executions
            .get_mut(&id)
            .ok_or(StorageError::NotFound {
                entity: "execution",
                id,
            })?;
        row.status = status;
        Ok(())
    }

    fn get_job(&self, id: u64) -> Result<Option<Job>, StorageError> {
        Ok(self.tables().jobs.get(&id).cloned())
    }

    fn save_job(&mut self, job: &mut Job) -> Result<(), StorageError> {
        let tables = self.tables_mut();
        job.id = tables.allocate(job.id);
        let mut row = job.clone();
        row.execution = None;
        tables.jobs.insert(row.id, row);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryTransaction {
            mut guard,
            staged,
            snapshot_path,
        } = *self;

        let Some(staged) = staged else {
            return Ok(());
        };
        if let Some(path) = snapshot_path {
            write_snapshot(path, &staged)?;
        }
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn insert_workflow(storage: &MemoryStorage, key: &str) -> Workflow {
        let mut workflow = Workflow::new(key, "interval");
        let mut tx = storage.begin().unwrap();
        tx.insert_workflow(&mut workflow).unwrap();
        tx.commit().unwrap();
        workflow
    }

    #[test]
    fn test_ids_are_assigned_and_pinned() {
        let storage = MemoryStorage::new();
        let first = insert_workflow(&storage, "a");
        assert_eq!(first.id, 1);

        let mut pinned = Workflow::new("b", "interval").with_id(10);
        let mut tx = storage.begin().unwrap();
        tx.insert_workflow(&mut pinned).unwrap();
        let mut next = Workflow::new("c", "interval");
        tx.insert_workflow(&mut next).unwrap();
        tx.commit().unwrap();

        assert_eq!(pinned.id, 10);
        assert_eq!(next.id, 11);
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let storage = MemoryStorage::new();
        {
            let mut tx = storage.begin().unwrap();
            let mut workflow = Workflow::new("a", "interval");
            tx.insert_workflow(&mut workflow).unwrap();
        }

        let tx = storage.begin().unwrap();
        assert_eq!(tx.count_workflows(&WorkflowFilter::default()).unwrap(), 0);
    }

    #[test]
    fn test_update_missing_workflow_fails() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().unwrap();
        let result = tx.update_workflow(&Workflow::new("a", "interval").with_id(3));
        assert!(matches!(
            result,
            Err(StorageError::NotFound { entity: "workflow", id: 3 })
        ));
    }

    #[test]
    fn test_executions_are_ordered_oldest_first() {
        let storage = MemoryStorage::new();
        let workflow = insert_workflow(&storage, "a");

        let mut tx = storage.begin().unwrap();
        let mut newer = Execution::new(&workflow, json!({ "n": 2 }));
        let mut older = Execution::new(&workflow, json!({ "n": 1 }));
        older.created_at = newer.created_at - chrono::Duration::seconds(5);
        tx.insert_execution(&mut newer).unwrap();
        tx.insert_execution(&mut older).unwrap();
        tx.commit().unwrap();

        let tx = storage.begin().unwrap();
        let found = tx
            .find_executions(&ExecutionFilter::oldest_created())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, older.id);
        assert_eq!(
            tx.count_executions(&ExecutionFilter::oldest_created())
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_inserted_execution_drops_attachment() {
        let storage = MemoryStorage::new();
        let workflow = insert_workflow(&storage, "a");

        let mut execution = Execution::new(&workflow, json!({}));
        execution.workflow = Some(workflow.clone());
        let mut tx = storage.begin().unwrap();
        tx.insert_execution(&mut execution).unwrap();
        tx.set_execution_status(execution.id, ExecutionStatus::Started)
            .unwrap();
        tx.commit().unwrap();

        let tx = storage.begin().unwrap();
        let stored = tx.get_execution(execution.id).unwrap().unwrap();
        assert!(stored.workflow.is_none());
        assert_eq!(stored.status, ExecutionStatus::Started);
    }

    #[test]
    fn test_save_job_inserts_then_updates() {
        let storage = MemoryStorage::new();
        let mut job = Job::new(1, "delay");

        let mut tx = storage.begin().unwrap();
        tx.save_job(&mut job).unwrap();
        let id = job.id;
        job = job.resolve(json!(true));
        tx.save_job(&mut job).unwrap();
        tx.commit().unwrap();

        let tx = storage.begin().unwrap();
        let stored = tx.get_job(id).unwrap().unwrap();
        assert_eq!(stored.result, json!(true));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        {
            let storage = MemoryStorage::open(&path).unwrap();
            let workflow = insert_workflow(&storage, "a");
            let mut tx = storage.begin().unwrap();
            let mut execution = Execution::new(&workflow, json!({ "x": 1 }));
            tx.insert_execution(&mut execution).unwrap();
            tx.commit().unwrap();
        }

        assert!(path.exists());
        let reopened = MemoryStorage::open(&path).unwrap();
        let tx = reopened.begin().unwrap();
        let created = tx
            .find_executions(&ExecutionFilter::oldest_created())
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].context, json!({ "x": 1 }));
    }

    #[test]
    fn test_open_missing_snapshot_is_empty() {
        let dir = tempdir().unwrap();
        let storage = MemoryStorage::open(dir.path().join("absent.json")).unwrap();
        let tx = storage.begin().unwrap();
        assert_eq!(tx.count_workflows(&WorkflowFilter::default()).unwrap(), 0);
    }

    #[test]
    fn test_open_corrupt_snapshot_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            MemoryStorage::open(&path),
            Err(StorageError::Encoding(_))
        ));
    }

    #[test]
    fn test_read_only_commit_leaves_snapshot_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let storage = MemoryStorage::open(&path).unwrap();
        let tx = storage.begin().unwrap();
        assert!(tx.get_workflow(1).unwrap().is_none());
        tx.commit().unwrap();
        assert!(!path.exists());

        insert_workflow(&storage, "a");
        assert!(path.is_file());

        // A snapshot path that can no longer be written only fails writes.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        let tx = storage.begin().unwrap();
        assert_eq!(tx.count_workflows(&WorkflowFilter::default()).unwrap(), 1);
        tx.commit().unwrap();

        let mut tx = storage.begin().unwrap();
        tx.insert_workflow(&mut Workflow::new("b", "interval")).unwrap();
        assert!(matches!(tx.commit(), Err(StorageError::Snapshot { .. })));
        let tx = storage.begin().unwrap();
        assert_eq!(tx.count_workflows(&WorkflowFilter::default()).unwrap(), 1);
    }
}
