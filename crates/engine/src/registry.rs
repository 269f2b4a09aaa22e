//! Task registry – in-flight tasks keyed by caller-supplied id.
//!
//! The map only holds the cancel token and a state tag, never a task's
//! working data. Every critical section is a short map operation.

use crate::error::{CancelError, DispatchError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cooperative cancellation flag shared between the registry and a running task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Cancelled,
    Completed,
}

#[derive(Debug)]
struct TaskRecord {
    cancel: CancelToken,
    state: TaskState,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<u64, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding this lock cannot leave a record half-written,
    // so a poisoned map is still consistent.
    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, TaskRecord>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a record for `task_id`. Any live record with that id is a duplicate.
    pub fn register(&self, task_id: u64) -> Result<CancelToken, DispatchError> {
        let mut tasks = self.tasks();
        if tasks.contains_key(&task_id) {
            return Err(DispatchError::DuplicateTask(task_id));
        }
        let cancel = CancelToken::new();
        tasks.insert(
            task_id,
            TaskRecord {
                cancel: cancel.clone(),
                state: TaskState::Running,
            },
        );
        Ok(cancel)
    }

    /// Signal the task. It stops at its next checkpoint, not immediately.
    pub fn cancel(&self, task_id: u64) -> Result<(), CancelError> {
        let mut tasks = self.tasks();
        let record = tasks
            .get_mut(&task_id)
            .ok_or(CancelError::TaskNotFound(task_id))?;
        record.cancel.cancel();
        record.state = TaskState::Cancelled;
        Ok(())
    }

    /// Mark the task completed and drop its record. Idempotent.
    pub fn complete(&self, task_id: u64) {
        if let Some(mut record) = self.tasks().remove(&task_id) {
            record.state = TaskState::Completed;
            tracing::trace!(task_id, state = ?record.state, "task record removed");
        }
    }

    pub fn state(&self, task_id: u64) -> Option<TaskState> {
        self.tasks().get(&task_id).map(|r| r.state)
    }

    pub fn active(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.tasks().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_duplicate() {
        let reg = TaskRegistry::new();
        reg.register(1).unwrap();
        assert!(matches!(
            reg.register(1),
            Err(DispatchError::DuplicateTask(1))
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_cancel_signals_token() {
        let reg = TaskRegistry::new();
        let token = reg.register(5).unwrap();
        assert!(!token.is_cancelled());
        reg.cancel(5).unwrap();
        assert!(token.is_cancelled());
        assert_eq!(reg.state(5), Some(TaskState::Cancelled));
        // Cancelling twice is harmless while the task winds down.
        reg.cancel(5).unwrap();
    }

    #[test]
    fn test_cancel_unknown_task() {
        let reg = TaskRegistry::new();
        assert!(matches!(reg.cancel(42), Err(CancelError::TaskNotFound(42))));
    }

    #[test]
    fn test_complete_is_idempotent_and_frees_id() {
        let reg = TaskRegistry::new();
        reg.register(3).unwrap();
        reg.complete(3);
        reg.complete(3);
        assert!(reg.is_empty());
        assert!(matches!(reg.cancel(3), Err(CancelError::TaskNotFound(3))));
        reg.register(3).unwrap();
        assert_eq!(reg.active(), vec![3]);
    }
}
