//! Pull-based task pool.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::task::Task;

/// A shared FIFO of pending tasks.
///
/// Cloning the pool returns another handle to the same queue. Every task is
/// handed out to exactly one caller of [`TaskPool::next_task`] and is never
/// re-delivered.
#[derive(Debug, Clone, Default)]
pub struct TaskPool {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl TaskPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `tasks` in order.
    pub fn push_all(&self, tasks: impl IntoIterator<Item = Task>) {
        self.lock().extend(tasks);
    }

    /// Takes the next task, or returns `None` immediately if the pool is empty.
    pub fn next_task(&self) -> Option<Task> {
        self.lock().pop_front()
    }

    /// Returns the number of tasks left.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no tasks are left.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The queue is consistent between every operation, so a poisoned lock is
    // still safe to use.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
