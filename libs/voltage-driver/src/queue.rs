//! FIFO task queue of one connection

use std::collections::VecDeque;

use errors::PlcError;

use crate::connection::ConnectionCore;
use crate::execution::TaskId;
use crate::task::Task;

/// Outcome of one pass over a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Tasks stepped (or discarded) in this pass
    pub visited: usize,
    /// Tasks that completed and left the queue
    pub completed: usize,
    /// Tasks still queued after the pass
    pub remaining: usize,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|task| task.id() == id)
    }

    /// Queued tasks in FIFO order
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Step every task queued at the start of the pass exactly once
    ///
    /// Each task is moved out of the queue while it is stepped and moved to
    /// the tail unless it completed. Completed tasks leave the queue and the
    /// running task count of `core` is decremented.
    pub fn run_pass(&mut self, core: &mut ConnectionCore) -> PassStats {
        let mut stats = PassStats::default();
        let batch = self.tasks.len();
        for _ in 0..batch {
            let Some(mut task) = self.tasks.pop_front() else {
                break;
            };
            stats.visited += 1;
            if task.poll(core) {
                stats.completed += 1;
                core.task_removed();
            } else {
                self.tasks.push_back(task);
            }
        }
        stats.remaining = self.tasks.len();
        stats
    }

    /// Fail and drop every queued task
    pub fn abort_all(&mut self, err: &PlcError) -> usize {
        let count = self.tasks.len();
        for mut task in self.tasks.drain(..) {
            task.abort(err.clone());
        }
        count
    }
}
