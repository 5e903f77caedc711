//! Task queue: the ordered work of one run.
//!
//! Built fresh from the latest progress snapshot on every invocation and
//! consumed exactly once. Ordering follows the universe, so a resumed run
//! continues in the same relative order.

use crate::model::{ProgressState, Task};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    planned: usize,
    already_completed: usize,
}

impl TaskQueue {
    /// Build the queue: drop codes already in `progress.completed`, then
    /// truncate the remainder to `limit`.
    pub fn build<I, S>(universe: I, progress: &ProgressState, limit: Option<usize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build_filtered(universe, |code| progress.is_completed(code), limit)
    }

    /// Build the queue without consulting progress (fresh run).
    pub fn build_all<I, S>(universe: I, limit: Option<usize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build_filtered(universe, |_| false, limit)
    }

    fn build_filtered<I, S, F>(universe: I, is_done: F, limit: Option<usize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn(&str) -> bool,
    {
        let cap = limit.unwrap_or(usize::MAX);
        let mut seen = HashSet::new();
        let mut tasks = VecDeque::new();
        let mut already_completed = 0;

        for (ordinal, code) in universe.into_iter().enumerate() {
            let code = code.as_ref();
            if !seen.insert(code.to_string()) {
                continue;
            }
            if is_done(code) {
                already_completed += 1;
                continue;
            }
            if tasks.len() < cap {
                tasks.push_back(Task::new(code, ordinal));
            }
        }

        Self {
            planned: tasks.len(),
            tasks,
            already_completed,
        }
    }

    /// Take the next task. Returns None once the queue is exhausted.
    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Tasks not yet handed out.
    pub fn remaining(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in the queue at build time.
    pub fn planned(&self) -> usize {
        self.planned
    }

    /// Universe codes excluded because progress already had them completed.
    pub fn already_completed(&self) -> usize {
        self.already_completed
    }
}

impl Iterator for TaskQueue {
    type Item = Task;

    fn next(&mut self) -> Option<Task> {
        self.pop()
    }
}
