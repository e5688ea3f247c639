//! Dependency-aware task queue
//!
//! Every known task id lives in at most one of four sets:
//!
//! - `ready`: FIFO of tasks whose dependencies are all done
//! - `claimed`: handed out by [`TaskQueue::dequeue`], not re-offered until requeued
//! - `blocked`: waiting on at least one dependency
//! - `done`: completed (and possibly verified)
//!
//! Failed and investigation tasks are known but in no set.

use coe_core::{CoeError, Result, Task, TaskId, TaskStatus, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Read-only counts of a queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub total: usize,
    pub ready: usize,
    pub claimed: usize,
    pub blocked: usize,
    pub done: usize,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: HashMap<TaskId, Task>,
    /// Enqueue order, used for deterministic promotion
    order: Vec<TaskId>,
    ready: VecDeque<TaskId>,
    claimed: HashSet<TaskId>,
    blocked: HashSet<TaskId>,
    done: HashSet<TaskId>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// All known tasks in enqueue order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            total: self.tasks.len(),
            ready: self.ready.len(),
            claimed: self.claimed.len(),
            blocked: self.blocked.len(),
            done: self.done.len(),
        }
    }

    /// Add or replace a task, placing it in `ready` or `blocked`
    pub fn enqueue(&mut self, task: Task) -> TaskStatus {
        let id = task.id.clone();
        if self.tasks.contains_key(&id) {
            self.detach(&id);
        } else {
            self.order.push(id.clone());
        }
        self.tasks.insert(id.clone(), task);
        self.place(&id)
    }

    /// Take the head of the ready queue
    pub fn dequeue(&mut self) -> Option<Task> {
        let id = self.ready.pop_front()?;
        self.claimed.insert(id.clone());
        let task = self.tasks.get_mut(&id)?;
        task.set_status(TaskStatus::InProgress);
        debug!(task_id = %id, "Task claimed");
        Some(task.clone())
    }

    /// Mark a claimed task done and promote newly unblocked tasks
    ///
    /// Returns the promoted ids in enqueue order.
    pub fn complete(&mut self, id: &str) -> Result<Vec<TaskId>> {
        self.ensure_known(id)?;
        if !self.claimed.remove(id) {
            return Err(CoeError::InvalidTransition(format!(
                "task {} is {}, only claimed tasks can complete",
                id,
                self.status_of(id)
            )));
        }
        self.done.insert(id.to_string());
        self.set_status(id, TaskStatus::Done);

        let promotable: Vec<TaskId> = self
            .order
            .iter()
            .filter(|t| self.blocked.contains(*t) && self.dependencies_met(t))
            .cloned()
            .collect();
        for t in &promotable {
            self.blocked.remove(t);
            self.ready.push_back(t.clone());
            self.set_status(t, TaskStatus::Ready);
        }
        if !promotable.is_empty() {
            debug!(task_id = %id, promoted = ?promotable, "Dependents unblocked");
        }
        Ok(promotable)
    }

    /// Put a task back in line
    ///
    /// Tasks already ready or blocked are left where they are.
    pub fn requeue(&mut self, id: &str) -> Result<TaskStatus> {
        self.ensure_known(id)?;
        match self.status_of(id) {
            status @ (TaskStatus::Ready | TaskStatus::Blocked) => Ok(status),
            _ => {
                self.detach(id);
                Ok(self.place(id))
            }
        }
    }

    /// Mark a task failed and drop it from every set
    pub fn fail(&mut self, id: &str) -> Result<()> {
        self.ensure_known(id)?;
        self.detach(id);
        self.set_status(id, TaskStatus::Failed);
        Ok(())
    }

    /// Apply a verification verdict to a done task
    ///
    /// A pass moves it to `verified` (still counted as done for dependents);
    /// a fail moves it to `investigation` and out of `done`.
    pub fn record_verification(&mut self, id: &str, verdict: &Verdict) -> Result<TaskStatus> {
        self.ensure_known(id)?;
        if !self.done.contains(id) {
            return Err(CoeError::InvalidTransition(format!(
                "task {} is {}, only done tasks can be verified",
                id,
                self.status_of(id)
            )));
        }

        let status = if verdict.passed {
            TaskStatus::Verified
        } else {
            self.done.remove(id);
            TaskStatus::Investigation
        };
        self.set_status(id, status);
        Ok(status)
    }

    /// Ids of tasks whose feature is in `feature_ids`, in enqueue order
    pub fn tasks_for_features(&self, feature_ids: &HashSet<String>) -> Vec<TaskId> {
        self.tasks()
            .filter(|t| {
                t.feature_id
                    .as_ref()
                    .is_some_and(|f| feature_ids.contains(f))
            })
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.order.clear();
        self.ready.clear();
        self.claimed.clear();
        self.blocked.clear();
        self.done.clear();
    }

    fn ensure_known(&self, id: &str) -> Result<()> {
        if self.tasks.contains_key(id) {
            Ok(())
        } else {
            Err(CoeError::TaskNotFound(id.to_string()))
        }
    }

    fn status_of(&self, id: &str) -> TaskStatus {
        self.tasks.get(id).map(|t| t.status).unwrap_or_default()
    }

    fn set_status(&mut self, id: &str, status: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(id) {
            task.set_status(status);
        }
    }

    fn dependencies_met(&self, id: &str) -> bool {
        self.tasks
            .get(id)
            .map(|t| t.dependencies.iter().all(|d| self.done.contains(d)))
            .unwrap_or(false)
    }

    fn detach(&mut self, id: &str) {
        self.ready.retain(|t| t != id);
        self.claimed.remove(id);
        self.blocked.remove(id);
        self.done.remove(id);
    }

    /// Insert a detached task into `ready` or `blocked`
    fn place(&mut self, id: &str) -> TaskStatus {
        let status = if self.dependencies_met(id) {
            self.ready.push_back(id.to_string());
            TaskStatus::Ready
        } else {
            self.blocked.insert(id.to_string());
            TaskStatus::Blocked
        };
        self.set_status(id, status);
        status
    }
}
