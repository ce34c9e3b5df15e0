//! Pending job queues.

use std::collections::VecDeque;

use crate::job::Job;

/// Normal and priority FIFO queues. Priority is drained first.
#[derive(Debug, Default)]
pub struct JobQueues {
    normal: VecDeque<Job>,
    priority: VecDeque<Job>,
}

impl JobQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: Job) {
        self.normal.push_back(job);
    }

    pub fn push_priority(&mut self, job: Job) {
        self.priority.push_back(job);
    }

    pub fn extend(&mut self, jobs: impl IntoIterator<Item = Job>) {
        self.normal.extend(jobs);
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.priority
            .pop_front()
            .or_else(|| self.normal.pop_front())
    }

    pub fn len(&self) -> usize {
        self.normal.len() + self.priority.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normal.is_empty() && self.priority.is_empty()
    }

    pub fn normal_len(&self) -> usize {
        self.normal.len()
    }

    pub fn priority_len(&self) -> usize {
        self.priority.len()
    }

    /// Jobs in the order they would be popped.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.priority.iter().chain(self.normal.iter())
    }

    pub fn clear(&mut self) {
        self.normal.clear();
        self.priority.clear();
    }
}
