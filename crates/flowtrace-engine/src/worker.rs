//! Pool entry wrapping one RPC endpoint.

use std::sync::Arc;
use std::time::Duration;

use crate::job::Job;

/// One endpoint with at most one job in flight and a rate-limit cooldown.
///
/// Owned by the dispatcher; fetch tasks only ever see the endpoint handle.
#[derive(Debug)]
pub struct Worker<S> {
    id: usize,
    source: Arc<S>,
    active_job: Option<Job>,
    cooldown: Duration,
}

impl<S> Worker<S> {
    pub fn new(id: usize, source: Arc<S>) -> Self {
        Self {
            id,
            source,
            active_job: None,
            cooldown: Duration::ZERO,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn active_job(&self) -> Option<&Job> {
        self.active_job.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.active_job.is_some()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn is_cooling(&self) -> bool {
        !self.cooldown.is_zero()
    }

    /// Marks `job` as in flight. The worker must be idle.
    pub(crate) fn begin(&mut self, job: Job) {
        debug_assert!(self.active_job.is_none(), "worker {} already busy", self.id);
        self.active_job = Some(job);
    }

    pub(crate) fn finish(&mut self) -> Option<Job> {
        self.active_job.take()
    }

    pub(crate) fn penalize(&mut self, penalty: Duration) {
        self.cooldown = penalty;
    }

    /// Shortens the cooldown by one step, clamped at zero.
    pub(crate) fn cool_down(&mut self, step: Duration) -> Duration {
        self.cooldown = self.cooldown.saturating_sub(step);
        self.cooldown
    }
}
