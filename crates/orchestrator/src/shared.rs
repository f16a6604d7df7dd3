//! Run state shared between the handle and the run task.
//!
//! Every transition and the broadcast of its events happen under one lock,
//! so observers see events in exactly the order the state changed.

use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::{ContractError, PipelineEvent, PipelineRun, Transition};
use observability::record_event_metrics;
use tokio::sync::broadcast;
use tracing::trace;

pub(crate) struct Shared {
    run: Mutex<PipelineRun>,
    events: broadcast::Sender<PipelineEvent>,
}

impl Shared {
    pub(crate) fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            run: Mutex::new(PipelineRun::new()),
            events,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PipelineRun> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> PipelineRun {
        self.lock().clone()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Apply a transition to whatever run is current.
    pub(crate) fn apply(&self, transition: Transition) -> Result<(), ContractError> {
        let mut run = self.lock();
        self.apply_locked(&mut run, transition)
    }

    /// Apply transitions atomically on behalf of run `run_id`.
    ///
    /// Returns `Ok(false)` without touching anything if that run has been
    /// reset in the meantime.
    pub(crate) fn apply_for(
        &self,
        run_id: u64,
        transitions: impl IntoIterator<Item = Transition>,
    ) -> Result<bool, ContractError> {
        let mut run = self.lock();
        if run.run_id != run_id {
            trace!(run_id, current = run.run_id, "dropping transition from stale run");
            return Ok(false);
        }
        for transition in transitions {
            self.apply_locked(&mut run, transition)?;
        }
        Ok(true)
    }

    pub(crate) fn apply_locked(
        &self,
        run: &mut PipelineRun,
        transition: Transition,
    ) -> Result<(), ContractError> {
        for event in run.apply(transition)? {
            record_event_metrics(&event);
            // No subscribers is fine; the snapshot stays authoritative
            let _ = self.events.send(event);
        }
        Ok(())
    }
}
