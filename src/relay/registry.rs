//! Actor registry: finds or spawns the actor that owns a stream key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::warn;

use super::actor::{ActorDeps, ActorHandle, Job, ProcessedEvent};
use crate::error::RelayError;
use crate::events::model::{InboundEvent, StreamKey};

/// Map from stream key to its actor, created atomically on first use.
///
/// The lock covers lookup, spawn and enqueue only, so queue order matches
/// the order in which callers reached the registry. Awaiting the result
/// happens outside the lock.
pub struct ActorRegistry {
    deps: Arc<ActorDeps>,
    actors: Mutex<HashMap<StreamKey, ActorHandle>>,
}

impl ActorRegistry {
    pub fn new(deps: ActorDeps) -> Arc<Self> {
        Arc::new(Self {
            deps: Arc::new(deps),
            actors: Mutex::new(HashMap::new()),
        })
    }

    /// Queue `event` on its stream's actor and wait for the outcome.
    pub async fn submit(&self, event: InboundEvent) -> Result<ProcessedEvent, RelayError> {
        let stream_key = event.stream_key.clone();
        let (reply, rx) = oneshot::channel();
        self.enqueue(Job { event, reply })?;
        rx.await
            .map_err(|_| RelayError::ActorUnavailable(stream_key))?
    }

    fn enqueue(&self, job: Job) -> Result<(), RelayError> {
        let key = job.event.stream_key.clone();
        let mut actors = self.actors.lock().unwrap_or_else(|e| e.into_inner());

        let handle = actors
            .entry(key.clone())
            .or_insert_with(|| ActorHandle::spawn(key.clone(), Arc::clone(&self.deps)));

        match handle.enqueue(job) {
            Ok(()) => Ok(()),
            Err(job) => {
                warn!(stream_key = %key, "Stream actor gone; respawning");
                let fresh = ActorHandle::spawn(key.clone(), Arc::clone(&self.deps));
                fresh
                    .enqueue(job)
                    .map_err(|_| RelayError::ActorUnavailable(key.clone()))?;
                actors.insert(key, fresh);
                Ok(())
            }
        }
    }

    /// Number of stream keys with a live actor.
    pub fn active_streams(&self) -> usize {
        let actors = self.actors.lock().unwrap_or_else(|e| e.into_inner());
        actors.values().filter(|h| !h.is_closed()).count()
    }
}
