//! Per-stream actor: one serialized execution unit per stream key.
//!
//! Each actor owns an unbounded FIFO of jobs and runs them one at a time:
//! read state, unpin the previous message, send the new card, pin it,
//! persist. Event N finishes (or aborts) before event N+1 reads state.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{DatabaseError, GatewayError, RelayError};
use crate::events::format_card;
use crate::events::model::{DeploymentVersion, InboundEvent, MessageId, StreamKey, Topic};
use crate::gateway::{MessagingGateway, UnpinOutcome};
use crate::store::{ActorState, StateStore};
use crate::telemetry::{EventOutcome, TelemetryRecord, TelemetrySink};

/// Tunables shared by every actor.
#[derive(Debug, Clone)]
pub struct ActorSettings {
    pub deployment_version: DeploymentVersion,
    /// Bound on each state store call.
    pub store_timeout: Duration,
    /// Outer bound on each gateway call, retries included.
    pub gateway_timeout: Duration,
    /// Extra pin attempts after a successful send.
    pub pin_retries: u32,
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            deployment_version: DeploymentVersion::default(),
            store_timeout: Duration::from_secs(5),
            gateway_timeout: Duration::from_secs(60),
            pin_retries: 1,
        }
    }
}

/// Collaborators every actor talks to.
pub struct ActorDeps {
    pub store: Arc<dyn StateStore>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub settings: ActorSettings,
}

/// Result of a fully processed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEvent {
    pub stream_key: StreamKey,
    pub message_id: MessageId,
    pub previous_message_id: Option<MessageId>,
    /// The previous message could not be unpinned.
    pub unpin_failed: bool,
    pub outcome: EventOutcome,
    pub duration_ms: u64,
}

/// Steps 1–6 finished; what happened along the way.
struct Delivery {
    message_id: MessageId,
    previous_message_id: Option<MessageId>,
    unpin_failed: bool,
}

/// One queued event and where to send its result.
pub(crate) struct Job {
    pub event: InboundEvent,
    pub reply: oneshot::Sender<Result<ProcessedEvent, RelayError>>,
}

/// Sending side of an actor's queue.
#[derive(Clone)]
pub struct ActorHandle {
    stream_key: StreamKey,
    tx: mpsc::UnboundedSender<Job>,
}

impl ActorHandle {
    /// Spawn the actor task for `stream_key`.
    pub fn spawn(stream_key: StreamKey, deps: Arc<ActorDeps>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Arc::new(StreamActor {
            stream_key: stream_key.clone(),
            deps,
        });
        tokio::spawn(actor.run(rx));
        debug!(stream_key = %stream_key, "Stream actor spawned");
        Self { stream_key, tx }
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.stream_key
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue a job, handing it back if the actor is gone.
    pub(crate) fn enqueue(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|e| e.0)
    }
}

struct StreamActor {
    stream_key: StreamKey,
    deps: Arc<ActorDeps>,
}

impl StreamActor {
    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Job>) {
        while let Some(Job { event, reply }) = rx.recv().await {
            let started = Instant::now();
            let event_id = event.id;

            // A panic while processing must not take the queue down with it.
            let actor = Arc::clone(&self);
            let result = match tokio::spawn(async move { actor.process(&event).await }).await {
                Ok(result) => result,
                Err(e) => {
                    error!(stream_key = %self.stream_key, %event_id, error = %e, "Event processing aborted");
                    Err(RelayError::ActorUnavailable(self.stream_key.clone()))
                }
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            let outcome = match &result {
                Ok(delivery) if delivery.unpin_failed => EventOutcome::Degraded,
                Ok(_) => EventOutcome::Delivered,
                Err(e) => failure_outcome(e),
            };
            self.deps.telemetry.record(&TelemetryRecord {
                stream_key: self.stream_key.clone(),
                deployment_version: self.deps.settings.deployment_version.clone(),
                duration_ms,
                outcome,
            });

            let processed = result.map(|delivery| ProcessedEvent {
                stream_key: self.stream_key.clone(),
                message_id: delivery.message_id,
                previous_message_id: delivery.previous_message_id,
                unpin_failed: delivery.unpin_failed,
                outcome,
                duration_ms,
            });
            match &processed {
                Ok(p) => info!(
                    stream_key = %self.stream_key,
                    %event_id,
                    message_id = %p.message_id,
                    duration_ms,
                    outcome = outcome.as_str(),
                    "Event processed"
                ),
                Err(e) => warn!(
                    stream_key = %self.stream_key,
                    %event_id,
                    duration_ms,
                    outcome = outcome.as_str(),
                    error = %e,
                    "Event failed"
                ),
            }

            // Caller may have gone away; the work is done either way.
            let _ = reply.send(processed);
        }
        debug!(stream_key = %self.stream_key, "Stream actor stopped");
    }

    async fn process(&self, event: &InboundEvent) -> Result<Delivery, RelayError> {
        let deps = &self.deps;

        // 1. Current state
        let state = self
            .store_call("get_state", deps.store.get_state(&self.stream_key))
            .await?;
        let previous = state.and_then(|s| s.pinned_message_id);

        // 2. Unpin whatever is recorded; not-found counts as done
        let mut unpin_failed = false;
        if let Some(prev) = previous {
            match self
                .gateway_call("unpin", deps.gateway.unpin(&event.topic, prev))
                .await
            {
                Ok(UnpinOutcome::Unpinned) => {
                    debug!(stream_key = %self.stream_key, message_id = %prev, "Previous message unpinned");
                }
                Ok(UnpinOutcome::NotFound) => {
                    debug!(stream_key = %self.stream_key, message_id = %prev, "Previous message already unpinned");
                }
                Err(e) => {
                    warn!(stream_key = %self.stream_key, message_id = %prev, error = %e, "Unpin failed; continuing");
                    unpin_failed = true;
                }
            }
        }

        // 3. Card
        let card = format_card(event);

        // 4. Send; failure ends the event here
        let message_id = self
            .gateway_call("send", deps.gateway.send(&event.topic, &card))
            .await
            .map_err(RelayError::Send)?;

        // 5. Pin
        self.pin_with_retries(&event.topic, message_id)
            .await
            .map_err(RelayError::Pin)?;

        // 6. Persist; only now is the event complete
        self.store_call(
            "put_state",
            deps.store
                .put_state(&ActorState::pinned(self.stream_key.clone(), message_id)),
        )
        .await?;

        Ok(Delivery {
            message_id,
            previous_message_id: previous,
            unpin_failed,
        })
    }

    async fn pin_with_retries(&self, topic: &Topic, id: MessageId) -> Result<(), GatewayError> {
        let attempts = self.deps.settings.pin_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .gateway_call("pin", self.deps.gateway.pin(topic, id))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        stream_key = %self.stream_key,
                        message_id = %id,
                        attempt,
                        error = %e,
                        "Pin failed after send; retrying pin"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn store_call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, DatabaseError>>,
    ) -> Result<T, DatabaseError> {
        let timeout = self.deps.settings.store_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout { operation, timeout }),
        }
    }

    async fn gateway_call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        let timeout = self.deps.settings.gateway_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::transient(
                operation,
                format!("no result within {timeout:?}"),
            )),
        }
    }
}

fn failure_outcome(err: &RelayError) -> EventOutcome {
    match err {
        RelayError::Validation(_) => EventOutcome::Rejected,
        RelayError::Send(_) => EventOutcome::SendFailed,
        RelayError::Pin(_) => EventOutcome::PinFailed,
        RelayError::Persistence(_) => EventOutcome::PersistFailed,
        RelayError::ActorUnavailable(_) => EventOutcome::Aborted,
    }
}
