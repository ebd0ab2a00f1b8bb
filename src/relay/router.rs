//! Event router: resolves a route hint and dispatches to the owning actor.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::actor::ProcessedEvent;
use super::registry::ActorRegistry;
use crate::config::{Route, RouteTable};
use crate::error::{RelayError, ValidationError};
use crate::events::model::{DeploymentVersion, EventPayload, InboundEvent};
use crate::telemetry::{EventOutcome, TelemetryRecord, TelemetrySink};

/// Routes inbound payloads to stream actors.
pub struct EventRouter {
    routes: RouteTable,
    registry: Arc<ActorRegistry>,
    telemetry: Arc<dyn TelemetrySink>,
    deployment_version: DeploymentVersion,
}

impl EventRouter {
    pub fn new(
        routes: RouteTable,
        registry: Arc<ActorRegistry>,
        telemetry: Arc<dyn TelemetrySink>,
        deployment_version: DeploymentVersion,
    ) -> Self {
        Self {
            routes,
            registry,
            telemetry,
            deployment_version,
        }
    }

    /// Resolve a hint. Absent, blank or unknown hints fall back to the
    /// default route.
    pub fn resolve(&self, hint: Option<&str>) -> &Route {
        match hint.map(str::trim).filter(|h| !h.is_empty()) {
            Some(h) => match self.routes.get(h) {
                Some(route) => route,
                None => {
                    debug!(hint = h, "Unknown route hint; using default route");
                    self.routes.default_route()
                }
            },
            None => self.routes.default_route(),
        }
    }

    /// Validate a body and bind it to its route.
    pub fn accept(&self, hint: Option<&str>, body: &[u8]) -> Result<InboundEvent, ValidationError> {
        let payload = EventPayload::parse(body)?;
        let route = self.resolve(hint);
        Ok(InboundEvent::new(
            route.stream_key.clone(),
            route.topic.clone(),
            payload,
        ))
    }

    /// Validate, then hand the event to its actor and wait for the result.
    pub async fn dispatch(
        &self,
        hint: Option<&str>,
        body: &[u8],
    ) -> Result<ProcessedEvent, RelayError> {
        let started = Instant::now();
        let event = match self.accept(hint, body) {
            Ok(event) => event,
            Err(e) => {
                let route = self.resolve(hint);
                warn!(stream_key = %route.stream_key, error = %e, "Rejected inbound event");
                self.telemetry.record(&TelemetryRecord {
                    stream_key: route.stream_key.clone(),
                    deployment_version: self.deployment_version.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    outcome: EventOutcome::Rejected,
                });
                return Err(e.into());
            }
        };

        debug!(
            stream_key = %event.stream_key,
            topic = %event.topic,
            event_id = %event.id,
            action = %event.action,
            "Dispatching event"
        );
        self.registry.submit(event).await
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }
}
