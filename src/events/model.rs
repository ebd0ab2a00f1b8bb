//! Event model: stream keys, topics, inbound events and outbound cards.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Identifies one serialization domain and its pinned status message.
///
/// Used verbatim as the state-store key, so it must never be rewritten
/// between releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chat (and optional forum thread) on the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
}

impl Topic {
    pub fn new(chat_id: impl Into<String>, thread_id: Option<i64>) -> Self {
        Self {
            chat_id: chat_id.into(),
            thread_id,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.thread_id {
            Some(thread) => write!(f, "{}#{}", self.chat_id, thread),
            None => f.write_str(&self.chat_id),
        }
    }
}

/// Message id assigned by the messaging platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version tag attached to every telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentVersion(pub String);

impl Default for DeploymentVersion {
    fn default() -> Self {
        Self(env!("CARGO_PKG_VERSION").to_string())
    }
}

impl fmt::Display for DeploymentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire shape of a webhook body before validation.
///
/// Every field is optional here so that missing fields produce a precise
/// [`ValidationError`] instead of a generic serde message.
#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    action: Option<String>,
    #[serde(alias = "subjectId")]
    subject_id: Option<serde_json::Value>,
    source: Option<String>,
    title: Option<String>,
    url: Option<String>,
    actor: Option<String>,
    status: Option<String>,
}

/// A validated webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPayload {
    pub action: String,
    pub subject_id: i64,
    pub source: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub actor: Option<String>,
    pub status: Option<String>,
}

impl EventPayload {
    /// Parse and validate a raw JSON body.
    pub fn parse(body: &[u8]) -> Result<Self, ValidationError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
        if !value.is_object() {
            return Err(ValidationError::InvalidJson(
                "expected a JSON object".into(),
            ));
        }
        let raw: RawPayload = serde_json::from_value(value)
            .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;

        let action = required_text(raw.action, "action")?;
        let source = required_text(raw.source, "source")?;
        let subject_id = match raw.subject_id {
            None | Some(serde_json::Value::Null) => {
                return Err(ValidationError::MissingField("subject_id"));
            }
            Some(v) => v.as_i64().ok_or_else(|| ValidationError::InvalidField {
                field: "subject_id",
                reason: format!("expected an integer, got {v}"),
            })?,
        };

        Ok(Self {
            action,
            subject_id,
            source,
            title: optional_text(raw.title),
            url: optional_text(raw.url),
            actor: optional_text(raw.actor),
            status: optional_text(raw.status),
        })
    }
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value.map(|s| s.trim().to_string()) {
        Some(s) if !s.is_empty() => Ok(s),
        Some(_) => Err(ValidationError::InvalidField {
            field,
            reason: "must not be empty".into(),
        }),
        None => Err(ValidationError::MissingField(field)),
    }
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// An event accepted by the router, bound to its stream and topic.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: Uuid,
    pub stream_key: StreamKey,
    pub topic: Topic,
    pub action: String,
    pub subject_id: i64,
    pub source: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub actor: Option<String>,
    pub status: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(stream_key: StreamKey, topic: Topic, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream_key,
            topic,
            action: payload.action,
            subject_id: payload.subject_id,
            source: payload.source,
            title: payload.title,
            url: payload.url,
            actor: payload.actor,
            status: payload.status,
            received_at: Utc::now(),
        }
    }
}

/// Text of the status message sent for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCard {
    pub text: String,
}
