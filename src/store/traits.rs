//! `StateStore` trait: durable per-stream state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::events::model::{MessageId, StreamKey};

/// The persisted state of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorState {
    pub stream_key: StreamKey,
    pub pinned_message_id: Option<MessageId>,
    pub updated_at: DateTime<Utc>,
}

impl ActorState {
    /// State recording `message_id` as the currently pinned message.
    pub fn pinned(stream_key: StreamKey, message_id: MessageId) -> Self {
        Self {
            stream_key,
            pinned_message_id: Some(message_id),
            updated_at: Utc::now(),
        }
    }
}

/// Keyed store for [`ActorState`].
///
/// Each key is read and written only by the actor that owns it, so no
/// cross-key transactions are offered.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the state for a stream. `None` means nothing was ever pinned.
    async fn get_state(&self, key: &StreamKey) -> Result<Option<ActorState>, DatabaseError>;

    /// Insert or replace the state for `state.stream_key`.
    async fn put_state(&self, state: &ActorState) -> Result<(), DatabaseError>;

    /// All stored states, ordered by stream key.
    async fn list_states(&self) -> Result<Vec<ActorState>, DatabaseError>;
}
