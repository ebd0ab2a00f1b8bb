//! Messaging gateway: unpin, send and pin against the messaging platform.

pub mod retry;
pub mod telegram;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::events::model::{MessageId, OutboundCard, Topic};

pub use retry::RetryPolicy;
pub use telegram::TelegramGateway;

/// Result of an unpin call. Both variants are success for the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpinOutcome {
    Unpinned,
    /// The message was already unpinned or no longer exists.
    NotFound,
}

/// The three remote operations the relay needs.
///
/// Implementations own their retry policy: a returned error is final.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn unpin(&self, topic: &Topic, id: MessageId) -> Result<UnpinOutcome, GatewayError>;

    async fn send(&self, topic: &Topic, card: &OutboundCard) -> Result<MessageId, GatewayError>;

    async fn pin(&self, topic: &Topic, id: MessageId) -> Result<(), GatewayError>;
}
