//! Inbound events and the cards rendered from them.

pub mod format;
pub mod model;

pub use format::format_card;
pub use model::{
    DeploymentVersion, EventPayload, InboundEvent, MessageId, OutboundCard, StreamKey, Topic,
};
