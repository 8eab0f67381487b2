//! Shared types for the stream relay: push-stream wire frames, topic table,
//! inbound event payloads, hype-train aggregation and the RCON packet codec.

pub mod events;
pub mod hype_train;
pub mod pubsub_ipc;
pub mod rcon;
pub mod topics;

pub use events::PayloadError;
pub use hype_train::{HypeTrainEvent, HypeTrainOutcome, MeterError, ProgressMeter};
pub use pubsub_ipc::{
    decode_frame, encode_frame, InboundFrame, MessageData, OutboundFrame, SubscriptionRequest,
    WireError,
};
pub use topics::TopicKind;
