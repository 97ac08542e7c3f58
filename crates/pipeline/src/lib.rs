//! Pipeline plumbing for the eService probing stages.
//!
//! Stages never call each other directly. Every hop goes through a
//! [`MessageChannel`], payloads are encoded with the [`codec`], and consumers
//! are driven one invocation at a time through a [`Consumer`].

pub mod channel;
pub mod codec;
pub mod consumer;
pub mod correlation;
pub mod error;
pub mod messages;
pub mod pool;
pub mod publisher;

pub use channel::{
    ChannelError, ChannelSettings, LibsqlChannel, MemoryChannel, MessageAttributes,
    MessageChannel, OutgoingMessage, ReceiveOptions, ReceivedMessage,
};
pub use codec::{DecodeError, DecodeErrorKind, Decoded, Validate, decode, encode};
pub use consumer::{ConsumeOutcome, Consumer, ConsumerConfig, MessageHandler};
pub use correlation::{CORRELATION_ID_ATTRIBUTE, CorrelationContext};
pub use error::ProcessingError;
pub use messages::{
    EServiceState, ProbeRequest, ProbeStatus, RegistryEntry, ResponseReceivedUpdate, Technology,
    TelemetryResult,
};
pub use publisher::Publisher;
