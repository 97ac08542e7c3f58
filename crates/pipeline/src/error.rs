use thiserror::Error;

use crate::channel::ChannelError;
use crate::codec::DecodeError;

/// The single error type every stage reports to its driver.
///
/// Lower-level failures are folded into one of these variants so that logs
/// carry a stable [`code`](ProcessingError::code) next to the detail.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("message channel failure: {0}")]
    Channel(#[from] ChannelError),

    #[error("call to {target} failed: {detail}")]
    DownstreamCall { target: String, detail: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

impl ProcessingError {
    pub fn downstream(target: impl Into<String>, detail: impl ToString) -> Self {
        Self::DownstreamCall { target: target.into(), detail: detail.to_string() }
    }

    /// Stable identifier for dashboards and log queries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DECODE_ERROR",
            Self::Encode(_) => "ENCODE_ERROR",
            Self::Channel(_) => "CHANNEL_ERROR",
            Self::DownstreamCall { .. } => "DOWNSTREAM_CALL_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
        }
    }

    /// Whether redelivering the same message can ever succeed.
    ///
    /// The channel still redelivers permanent failures until the visibility
    /// timeout runs out; this only informs logging and dead-letter policy.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Encode(_) | Self::NotFound { .. })
    }
}
