//! # Message Codec
//!
//! Brokers move bytes; the codec turns [`TaskMessage`]s into bytes and back. Concrete
//! codecs are pluggable, JSON is the default.

use crate::error::{QueueError, QueueResult};
use crate::messaging::TaskMessage;

/// Encodes and decodes task messages for transport
pub trait MessageCodec: Send + Sync + 'static {
    /// Serialize a message for the broker
    fn encode(&self, message: &TaskMessage) -> QueueResult<Vec<u8>>;

    /// Deserialize a message received from the broker
    fn decode(&self, payload: &[u8]) -> QueueResult<TaskMessage>;

    /// Codec name for logging
    fn name(&self) -> &str;
}

/// JSON codec backed by serde_json
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &TaskMessage) -> QueueResult<Vec<u8>> {
        serde_json::to_vec(message).map_err(QueueError::from)
    }

    fn decode(&self, payload: &[u8]) -> QueueResult<TaskMessage> {
        serde_json::from_slice(payload).map_err(QueueError::from)
    }

    fn name(&self) -> &str {
        "json"
    }
}
