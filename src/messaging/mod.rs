//! # Messaging Module
//!
//! Wire envelope for task invocations and the codec boundary brokers use to move it.

pub mod codec;
pub mod message;

pub use codec::{JsonCodec, MessageCodec};
pub use message::*;
