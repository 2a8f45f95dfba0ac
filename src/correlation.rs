//! Request/reply correlation over pub/sub.
//!
//! Outbound requests are registered in the [`PendingRequestTable`] before they are published;
//! replies arriving on this instance's response channel settle them, and a periodic sweep
//! settles whatever never got an answer.

pub mod pending;
pub mod service;
pub mod sharding;

pub use pending::{PendingKey, PendingOutcome, PendingRequestTable};
pub use service::{CorrelationService, Publisher, ReplyDisposition, ReplyEnvelope};
pub use sharding::{fnv1a_32, request_channel};
