pub mod http;
pub mod redis;

pub use self::http::HttpConnector;
pub use self::redis::{RedisConnector, RequestEnvelope, RollbackEnvelope};

use std::time::Instant;

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
