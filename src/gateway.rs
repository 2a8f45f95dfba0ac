//! HTTP dispatch engine: staged invocation, merging and compensation.

pub mod handler;
pub mod hooks;
pub mod merge;
pub mod rollback;
pub mod stages;

pub use handler::HttpGateway;
pub use hooks::{
    HookSet, HttpHooks, NoopHooks, RequestDecision, RequestGuard, ResponseCache,
};
pub use merge::{
    apply_generic_errors, merge_responses, prepare_for_merge, BodyKind, GENERIC_ERROR_BODY,
};
pub use rollback::RollbackCoordinator;
pub use stages::{sort_into_stages, StageConfig, StageScheduler};
