//! # Backend session
//!
//! The dispatcher never talks to a concrete backend type; it talks to this
//! trait. [`tcp::TcpBackendSession`] is the real implementation, round-
//! tripping RESP commands over a socket; [`mock::MockBackendSession`] is an
//! in-memory stand-in used by the dispatcher's own tests and by the
//! end-to-end scenarios this crate is validated against.

pub mod mock;
pub mod tcp;

use crate::errors::BackendError;
use tokio_util::sync::CancellationToken;

/// Per-call context: a cancellation signal plus an optional deadline.
///
/// Every [`BackendSession`] method takes one of these. The reference
/// configuration never sets a deadline, but the type always threads one
/// through so a future revision can add per-request timeouts without
/// touching the trait surface.
#[derive(Clone)]
pub struct CallContext {
    pub cancellation: CancellationToken,
    pub deadline: Option<tokio::time::Instant>,
}

impl CallContext {
    pub fn background() -> CallContext {
        CallContext {
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn child(&self) -> CallContext {
        CallContext {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }
}

/// One command's worth of capability against a single backend instance.
///
/// Every method is a native `async fn` — no `dyn` dispatch on the hot path,
/// no `async-trait` boxing. The session registry stores one boxed enum (or
/// generic) per backend address; dispatch always knows the concrete type at
/// the call site.
pub trait BackendSession: Send + Sync {
    async fn ping(&self, ctx: &CallContext) -> Result<(), BackendError>;

    async fn get(&self, ctx: &CallContext, key: &str) -> Result<String, BackendError>;

    /// `expire` is a relative TTL; `None` means no expiry.
    async fn set(
        &self,
        ctx: &CallContext,
        key: &str,
        value: &str,
        expire: Option<std::time::Duration>,
    ) -> Result<(), BackendError>;

    async fn hget(&self, ctx: &CallContext, key: &str, field: &str) -> Result<String, BackendError>;

    async fn hset(
        &self,
        ctx: &CallContext,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), BackendError>;

    /// Deletes every key in `keys` that exists on this backend and returns
    /// the count actually removed.
    async fn del(&self, ctx: &CallContext, keys: &[String]) -> Result<i64, BackendError>;

    /// Counts how many of `keys` exist on this backend.
    async fn exists(&self, ctx: &CallContext, keys: &[String]) -> Result<i64, BackendError>;

    async fn keys(&self, ctx: &CallContext, pattern: &str) -> Result<Vec<String>, BackendError>;

    async fn append(&self, ctx: &CallContext, key: &str, value: &str) -> Result<i64, BackendError>;

    async fn incr_by(&self, ctx: &CallContext, key: &str, delta: i64) -> Result<i64, BackendError>;

    async fn decr_by(&self, ctx: &CallContext, key: &str, delta: i64) -> Result<i64, BackendError>;

    /// Seconds remaining, 0 if the key has no expiry, -2 if it doesn't exist.
    async fn ttl(&self, ctx: &CallContext, key: &str) -> Result<i64, BackendError>;

    /// Returns 1 if an expiry was set, 0 if the key doesn't exist.
    async fn expire(&self, ctx: &CallContext, key: &str, seconds: u64) -> Result<i64, BackendError>;
}
