//! Per-request context carried through every facade call.

use omm_common::{OmError, OmResult};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Caller identity, cancellation and lock deadline for one request
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    /// Authenticated user, `None` for anonymous callers
    pub user: Option<String>,
    pub cancel: CancellationToken,
    /// Overrides the configured lock acquisition deadline
    pub lock_timeout: Option<Duration>,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Deadline for lock acquisition, starting now
    #[must_use]
    pub fn lock_deadline(&self, default: Duration) -> Instant {
        Instant::now() + self.lock_timeout.unwrap_or(default)
    }

    /// Fail with `CANCELLED` if the token fired.
    ///
    /// Managers call this immediately before submitting a write batch; once
    /// a batch is submitted the token is no longer consulted.
    pub fn check_cancelled(&self) -> OmResult<()> {
        if self.cancel.is_cancelled() {
            return Err(OmError::Cancelled);
        }
        Ok(())
    }

    #[must_use]
    pub fn user_name(&self) -> &str {
        self.user.as_deref().unwrap_or("anonymous")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omm_common::ResultCode;

    #[test]
    fn test_cancellation() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancel(token.clone());
        assert!(ctx.check_cancelled().is_ok());
        token.cancel();
        assert_eq!(
            ctx.check_cancelled().unwrap_err().code(),
            ResultCode::Cancelled
        );
    }

    #[test]
    fn test_user_name() {
        assert_eq!(RequestContext::new().user_name(), "anonymous");
        assert_eq!(RequestContext::new().with_user("alice").user_name(), "alice");
    }
}
