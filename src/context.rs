//! Cancellation and deadlines for external command invocations.
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation signal checked by the executor while a child runs.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Carried into every operation that may launch a process.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fail with `Cancelled` or `TimedOut` if `what` must not start.
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled {
                command: what.to_string(),
            });
        }
        if self.is_expired() {
            return Err(Error::TimedOut {
                command: what.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_context_never_blocks() {
        let ctx = ExecContext::background();
        assert!(ctx.deadline().is_none());
        assert!(ctx.check("terraform version").is_ok());
    }

    #[test]
    fn cancelled_token_is_shared_across_clones() {
        let token = CancellationToken::new();
        let ctx = ExecContext::background().with_token(token.clone());
        token.cancel();
        assert!(ctx.clone().is_cancelled());
        assert!(matches!(
            ctx.check("terraform state pull"),
            Err(Error::Cancelled { .. })
        ));
    }

    #[test]
    fn zero_timeout_is_expired() {
        let ctx = ExecContext::with_timeout(Duration::ZERO);
        assert!(matches!(
            ctx.check("terraform state pull"),
            Err(Error::TimedOut { .. })
        ));
    }
}
