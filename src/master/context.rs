use crate::core::MetaError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request cancellation scope handed to every facade call.
///
/// Canceling the context (or letting its deadline pass) only abandons the
/// caller's wait. A task that has already been enqueued still runs.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Child scope: canceled with its parent, may carry a tighter deadline.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let deadline = match (self.deadline, timeout) {
            (Some(parent), Some(t)) => Some(parent.min(Instant::now() + t)),
            (None, Some(t)) => Some(Instant::now() + t),
            (parent, None) => parent,
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) -> MetaError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => MetaError::Canceled("request canceled".to_string()),
                _ = tokio::time::sleep_until(deadline) => {
                    MetaError::Canceled("deadline exceeded".to_string())
                }
            },
            None => {
                self.token.cancelled().await;
                MetaError::Canceled("request canceled".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_resolves_done() {
        let ctx = RequestContext::new();
        assert!(!ctx.is_done());
        ctx.cancel();
        assert!(ctx.is_done());
        assert!(matches!(ctx.done().await, MetaError::Canceled(_)));
    }

    #[tokio::test]
    async fn test_deadline_resolves_done() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(20));
        let err = ctx.done().await;
        assert_eq!(err, MetaError::Canceled("deadline exceeded".to_string()));
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = RequestContext::new();
        let child = parent.child(Some(Duration::from_secs(60)));
        assert!(child.deadline().is_some());
        parent.cancel();
        assert!(child.is_done());
    }
}
