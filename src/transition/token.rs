use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

/// Cooperative cancel-and-confirm signal pair.
///
/// The canceller raises a request and blocks, bounded by a timeout, until
/// the owning task confirms that it has fully stopped mutating shared
/// state. The owning task polls [`is_cancellation_requested`] at its safe
/// points and calls [`confirm_cancellation`] once it is done.
///
/// [`is_cancellation_requested`]: CancellationToken::is_cancellation_requested
/// [`confirm_cancellation`]: CancellationToken::confirm_cancellation
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug)]
struct TokenInner {
    request: watch::Sender<bool>,
    confirm: watch::Sender<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (request, _) = watch::channel(false);
        let (confirm, _) = watch::channel(false);
        Self {
            inner: Arc::new(TokenInner { request, confirm }),
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancellation_requested(&self) -> bool {
        *self.inner.request.borrow()
    }

    /// Request cancellation of the owning task and wait for its
    /// confirmation, at most `wait` long (`None` waits indefinitely).
    ///
    /// Returns whether the confirmation arrived in time. `false` means the
    /// task could not be confirmed stopped and must not be treated as
    /// cancelled.
    pub async fn request_cancellation(&self, wait: Option<Duration>) -> bool {
        let mut confirmed = self.inner.confirm.subscribe();
        self.inner.request.send_replace(true);

        let confirmation = confirmed.wait_for(|confirmed| *confirmed);
        match wait {
            Some(limit) => matches!(timeout(limit, confirmation).await, Ok(Ok(_))),
            None => confirmation.await.is_ok(),
        }
    }

    /// Confirm that the owning task has stopped. Called once by the task,
    /// after its last mutation of shared state; unblocks any waiter.
    pub fn confirm_cancellation(&self) {
        self.inner.confirm.send_replace(true);
    }

    pub fn is_cancellation_confirmed(&self) -> bool {
        *self.inner.confirm.borrow()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_confirmation_unblocks_requester() {
        let token = CancellationToken::new();

        let task_token = token.clone();
        let task = tokio::spawn(async move {
            while !task_token.is_cancellation_requested() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            task_token.confirm_cancellation();
        });

        assert!(
            token
                .request_cancellation(Some(Duration::from_secs(1)))
                .await
        );
        assert!(token.is_cancellation_confirmed());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_times_out_without_confirmation() {
        let token = CancellationToken::new();

        assert!(
            !token
                .request_cancellation(Some(Duration::from_millis(20)))
                .await
        );
        assert!(token.is_cancellation_requested());
        assert!(!token.is_cancellation_confirmed());
    }

    #[tokio::test]
    async fn test_request_after_confirmation_returns_immediately() {
        let token = CancellationToken::new();
        token.confirm_cancellation();

        assert!(
            token
                .request_cancellation(Some(Duration::from_millis(20)))
                .await
        );
    }
}
