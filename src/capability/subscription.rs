//! Feed subscription handles

use super::FeedSender;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Live feed registration; cancelled on [`Subscription::cancel`] or drop
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Token the delivering side watches to stop sending
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Idempotent
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Fan-out of one feed to any number of subscribers
///
/// Cancelled subscriptions and closed receivers are pruned on publish.
#[derive(Debug)]
pub struct FeedHub<T> {
    subscribers: Mutex<Vec<(CancellationToken, FeedSender<T>)>>,
}

impl<T: Clone> FeedHub<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, tx: FeedSender<T>) -> Subscription {
        let token = CancellationToken::new();
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((token.clone(), tx));
        Subscription::new(token)
    }

    pub fn publish(&self, event: &T) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        subscribers.retain(|(token, tx)| !token.is_cancelled() && tx.send(event.clone()).is_ok());
    }

    /// Subscribers that have not cancelled
    pub fn live_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|(token, tx)| !token.is_cancelled() && !tx.is_closed())
            .count()
    }
}

impl<T: Clone> Default for FeedHub<T> {
    fn default() -> Self {
        Self::new()
    }
}
