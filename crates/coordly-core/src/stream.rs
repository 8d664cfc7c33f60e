// ── Reactive update streams ──
//
// Subscription type for consuming coordinator updates without
// registering a callback listener.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::coordinator::CoordinatorState;

/// What a coordinator published after a refresh, push, or forced
/// notification.
pub struct Update<T> {
    pub data: Option<Arc<T>>,
    pub last_update_success: bool,
    pub state: CoordinatorState,
}

impl<T> Update<T> {
    pub(crate) fn initial() -> Self {
        Self {
            data: None,
            last_update_success: false,
            state: CoordinatorState::NeverUpdated,
        }
    }

    /// Whether entities built on this update should report available.
    pub fn is_available(&self) -> bool {
        self.last_update_success
    }
}

impl<T> Clone for Update<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            last_update_success: self.last_update_success,
            state: self.state,
        }
    }
}

impl<T> std::fmt::Debug for Update<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Update")
            .field("has_data", &self.data.is_some())
            .field("last_update_success", &self.last_update_success)
            .field("state", &self.state)
            .finish()
    }
}

/// A subscription to a coordinator's published updates.
///
/// Provides both point-in-time access and reactive change notification
/// via [`changed`](Self::changed) or by converting to a `Stream`.
pub struct UpdateStream<T: Send + Sync + 'static> {
    current: Update<T>,
    receiver: watch::Receiver<Update<T>>,
}

impl<T: Send + Sync + 'static> UpdateStream<T> {
    pub(crate) fn new(receiver: watch::Receiver<Update<T>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The update captured at creation time (or by the last `changed()`).
    pub fn current(&self) -> &Update<T> {
        &self.current
    }

    /// Wait for the next publication.
    /// Returns `None` once the coordinator has been dropped.
    pub async fn changed(&mut self) -> Option<Update<T>> {
        self.receiver.changed().await.ok()?;
        let update = self.receiver.borrow_and_update().clone();
        self.current = update.clone();
        Some(update)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    /// The first item is the update current at conversion time.
    pub fn into_stream(self) -> UpdateWatchStream<T> {
        UpdateWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct UpdateWatchStream<T: Send + Sync + 'static> {
    inner: WatchStream<Update<T>>,
}

impl<T: Send + Sync + 'static> Stream for UpdateWatchStream<T> {
    type Item = Update<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
