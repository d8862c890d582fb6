use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{BookingId, ChangeEvent};

use super::store::BookingStore;

/// A live change-feed subscription for one resource key.
///
/// Closing it (explicitly or by dropping it) cancels its token and drops the
/// upstream stream, so nothing is delivered afterwards.
pub struct FeedSubscription {
    resource: String,
    events: BoxStream<'static, ChangeEvent>,
    token: CancellationToken,
}

impl FeedSubscription {
    pub fn new(resource: impl Into<String>, events: BoxStream<'static, ChangeEvent>) -> Self {
        Self {
            resource: resource.into(),
            events,
            token: CancellationToken::new(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Token cancelled when this subscription closes. Hand it to tasks whose
    /// results only matter while the subscription is alive.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the next event. `None` once closed or the upstream ends.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            event = self.events.next() => event,
        }
    }

    /// An event that is already buffered, without waiting.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        if self.token.is_cancelled() {
            return None;
        }
        self.events.next().now_or_never().flatten()
    }

    pub fn close(&mut self) {
        if !self.token.is_cancelled() {
            debug!(resource = %self.resource, "closing change feed subscription");
        }
        self.token.cancel();
        self.events = stream::empty().boxed();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("resource", &self.resource)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Apply one event from `sub` to `store`, guarding against a subscription
/// that outlived a resource switch.
fn reconcile(sub: &FeedSubscription, store: &mut BookingStore, event: &ChangeEvent) -> bool {
    if sub.resource() != store.resource() {
        warn!(
            subscription = %sub.resource(),
            store = %store.resource(),
            "dropping event from stale subscription"
        );
        return false;
    }
    store.apply_change_event(event)
}

/// Apply every event already buffered on `sub`. Returns the ids whose rows changed.
pub fn drain_ready(sub: &mut FeedSubscription, store: &mut BookingStore) -> Vec<BookingId> {
    let mut changed = Vec::new();
    while let Some(event) = sub.try_next() {
        if reconcile(sub, store, &event) {
            changed.push(event.row.id);
        }
    }
    changed
}

/// Wait for the next event and apply it. `None` when the feed has closed.
pub async fn apply_next(
    sub: &mut FeedSubscription,
    store: &mut BookingStore,
) -> Option<ChangeEvent> {
    let event = sub.next().await?;
    reconcile(sub, store, &event);
    Some(event)
}
