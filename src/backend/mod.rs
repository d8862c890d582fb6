//! In-process reference backend: availability oracle, booking table and change
//! feed behind one per-resource write lock, so check-and-write is atomic on the
//! server side and two racing overlapping writes cannot both commit.

mod conflict;
mod state;

pub use state::ResourceState;

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, warn};

use crate::booking::FeedSubscription;
use crate::limits::MAX_BOOKINGS_PER_RESOURCE;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::ports::{AvailabilityOracle, BackendError, BookingRepository, ChangeFeed};
use crate::wal::Wal;

use conflict::{check_no_conflict, find_conflict, validate_row, validate_span};

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

pub struct MemoryBackend {
    resources: DashMap<String, SharedResourceState>,
    /// Reverse lookup: booking id → resource key.
    entity_to_resource: DashMap<BookingId, String>,
    notify: Arc<NotifyHub>,
    wal: Option<Mutex<Wal>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Volatile backend, nothing journaled.
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            entity_to_resource: DashMap::new(),
            notify: Arc::new(NotifyHub::new()),
            wal: None,
        }
    }

    /// Durable backend: replay the journal at `path`, then append to it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;

        let mut states: HashMap<String, ResourceState> = HashMap::new();
        let entity_to_resource = DashMap::new();
        for event in &events {
            let key = event.row.resource.clone();
            match event.kind {
                ChangeKind::Delete => {
                    entity_to_resource.remove(&event.row.id);
                }
                ChangeKind::Insert | ChangeKind::Update => {
                    entity_to_resource.insert(event.row.id.clone(), key.clone());
                }
            }
            states
                .entry(key.clone())
                .or_insert_with(|| ResourceState::new(key))
                .apply(event);
        }
        info!(
            path = %path.display(),
            events = events.len(),
            resources = states.len(),
            "journal replayed"
        );

        let resources = DashMap::new();
        for (key, rs) in states {
            resources.insert(key, Arc::new(RwLock::new(rs)));
        }
        Ok(Self {
            resources,
            entity_to_resource,
            notify: Arc::new(NotifyHub::new()),
            wal: Some(Mutex::new(wal)),
        })
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn get_resource(&self, key: &str) -> Option<SharedResourceState> {
        self.resources.get(key).map(|e| e.value().clone())
    }

    fn resource_or_create(&self, key: &str) -> SharedResourceState {
        self.resources
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(ResourceState::new(key))))
            .clone()
    }

    pub async fn booking_count(&self, key: &str) -> usize {
        match self.get_resource(key) {
            Some(rs) => rs.read().await.bookings.len(),
            None => 0,
        }
    }

    async fn journal(&self, event: &ChangeEvent) -> Result<(), BackendError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        wal.lock()
            .await
            .append(event)
            .map_err(|e| BackendError::Journal(e.to_string()))
    }

    /// Journal + apply + notify. Caller holds the resource write lock.
    async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: ChangeEvent,
    ) -> Result<(), BackendError> {
        self.journal(&event).await?;
        rs.apply(&event);
        match event.kind {
            ChangeKind::Delete => {
                self.entity_to_resource.remove(&event.row.id);
            }
            ChangeKind::Insert | ChangeKind::Update => {
                self.entity_to_resource
                    .insert(event.row.id.clone(), rs.key.clone());
            }
        }
        debug!(id = %event.row.id, kind = event.kind.label(), resource = %rs.key, "committed");
        self.notify.send(&rs.key, &event);
        Ok(())
    }

    /// Lookup booking → resource, acquire that resource's write lock.
    async fn resolve_write(
        &self,
        id: &BookingId,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, BackendError> {
        let key = self
            .entity_to_resource
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        let rs = self
            .get_resource(&key)
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        Ok(rs.write_owned().await)
    }

    /// Rewrite the journal with one insert per live booking. Holds every
    /// resource read lock (in key order) so no commit slips between the
    /// snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), BackendError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let mut keyed: Vec<(String, SharedResourceState)> = self
            .resources
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut guards = Vec::with_capacity(keyed.len());
        for (_, rs) in keyed {
            guards.push(rs.read_owned().await);
        }
        let events: Vec<ChangeEvent> = guards
            .iter()
            .flat_map(|g| g.bookings.iter().cloned().map(ChangeEvent::insert))
            .collect();

        let mut wal = wal.lock().await;
        wal.compact(&events)
            .map_err(|e| BackendError::Journal(e.to_string()))?;
        info!(rows = events.len(), "journal compacted");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.lock().await.appends_since_compact(),
            None => 0,
        }
    }
}

#[async_trait]
impl AvailabilityOracle for MemoryBackend {
    async fn check(
        &self,
        resource: &str,
        span: Span,
        excluding: Option<&BookingId>,
    ) -> Result<bool, BackendError> {
        validate_span(&span)?;
        let Some(rs) = self.get_resource(resource) else {
            return Ok(true);
        };
        let guard = rs.read().await;
        Ok(find_conflict(&guard, &span, excluding).is_none())
    }
}

#[async_trait]
impl BookingRepository for MemoryBackend {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, BackendError> {
        validate_row(&booking.title, &booking.resource)?;
        validate_span(&booking.span)?;

        let rs = self.resource_or_create(&booking.resource);
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(BackendError::Invalid("too many bookings on resource"));
        }
        check_no_conflict(&guard, &booking.span, None)?;

        let row = booking.into_booking(BookingId::generate());
        self.persist_and_apply(&mut guard, ChangeEvent::insert(row.clone()))
            .await?;
        Ok(row)
    }

    async fn update(&self, id: &BookingId, patch: BookingPatch) -> Result<Booking, BackendError> {
        let mut guard = self.resolve_write(id).await?;
        let mut row = guard
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        patch.apply_to(&mut row);
        validate_row(&row.title, &row.resource)?;
        validate_span(&row.span())?;
        check_no_conflict(&guard, &row.span(), Some(id))?;

        self.persist_and_apply(&mut guard, ChangeEvent::update(row.clone()))
            .await?;
        Ok(row)
    }

    async fn delete(&self, id: &BookingId, resource: &str) -> Result<(), BackendError> {
        let mut guard = self.resolve_write(id).await?;
        if guard.key != resource {
            return Err(BackendError::NotFound(id.clone()));
        }
        let row = guard
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        self.persist_and_apply(&mut guard, ChangeEvent::delete(row))
            .await
    }

    async fn get(&self, id: &BookingId) -> Result<Option<Booking>, BackendError> {
        let Some(key) = self.entity_to_resource.get(id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let Some(rs) = self.get_resource(&key) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn query_by_resource(&self, resource: &str) -> Result<Vec<Booking>, BackendError> {
        match self.get_resource(resource) {
            Some(rs) => Ok(rs.read().await.bookings.clone()),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, resource: &str) -> Result<FeedSubscription, BackendError> {
        // Subscriptions closed by a resource switch leave dead channels behind.
        self.notify.prune();
        let rx = self.notify.subscribe(resource);
        Ok(FeedSubscription::new(resource, change_stream(resource.to_string(), rx)))
    }
}

/// Adapt a broadcast receiver to a stream. A lagging subscriber loses the
/// overwritten events; that is logged and the stream carries on.
fn change_stream(
    resource: String,
    rx: broadcast::Receiver<ChangeEvent>,
) -> BoxStream<'static, ChangeEvent> {
    stream::unfold((rx, resource), |(mut rx, resource)| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, (rx, resource))),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%resource, skipped, "change feed lagged, snapshot re-sync needed");
                    metrics::counter!(crate::observability::FEED_LAGGED_TOTAL).increment(skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const BASE: Ms = 1_737_367_200_000;

    fn new_booking(resource: &str, owner: &str, start: Ms, end: Ms) -> NewBooking {
        NewBooking {
            resource: resource.into(),
            owner_id: UserId::from(owner),
            title: "Planning".into(),
            span: Span::new(start, end),
            profile_ref: None,
        }
    }

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("slotline_test_backend");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn insert_rejects_overlap_even_without_oracle() {
        let backend = MemoryBackend::new();
        backend.insert(new_booking("roomA", "u1", BASE, BASE + H)).await.unwrap();
        let err = backend
            .insert(new_booking("roomA", "u2", BASE + H / 2, BASE + 2 * H))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
        assert_eq!(backend.booking_count("roomA").await, 1);
    }

    #[tokio::test]
    async fn resources_are_independent() {
        let backend = MemoryBackend::new();
        backend.insert(new_booking("roomA", "u1", BASE, BASE + H)).await.unwrap();
        backend.insert(new_booking("roomB", "u1", BASE, BASE + H)).await.unwrap();
        assert!(!backend.check("roomA", Span::new(BASE, BASE + H), None).await.unwrap());
        assert!(backend.check("roomC", Span::new(BASE, BASE + H), None).await.unwrap());
    }

    #[tokio::test]
    async fn check_honours_excluding() {
        let backend = MemoryBackend::new();
        let row = backend.insert(new_booking("roomA", "u1", BASE, BASE + H)).await.unwrap();
        let shifted = Span::new(BASE + H / 2, BASE + 3 * H / 2);
        assert!(!backend.check("roomA", shifted, None).await.unwrap());
        assert!(backend.check("roomA", shifted, Some(&row.id)).await.unwrap());
    }

    #[tokio::test]
    async fn update_moves_within_own_slot() {
        let backend = MemoryBackend::new();
        let row = backend.insert(new_booking("roomA", "u1", BASE, BASE + H)).await.unwrap();
        let patch = BookingPatch {
            title: None,
            span: Some(Span::new(BASE + H / 2, BASE + 3 * H / 2)),
        };
        let updated = backend.update(&row.id, patch).await.unwrap();
        assert_eq!(updated.start, BASE + H / 2);
        assert_eq!(updated.title, "Planning");
    }

    #[tokio::test]
    async fn delete_requires_matching_resource() {
        let backend = MemoryBackend::new();
        let row = backend.insert(new_booking("roomA", "u1", BASE, BASE + H)).await.unwrap();
        let err = backend.delete(&row.id, "roomB").await.unwrap_err();
        assert_eq!(err, BackendError::NotFound(row.id.clone()));
        backend.delete(&row.id, "roomA").await.unwrap();
        assert_eq!(backend.get(&row.id).await.unwrap(), None);
        assert!(matches!(
            backend.delete(&row.id, "roomA").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn feed_delivers_committed_rows() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe("roomA").await.unwrap();
        let row = backend.insert(new_booking("roomA", "u1", BASE, BASE + H)).await.unwrap();
        backend.delete(&row.id, "roomA").await.unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(first, ChangeEvent::insert(row.clone()));
        let second = sub.next().await.unwrap();
        assert_eq!(second, ChangeEvent::delete(row));
    }

    #[tokio::test]
    async fn switching_subscription_drops_idle_channel() {
        let backend = MemoryBackend::new();
        let first = backend.subscribe("roomA").await.unwrap();
        assert_eq!(backend.notify.channel_count(), 1);

        drop(first);
        let mut second = backend.subscribe("roomB").await.unwrap();
        assert_eq!(backend.notify.channel_count(), 1);
        assert_eq!(backend.notify.subscriber_count("roomA"), 0);

        let row = backend.insert(new_booking("roomB", "u1", BASE, BASE + H)).await.unwrap();
        assert_eq!(second.next().await.unwrap(), ChangeEvent::insert(row));
    }

    #[tokio::test]
    async fn journal_replay_restores_rows() {
        let path = test_wal_path("replay.wal");
        let kept;
        {
            let backend = MemoryBackend::open(&path).unwrap();
            kept = backend.insert(new_booking("roomA", "u1", BASE, BASE + H)).await.unwrap();
            let gone = backend
                .insert(new_booking("roomA", "u1", BASE + H, BASE + 2 * H))
                .await
                .unwrap();
            backend.delete(&gone.id, "roomA").await.unwrap();
            assert_eq!(backend.journal_appends_since_compact().await, 3);
        }
        let backend = MemoryBackend::open(&path).unwrap();
        assert_eq!(backend.query_by_resource("roomA").await.unwrap(), vec![kept.clone()]);
        assert_eq!(backend.get(&kept.id).await.unwrap(), Some(kept));
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact.wal");
        let backend = MemoryBackend::open(&path).unwrap();
        let row = backend.insert(new_booking("roomA", "u1", BASE, BASE + H)).await.unwrap();
        for i in 1..5 {
            let patch = BookingPatch { title: Some(format!("rev {i}")), span: None };
            backend.update(&row.id, patch).await.unwrap();
        }
        backend.compact_wal().await.unwrap();
        assert_eq!(backend.journal_appends_since_compact().await, 0);
        assert_eq!(Wal::replay(&path).unwrap().len(), 1);

        drop(backend);
        let reopened = MemoryBackend::open(&path).unwrap();
        let rows = reopened.query_by_resource("roomA").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "rev 4");
    }
}
