use std::time::Duration;

use tracing::{debug, warn};

use crate::model::*;
use crate::ports::{self, BookingRepository};

use super::BookingError;

/// Generation-stamped handle for one snapshot load. A ticket taken before a
/// `reset` is stale and its result is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    resource: String,
    generation: u64,
}

impl LoadTicket {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// Local view of the bookings on one resource key.
///
/// Never originates rows: it only reflects snapshots and change-feed events.
/// `bookings` stays sorted by `start`.
#[derive(Debug)]
pub struct BookingStore {
    resource: String,
    bookings: Vec<Booking>,
    generation: u64,
    loaded: bool,
    last_error: Option<BookingError>,
}

impl BookingStore {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            bookings: Vec::new(),
            generation: 0,
            loaded: false,
            last_error: None,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn get(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| &b.id == id)
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// True once any snapshot has been applied for the current resource.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Error from the most recent load, cleared by the next successful one.
    pub fn last_error(&self) -> Option<&BookingError> {
        self.last_error.as_ref()
    }

    /// Point the store at another resource key. Rows are dropped and every
    /// outstanding ticket goes stale.
    pub fn reset(&mut self, resource: impl Into<String>) {
        self.resource = resource.into();
        self.bookings.clear();
        self.generation += 1;
        self.loaded = false;
        self.last_error = None;
    }

    pub fn begin_load(&self) -> LoadTicket {
        LoadTicket {
            resource: self.resource.clone(),
            generation: self.generation,
        }
    }

    /// Apply a snapshot result. `Ok(false)` means the ticket was stale and
    /// nothing changed. On error the previous rows stay in place.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<Booking>, BookingError>,
    ) -> Result<bool, BookingError> {
        if ticket.generation != self.generation || ticket.resource != self.resource {
            warn!(resource = %ticket.resource, "discarding stale snapshot");
            return Ok(false);
        }
        match result {
            Ok(mut rows) => {
                rows.retain(|b| b.resource == self.resource);
                rows.sort_by_key(|b| b.start);
                debug!(resource = %self.resource, rows = rows.len(), "snapshot applied");
                metrics::counter!(crate::observability::SNAPSHOT_LOADS_TOTAL, "status" => "ok")
                    .increment(1);
                self.bookings = rows;
                self.loaded = true;
                self.last_error = None;
                Ok(true)
            }
            Err(e) => {
                warn!(resource = %self.resource, "snapshot failed, keeping stale rows: {e}");
                metrics::counter!(crate::observability::SNAPSHOT_LOADS_TOTAL, "status" => "error")
                    .increment(1);
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Fetch a full snapshot and replace the local rows with it.
    pub async fn load(
        &mut self,
        repo: &dyn BookingRepository,
        deadline: Option<Duration>,
    ) -> Result<&[Booking], BookingError> {
        let ticket = self.begin_load();
        let result = ports::within(deadline, repo.query_by_resource(ticket.resource()))
            .await
            .map_err(BookingError::from);
        self.finish_load(ticket, result)?;
        Ok(&self.bookings)
    }

    /// Idempotent id-keyed merge of one change-feed event. Every event is the
    /// newest truth for its id. Returns whether the rows changed.
    pub fn apply_change_event(&mut self, event: &ChangeEvent) -> bool {
        if event.row.resource != self.resource {
            return false;
        }
        let changed = match event.kind {
            // An insert for a known id is a duplicate delivery or the echo of
            // our own write; an update for an unknown id may have raced the
            // snapshot. Both collapse to upsert.
            ChangeKind::Insert | ChangeKind::Update => {
                self.upsert(event.row.clone());
                true
            }
            ChangeKind::Delete => self.remove(&event.row.id).is_some(),
        };
        if changed {
            debug!(id = %event.row.id, kind = event.kind.label(), "merged change event");
            let kind = event.kind.label();
            metrics::counter!(crate::observability::FEED_EVENTS_APPLIED_TOTAL, "kind" => kind)
                .increment(1);
        }
        changed
    }

    fn upsert(&mut self, row: Booking) {
        self.remove(&row.id);
        // Equal starts keep arrival order.
        let pos = self.bookings.partition_point(|b| b.start <= row.start);
        self.bookings.insert(pos, row);
    }

    fn remove(&mut self, id: &BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| &b.id == id)?;
        Some(self.bookings.remove(pos))
    }
}
