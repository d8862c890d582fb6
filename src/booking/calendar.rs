use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::model::*;
use crate::ports::{BookingRepository, ChangeFeed};

use super::feed::{self, FeedSubscription};
use super::{BookingError, BookingForm, BookingMutator, BookingStore, DeleteOutcome};

const UNTITLED: &str = "Reserve";

/// What the calendar widget renders for one booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: BookingId,
    pub title: String,
    pub start: Ms,
    pub end: Ms,
    /// The viewer may drag or edit it.
    pub editable: bool,
    /// The viewer created it.
    pub own: bool,
}

/// Candidate range while a create form is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedRange {
    pub span: Span,
}

/// Denormalized snapshot of the booking an edit form was opened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditingTarget {
    pub id: BookingId,
    pub title: String,
    pub start: Ms,
    pub end: Ms,
    pub owner_id: Option<UserId>,
}

#[derive(Debug, Default)]
pub enum ModalState {
    #[default]
    Idle,
    Creating { range: SelectedRange, form: BookingForm },
    Editing { target: EditingTarget, form: BookingForm },
}

pub fn project_events(
    bookings: &[Booking],
    viewer: Option<&UserId>,
    is_admin: bool,
) -> Vec<CalendarEvent> {
    bookings
        .iter()
        .map(|b| {
            let own = viewer.is_some_and(|v| b.is_owned_by(v));
            CalendarEvent {
                id: b.id.clone(),
                title: if b.title.is_empty() { UNTITLED.to_string() } else { b.title.clone() },
                start: b.start,
                end: b.end,
                editable: is_admin || own,
                own,
            }
        })
        .collect()
}

/// Turns the store into calendar events and gestures into guarded mutations.
///
/// Single owner, no locks: every method takes `&mut self` and the feed is
/// consumed through [`next_change`](Self::next_change) or
/// [`pump_feed`](Self::pump_feed) on the same task.
pub struct CalendarViewModel {
    store: BookingStore,
    mutator: BookingMutator,
    repo: Arc<dyn BookingRepository>,
    feed: Option<FeedSubscription>,
    viewer: Option<UserId>,
    is_admin: bool,
    modal: ModalState,
    /// Drag targets shown at their proposed span until the backend confirms.
    optimistic: HashMap<BookingId, Span>,
    load_timeout: Option<Duration>,
}

impl CalendarViewModel {
    pub fn new(resource: impl Into<String>, mutator: BookingMutator) -> Self {
        let repo = mutator.repository();
        let load_timeout = mutator.call_timeout();
        Self {
            store: BookingStore::new(resource),
            mutator,
            repo,
            feed: None,
            viewer: None,
            is_admin: false,
            modal: ModalState::Idle,
            optimistic: HashMap::new(),
            load_timeout,
        }
    }

    pub fn resource(&self) -> &str {
        self.store.resource()
    }

    pub fn store(&self) -> &BookingStore {
        &self.store
    }

    pub fn viewer(&self) -> Option<&UserId> {
        self.viewer.as_ref()
    }

    pub fn set_viewer(&mut self, viewer: Option<UserId>, is_admin: bool) {
        self.viewer = viewer;
        self.is_admin = is_admin && self.viewer.is_some();
    }

    /// Re-read identity and role from the authorization collaborator.
    pub async fn refresh_viewer(&mut self) {
        let viewer = self.mutator.current_viewer().await;
        let is_admin = match &viewer {
            Some(v) => self.mutator.is_admin(v).await,
            None => false,
        };
        self.set_viewer(viewer, is_admin);
    }

    /// Subscribe to the feed for the current resource, then load a snapshot.
    /// Subscribing first means no change between the two is lost.
    pub async fn attach(&mut self, changes: &dyn ChangeFeed) -> Result<(), BookingError> {
        self.detach();
        let sub = changes
            .subscribe(self.store.resource())
            .await
            .map_err(BookingError::from)?;
        self.feed = Some(sub);
        self.refresh().await
    }

    /// Tear down the feed subscription. Events still in flight are dropped.
    pub fn detach(&mut self) {
        if let Some(mut sub) = self.feed.take() {
            sub.close();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.feed.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub async fn switch_resource(
        &mut self,
        resource: impl Into<String>,
        changes: &dyn ChangeFeed,
    ) -> Result<(), BookingError> {
        self.detach();
        self.store.reset(resource);
        self.modal = ModalState::Idle;
        self.optimistic.clear();
        self.attach(changes).await
    }

    /// Full snapshot reload. On failure the stale rows stay visible.
    pub async fn refresh(&mut self) -> Result<(), BookingError> {
        self.pump_feed();
        self.store.load(self.repo.as_ref(), self.load_timeout).await?;
        self.optimistic.clear();
        Ok(())
    }

    /// Apply whatever the feed has buffered. Returns how many rows changed.
    pub fn pump_feed(&mut self) -> usize {
        let Some(sub) = self.feed.as_mut() else {
            return 0;
        };
        let changed = feed::drain_ready(sub, &mut self.store);
        for id in &changed {
            self.optimistic.remove(id);
        }
        changed.len()
    }

    /// Wait for the next feed event and apply it. `None` when detached or the
    /// feed closed.
    pub async fn next_change(&mut self) -> Option<ChangeKind> {
        let sub = self.feed.as_mut()?;
        let event = feed::apply_next(sub, &mut self.store).await?;
        self.optimistic.remove(&event.row.id);
        Some(event.kind)
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        let mut events = project_events(self.store.bookings(), self.viewer.as_ref(), self.is_admin);
        for ev in &mut events {
            if let Some(span) = self.optimistic.get(&ev.id) {
                ev.start = span.start;
                ev.end = span.end;
            }
        }
        events
    }

    /// Whether the widget should let the viewer drag this event.
    pub fn event_allowed(&self, id: &BookingId) -> bool {
        self.store.get(id).is_some_and(|b| {
            self.is_admin || self.viewer.as_ref().is_some_and(|v| b.is_owned_by(v))
        })
    }

    pub fn modal(&self) -> &ModalState {
        &self.modal
    }

    pub fn form_mut(&mut self) -> Option<&mut BookingForm> {
        match &mut self.modal {
            ModalState::Idle => None,
            ModalState::Creating { form, .. } | ModalState::Editing { form, .. } => Some(form),
        }
    }

    pub fn on_range_select(&mut self, span: Span) {
        let form = BookingForm::create(self.mutator.clone(), self.store.resource(), span, None);
        self.modal = ModalState::Creating {
            range: SelectedRange { span },
            form,
        };
    }

    /// Open the edit form for a rendered event. Returns false if the event is
    /// no longer in the store.
    pub fn on_event_click(&mut self, id: &BookingId) -> bool {
        let Some(event) = self.events().into_iter().find(|e| &e.id == id) else {
            return false;
        };
        let Some(row) = self.store.get(id) else {
            return false;
        };
        let target = EditingTarget {
            id: event.id.clone(),
            title: event.title.clone(),
            start: event.start,
            end: event.end,
            owner_id: row.owner_id.clone(),
        };
        let form = BookingForm::edit(
            self.mutator.clone(),
            self.store.resource(),
            target.id.clone(),
            Span::unchecked(target.start, target.end),
            target.title.clone(),
        );
        self.modal = ModalState::Editing { target, form };
        true
    }

    /// Reschedule by drag. `revert` puts the widget's event back where it was
    /// and is called exactly when the move does not stick.
    pub async fn on_drag_reschedule(
        &mut self,
        id: &BookingId,
        proposed: Span,
        revert: impl FnOnce(),
    ) -> Result<Booking, BookingError> {
        if !self.event_allowed(id) {
            revert();
            return Err(BookingError::NotAuthorized);
        }
        // An earlier accepted drag may still be waiting for its feed echo;
        // a rejection goes back to that range, not to the store row.
        let previous = self.optimistic.insert(id.clone(), proposed);
        let result = self
            .mutator
            .update(id, self.store.resource(), proposed, None, self.viewer.as_ref())
            .await;
        match &result {
            Ok(_) => debug!(%id, "drag accepted, waiting for feed"),
            Err(e) => {
                warn!(%id, "drag rejected, reverting: {e}");
                match previous {
                    Some(span) => self.optimistic.insert(id.clone(), span),
                    None => self.optimistic.remove(id),
                };
                revert();
            }
        }
        result
    }

    /// Submit the open form. `None` if no form is open. Success closes the
    /// form and re-syncs; failure leaves it open with its message.
    pub async fn submit_modal(&mut self) -> Option<Result<Booking, BookingError>> {
        let result = self.form_mut()?.submit().await;
        if result.is_ok() {
            self.on_success().await;
        }
        Some(result)
    }

    pub async fn delete_from_modal(&mut self) -> Option<Result<DeleteOutcome, BookingError>> {
        let ModalState::Editing { form, .. } = &mut self.modal else {
            return None;
        };
        let result = form.delete().await;
        if matches!(result, Ok(DeleteOutcome::Deleted)) {
            self.on_success().await;
        }
        Some(result)
    }

    pub async fn on_success(&mut self) {
        self.modal = ModalState::Idle;
        self.resync().await;
    }

    pub async fn close_create_modal(&mut self) {
        if matches!(self.modal, ModalState::Creating { .. }) {
            self.modal = ModalState::Idle;
        }
        self.resync().await;
    }

    pub async fn close_edit_modal(&mut self) {
        if matches!(self.modal, ModalState::Editing { .. }) {
            self.modal = ModalState::Idle;
        }
        self.resync().await;
    }

    /// Defensive reload in case the feed missed something.
    async fn resync(&mut self) {
        if let Err(e) = self.refresh().await {
            warn!(resource = %self.store.resource(), "re-sync failed: {e}");
        }
    }
}

impl Drop for CalendarViewModel {
    fn drop(&mut self) {
        self.detach();
    }
}
