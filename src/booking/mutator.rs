use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::limits::*;
use crate::model::*;
use crate::ports::{
    self, AvailabilityOracle, Authorization, BackendError, BookingRepository, Confirmation,
};

use super::BookingError;

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this booking?";

const WRONG_RESOURCE: &str = "This booking belongs to another resource.";

/// Lifecycle of one mutation: `Idle → Submitting → (Succeeded | Rejected | Failed)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MutationState {
    #[default]
    Idle,
    Submitting,
    Succeeded,
    /// Definitive refusal (auth, validation, slot taken, gone).
    Rejected(BookingError),
    /// Transport or backend failure; the caller may retry.
    Failed(BookingError),
}

impl MutationState {
    pub fn settle<T>(result: &Result<T, BookingError>) -> Self {
        match result {
            Ok(_) => MutationState::Succeeded,
            Err(e) if e.is_rejection() => MutationState::Rejected(e.clone()),
            Err(e) => MutationState::Failed(e.clone()),
        }
    }

    pub fn error(&self) -> Option<&BookingError> {
        match self {
            MutationState::Rejected(e) | MutationState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The confirmation gate said no; nothing was sent.
    Declined,
}

/// Orchestrates guarded writes: session precondition, validation,
/// availability check, write, error translation.
///
/// The check and the write are separate round trips, so two clients can both
/// see "available" for overlapping ranges. Only a backend-side exclusion
/// constraint makes the write itself safe; the loser of such a race comes
/// back as `SlotUnavailable` (or `Persistence` if the backend cannot say).
#[derive(Clone)]
pub struct BookingMutator {
    oracle: Arc<dyn AvailabilityOracle>,
    repo: Arc<dyn BookingRepository>,
    authz: Arc<dyn Authorization>,
    confirm: Arc<dyn Confirmation>,
    call_timeout: Option<Duration>,
}

impl BookingMutator {
    pub fn new(
        oracle: Arc<dyn AvailabilityOracle>,
        repo: Arc<dyn BookingRepository>,
        authz: Arc<dyn Authorization>,
        confirm: Arc<dyn Confirmation>,
    ) -> Self {
        Self {
            oracle,
            repo,
            authz,
            confirm,
            call_timeout: None,
        }
    }

    /// Deadline applied to every backend call.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    pub fn repository(&self) -> Arc<dyn BookingRepository> {
        self.repo.clone()
    }

    pub async fn current_viewer(&self) -> Option<UserId> {
        self.authz.current_viewer().await
    }

    pub async fn is_admin(&self, user: &UserId) -> bool {
        self.authz.is_admin(user).await
    }

    pub async fn create(
        &self,
        resource: &str,
        span: Span,
        title: &str,
        owner_id: Option<&UserId>,
        profile_ref: Option<String>,
    ) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.create_inner(resource, span, title, owner_id, profile_ref).await;
        record("create", &result, started);
        result
    }

    async fn create_inner(
        &self,
        resource: &str,
        span: Span,
        title: &str,
        owner_id: Option<&UserId>,
        profile_ref: Option<String>,
    ) -> Result<Booking, BookingError> {
        let owner = owner_id.ok_or(BookingError::AuthRequired)?;
        validate_resource(resource)?;
        validate_title(title)?;
        validate_span(&span)?;

        self.ensure_available(resource, span, None).await?;

        let row = self
            .call(self.repo.insert(NewBooking {
                resource: resource.to_string(),
                owner_id: owner.clone(),
                title: title.to_string(),
                span,
                profile_ref,
            }))
            .await?;
        info!(id = %row.id, resource, owner = %owner, "booking created");
        Ok(row)
    }

    /// Move and/or retitle a booking. `title: None` keeps the stored title.
    pub async fn update(
        &self,
        booking_id: &BookingId,
        resource: &str,
        span: Span,
        title: Option<&str>,
        caller: Option<&UserId>,
    ) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.update_inner(booking_id, resource, span, title, caller).await;
        record("update", &result, started);
        result
    }

    async fn update_inner(
        &self,
        booking_id: &BookingId,
        resource: &str,
        span: Span,
        title: Option<&str>,
        caller: Option<&UserId>,
    ) -> Result<Booking, BookingError> {
        let caller = caller.ok_or(BookingError::AuthRequired)?;
        validate_resource(resource)?;
        if let Some(title) = title {
            validate_title(title)?;
        }
        validate_span(&span)?;

        let current = self.authorize(booking_id, caller).await?;
        if current.resource != resource {
            return Err(BookingError::Validation(WRONG_RESOURCE));
        }

        self.ensure_available(resource, span, Some(booking_id)).await?;

        let patch = BookingPatch {
            title: title.map(str::to_string),
            span: Some(span),
        };
        let row = self.call(self.repo.update(booking_id, patch)).await?;
        info!(id = %row.id, resource, "booking updated");
        Ok(row)
    }

    /// Delete after the confirmation gate. Declining sends nothing.
    pub async fn delete(
        &self,
        booking_id: &BookingId,
        resource: &str,
        caller: Option<&UserId>,
    ) -> Result<DeleteOutcome, BookingError> {
        if !self.confirm.confirm(DELETE_PROMPT).await {
            debug!(id = %booking_id, "delete declined");
            return Ok(DeleteOutcome::Declined);
        }
        let started = Instant::now();
        let result = self.delete_inner(booking_id, resource, caller).await;
        record("delete", &result, started);
        result.map(|()| DeleteOutcome::Deleted)
    }

    async fn delete_inner(
        &self,
        booking_id: &BookingId,
        resource: &str,
        caller: Option<&UserId>,
    ) -> Result<(), BookingError> {
        let caller = caller.ok_or(BookingError::AuthRequired)?;
        let current = self.authorize(booking_id, caller).await?;
        if current.resource != resource {
            return Err(BookingError::Validation(WRONG_RESOURCE));
        }
        self.call(self.repo.delete(booking_id, resource)).await?;
        info!(id = %booking_id, resource, "booking deleted");
        Ok(())
    }

    /// Fetch the target and require owner-or-admin.
    async fn authorize(
        &self,
        booking_id: &BookingId,
        caller: &UserId,
    ) -> Result<Booking, BookingError> {
        let current = self
            .call(self.repo.get(booking_id))
            .await?
            .ok_or_else(|| BookingError::NotFound(booking_id.clone()))?;
        if current.is_owned_by(caller) || self.authz.is_admin(caller).await {
            Ok(current)
        } else {
            warn!(id = %booking_id, caller = %caller, "modification refused: not owner");
            Err(BookingError::NotAuthorized)
        }
    }

    async fn ensure_available(
        &self,
        resource: &str,
        span: Span,
        excluding: Option<&BookingId>,
    ) -> Result<(), BookingError> {
        let free = self.call(self.oracle.check(resource, span, excluding)).await?;
        metrics::counter!(
            crate::observability::AVAILABILITY_CHECKS_TOTAL,
            "result" => if free { "free" } else { "taken" }
        )
        .increment(1);
        debug!(resource, start = span.start, end = span.end, free, "availability checked");
        if free { Ok(()) } else { Err(BookingError::SlotUnavailable) }
    }

    async fn call<T, F>(&self, call: F) -> Result<T, BookingError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        ports::within(self.call_timeout, call).await.map_err(BookingError::from)
    }
}

fn record<T>(op: &'static str, result: &Result<T, BookingError>, started: Instant) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => {
            warn!(op, "booking {op} failed: {e}");
            e.label()
        }
    };
    metrics::counter!(crate::observability::MUTATIONS_TOTAL, "op" => op, "status" => status)
        .increment(1);
    metrics::histogram!(crate::observability::MUTATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

fn validate_span(span: &Span) -> Result<(), BookingError> {
    if !span.is_forward() {
        return Err(BookingError::Validation("The booking must end after it starts."));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::Validation("The booking time is out of range."));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(BookingError::Validation("Bookings cannot be longer than 31 days."));
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<(), BookingError> {
    if title.trim().is_empty() {
        return Err(BookingError::Validation("A booking title is required."));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(BookingError::Validation("The booking title is too long."));
    }
    Ok(())
}

fn validate_resource(resource: &str) -> Result<(), BookingError> {
    if resource.is_empty() || resource.len() > MAX_RESOURCE_KEY_LEN {
        return Err(BookingError::Validation("Unknown resource."));
    }
    Ok(())
}
