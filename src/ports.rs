//! Seams to the collaborators the booking core does not own: the availability
//! authority, the booking table, the change feed, the session/role source and
//! the confirmation prompt. Everything is injected as `Arc<dyn Trait>`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::booking::FeedSubscription;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The exclusion constraint rejected the write: it overlaps this booking.
    Conflict(BookingId),
    NotFound(BookingId),
    /// The backend refused the payload outright.
    Invalid(&'static str),
    Journal(String),
    Unavailable(String),
    Timeout(Duration),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            BackendError::NotFound(id) => write!(f, "not found: {id}"),
            BackendError::Invalid(msg) => write!(f, "invalid: {msg}"),
            BackendError::Journal(e) => write!(f, "journal error: {e}"),
            BackendError::Unavailable(e) => write!(f, "backend unavailable: {e}"),
            BackendError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
        }
    }
}

impl std::error::Error for BackendError {}

/// Server-side authority on whether a slot is free.
///
/// Implementations must answer with a consistency guarantee at least as
/// strong as "serializable with respect to concurrent writes on the same
/// resource".
#[async_trait]
pub trait AvailabilityOracle: Send + Sync {
    /// True iff no booking on `resource` other than `excluding` overlaps `span`.
    async fn check(
        &self,
        resource: &str,
        span: Span,
        excluding: Option<&BookingId>,
    ) -> Result<bool, BackendError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: NewBooking) -> Result<Booking, BackendError>;
    async fn update(&self, id: &BookingId, patch: BookingPatch) -> Result<Booking, BackendError>;
    async fn delete(&self, id: &BookingId, resource: &str) -> Result<(), BackendError>;
    async fn get(&self, id: &BookingId) -> Result<Option<Booking>, BackendError>;
    /// All bookings on `resource`, ordered by start ascending.
    async fn query_by_resource(&self, resource: &str) -> Result<Vec<Booking>, BackendError>;
}

/// Row-level push feed. Delivery is at-least-once and unordered across
/// resources; every event carries the full row.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, resource: &str) -> Result<FeedSubscription, BackendError>;
}

/// Session and role source.
#[async_trait]
pub trait Authorization: Send + Sync {
    /// The signed-in principal, if any.
    async fn current_viewer(&self) -> Option<UserId>;
    async fn is_admin(&self, user: &UserId) -> bool;
}

/// Blocking yes/no gate shown before destructive actions.
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Run a backend call under an optional deadline.
pub async fn within<T, F>(deadline: Option<Duration>, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| BackendError::Timeout(limit))?,
        None => call.await,
    }
}
