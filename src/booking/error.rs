use crate::model::BookingId;
use crate::ports::BackendError;

/// Everything a booking mutation or snapshot load can fail with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// No active session when the mutation was attempted.
    AuthRequired,
    /// Authenticated, but neither the owner nor an admin.
    NotAuthorized,
    /// Missing title, non-forward interval, or a limit breached.
    Validation(&'static str),
    /// The availability check (or the backend's exclusion constraint) said no.
    SlotUnavailable,
    /// Transport or backend failure, including an expired deadline.
    Persistence(String),
    /// The target booking vanished, e.g. deleted by another client first.
    NotFound(BookingId),
}

impl BookingError {
    /// Definitive given the current input: retrying without changes will
    /// fail the same way.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BookingError::Persistence(_))
    }

    /// Short message for the surface that initiated the mutation.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::AuthRequired => "You must be logged in to manage bookings.".into(),
            BookingError::NotAuthorized => "You can only change your own bookings.".into(),
            BookingError::Validation(reason) => (*reason).to_string(),
            BookingError::SlotUnavailable => {
                "The selected time slot is already taken. Please choose another one.".into()
            }
            BookingError::Persistence(_) => "Error saving booking. Please try again.".into(),
            BookingError::NotFound(_) => "This booking no longer exists.".into(),
        }
    }

    /// Label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            BookingError::AuthRequired => "auth_required",
            BookingError::NotAuthorized => "not_authorized",
            BookingError::Validation(_) => "validation",
            BookingError::SlotUnavailable => "slot_unavailable",
            BookingError::Persistence(_) => "persistence",
            BookingError::NotFound(_) => "not_found",
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::AuthRequired => write!(f, "authentication required"),
            BookingError::NotAuthorized => write!(f, "not authorized to modify booking"),
            BookingError::Validation(msg) => write!(f, "validation failed: {msg}"),
            BookingError::SlotUnavailable => write!(f, "slot unavailable"),
            BookingError::Persistence(e) => write!(f, "persistence error: {e}"),
            BookingError::NotFound(id) => write!(f, "booking not found: {id}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<BackendError> for BookingError {
    fn from(e: BackendError) -> Self {
        match e {
            // A racing writer won: the later, server-side rejection of the slot.
            BackendError::Conflict(_) => BookingError::SlotUnavailable,
            BackendError::NotFound(id) => BookingError::NotFound(id),
            BackendError::Invalid(msg) => BookingError::Validation(msg),
            other => BookingError::Persistence(other.to_string()),
        }
    }
}
