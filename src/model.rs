use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Callers constructing spans from user input must check `is_forward`
    /// first; this only asserts in debug builds.
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span without the ordering assertion. Used at the edges where
    /// an unvalidated range arrives from a gesture or form.
    pub fn unchecked(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_forward(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Opaque booking identifier, assigned by the backend on insert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(String);

impl BookingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh time-ordered id, the way the reference backend assigns them.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A persisted booking row. Field names on the wire follow the bookings
/// table (`user_id`, `start_time`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub resource: String,
    #[serde(rename = "user_id")]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "start_time", with = "crate::time::rfc3339")]
    pub start: Ms,
    #[serde(rename = "end_time", with = "crate::time::rfc3339")]
    pub end: Ms,
    #[serde(rename = "profile_id", default)]
    pub profile_ref: Option<String>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::unchecked(self.start, self.end)
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.owner_id.as_ref() == Some(user)
    }
}

/// Insert payload: everything but the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub resource: String,
    pub owner_id: UserId,
    pub title: String,
    pub span: Span,
    pub profile_ref: Option<String>,
}

impl NewBooking {
    pub fn into_booking(self, id: BookingId) -> Booking {
        Booking {
            id,
            resource: self.resource,
            owner_id: Some(self.owner_id),
            title: self.title,
            start: self.span.start,
            end: self.span.end,
            profile_ref: self.profile_ref,
        }
    }
}

/// Partial update. `None` fields keep the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPatch {
    pub title: Option<String>,
    pub span: Option<Span>,
}

impl BookingPatch {
    pub fn apply_to(&self, booking: &mut Booking) {
        if let Some(title) = &self.title {
            booking.title = title.clone();
        }
        if let Some(span) = self.span {
            booking.start = span.start;
            booking.end = span.end;
        }
    }
}

/// Row-level change kinds delivered by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// One change-feed message. Always carries the full row; for deletes it is
/// the row as it was before removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub row: Booking,
}

impl ChangeEvent {
    pub fn insert(row: Booking) -> Self {
        Self { kind: ChangeKind::Insert, row }
    }

    pub fn update(row: Booking) -> Self {
        Self { kind: ChangeKind::Update, row }
    }

    pub fn delete(row: Booking) -> Self {
        Self { kind: ChangeKind::Delete, row }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_spans_do_not_overlap() {
        let a = Span::new(1000, 2000);
        let b = Span::new(2000, 3000);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn nested_and_partial_spans_overlap() {
        let outer = Span::new(1000, 5000);
        assert!(outer.overlaps(&Span::new(2000, 3000)));
        assert!(outer.overlaps(&Span::new(4999, 6000)));
        assert!(Span::new(0, 1001).overlaps(&outer));
    }

    #[test]
    fn patch_keeps_unset_fields() {
        let mut b = NewBooking {
            resource: "roomA".into(),
            owner_id: UserId::from("u1"),
            title: "Standup".into(),
            span: Span::new(0, 1000),
            profile_ref: None,
        }
        .into_booking(BookingId::from("b1"));

        BookingPatch { title: None, span: Some(Span::new(5000, 6000)) }.apply_to(&mut b);
        assert_eq!(b.title, "Standup");
        assert_eq!(b.span(), Span::new(5000, 6000));
    }

    #[test]
    fn booking_row_uses_table_column_names() {
        let json = r#"{
            "id": "booking-1",
            "user_id": "mock-user-id",
            "resource": "roomA",
            "title": "Test Meeting",
            "start_time": "2025-01-20T10:00:00.000Z",
            "end_time": "2025-01-20T11:00:00+00:00",
            "profile_id": null
        }"#;
        let b: Booking = serde_json::from_str(json).unwrap();
        assert_eq!(b.id, BookingId::from("booking-1"));
        assert_eq!(b.owner_id, Some(UserId::from("mock-user-id")));
        assert_eq!(b.span().duration_ms(), 3_600_000);

        let back = serde_json::to_value(&b).unwrap();
        assert_eq!(back["start_time"], "2025-01-20T10:00:00.000Z");
        assert_eq!(back["user_id"], "mock-user-id");
    }
}
