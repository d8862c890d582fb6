use crate::limits::*;
use crate::model::*;
use crate::ports::BackendError;

use super::state::ResourceState;

pub(crate) fn validate_span(span: &Span) -> Result<(), BackendError> {
    if !span.is_forward() {
        return Err(BackendError::Invalid("start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BackendError::Invalid("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(BackendError::Invalid("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_row(title: &str, resource: &str) -> Result<(), BackendError> {
    if title.trim().is_empty() {
        return Err(BackendError::Invalid("title required"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(BackendError::Invalid("title too long"));
    }
    if resource.is_empty() || resource.len() > MAX_RESOURCE_KEY_LEN {
        return Err(BackendError::Invalid("bad resource key"));
    }
    Ok(())
}

/// The first booking other than `excluding` that overlaps `span`.
pub(crate) fn find_conflict<'a>(
    rs: &'a ResourceState,
    span: &Span,
    excluding: Option<&BookingId>,
) -> Option<&'a Booking> {
    rs.overlapping(span)
        .find(|b| excluding != Some(&b.id) && b.span().overlaps(span))
}

/// Exclusion constraint: no two rows on a resource may overlap.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    span: &Span,
    excluding: Option<&BookingId>,
) -> Result<(), BackendError> {
    match find_conflict(rs, span, excluding) {
        Some(existing) => Err(BackendError::Conflict(existing.id.clone())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const BASE: Ms = 1_737_367_200_000;

    fn state(rows: &[(&str, Ms, Ms)]) -> ResourceState {
        let mut rs = ResourceState::new("roomA");
        for (id, s, e) in rows {
            rs.insert_booking(Booking {
                id: BookingId::from(*id),
                resource: "roomA".into(),
                owner_id: Some(UserId::from("u1")),
                title: (*id).into(),
                start: *s,
                end: *e,
                profile_ref: None,
            });
        }
        rs
    }

    #[test]
    fn back_to_back_is_allowed() {
        let rs = state(&[("a", BASE, BASE + H)]);
        assert!(check_no_conflict(&rs, &Span::new(BASE + H, BASE + 2 * H), None).is_ok());
        assert!(check_no_conflict(&rs, &Span::new(BASE - H, BASE), None).is_ok());
    }

    #[test]
    fn overlap_names_the_existing_booking() {
        let rs = state(&[("a", BASE, BASE + H)]);
        let err = check_no_conflict(&rs, &Span::new(BASE + H / 2, BASE + 2 * H), None).unwrap_err();
        assert_eq!(err, BackendError::Conflict(BookingId::from("a")));
    }

    #[test]
    fn excluded_booking_does_not_conflict_with_itself() {
        let rs = state(&[("a", BASE, BASE + H), ("b", BASE + 2 * H, BASE + 3 * H)]);
        let a = BookingId::from("a");
        assert!(check_no_conflict(&rs, &Span::new(BASE + H / 2, BASE + 2 * H), Some(&a)).is_ok());
        assert!(check_no_conflict(&rs, &Span::new(BASE + H / 2, BASE + 3 * H), Some(&a)).is_err());
    }

    #[test]
    fn span_limits() {
        assert!(validate_span(&Span::unchecked(BASE, BASE)).is_err());
        assert!(validate_span(&Span::new(0, 1000)).is_err());
        assert!(validate_span(&Span::new(BASE, BASE + 40 * 24 * H)).is_err());
        assert!(validate_span(&Span::new(BASE, BASE + H)).is_ok());
    }
}
