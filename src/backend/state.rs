use crate::model::*;

/// Every booking on one resource key, sorted by `start`.
#[derive(Debug, Clone, Default)]
pub struct ResourceState {
    pub key: String,
    pub bookings: Vec<Booking>,
}

impl ResourceState {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start, |b| b.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: &BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| &b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| &b.id == id)
    }

    /// Bookings whose span overlaps the query window. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end > query.start)
    }

    /// Replay one journaled change.
    pub fn apply(&mut self, event: &ChangeEvent) {
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                self.remove_booking(&event.row.id);
                self.insert_booking(event.row.clone());
            }
            ChangeKind::Delete => {
                self.remove_booking(&event.row.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(id: &str, start: Ms, end: Ms) -> Booking {
        Booking {
            id: BookingId::from(id),
            resource: "roomA".into(),
            owner_id: Some(UserId::from("u1")),
            title: id.into(),
            start,
            end,
            profile_ref: None,
        }
    }

    #[test]
    fn overlapping_uses_half_open_bounds() {
        let mut rs = ResourceState::new("roomA");
        rs.insert_booking(booking("a", 0, 1000));
        rs.insert_booking(booking("b", 1000, 2000));
        rs.insert_booking(booking("c", 3000, 4000));

        let hits: Vec<_> = rs.overlapping(&Span::new(1000, 3000)).map(|b| b.id.as_str()).collect();
        assert_eq!(hits, vec!["b"]);
    }

    #[test]
    fn apply_update_replaces_row() {
        let mut rs = ResourceState::new("roomA");
        rs.apply(&ChangeEvent::insert(booking("a", 0, 1000)));
        rs.apply(&ChangeEvent::update(booking("a", 5000, 6000)));
        assert_eq!(rs.bookings.len(), 1);
        assert_eq!(rs.bookings[0].start, 5000);
        rs.apply(&ChangeEvent::delete(booking("a", 5000, 6000)));
        assert!(rs.bookings.is_empty());
    }
}
