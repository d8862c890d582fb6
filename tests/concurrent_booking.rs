use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use slotline::auth::{PresetConfirmation, StaticAuthorization};
use slotline::backend::MemoryBackend;
use slotline::booking::{BookingError, BookingMutator, CalendarViewModel, DeleteOutcome};
use slotline::model::*;
use slotline::ports::BookingRepository;

const ROOM: &str = "roomA";
const JAN_20_10H: Ms = 1_737_367_200_000;
const H: Ms = 3_600_000;
const M: Ms = 60_000;

// ── Test infrastructure ──────────────────────────────────────

fn mutator_for(backend: &Arc<MemoryBackend>, user: &str) -> BookingMutator {
    let auth = Arc::new(StaticAuthorization::new(Some(UserId::from(user)), HashSet::new()));
    let confirm = Arc::new(PresetConfirmation::new(true));
    BookingMutator::new(backend.clone(), backend.clone(), auth, confirm)
        .with_call_timeout(Some(Duration::from_secs(5)))
}

async fn view_for(backend: &Arc<MemoryBackend>, user: &str) -> CalendarViewModel {
    let mut calendar = CalendarViewModel::new(ROOM, mutator_for(backend, user));
    calendar.refresh_viewer().await;
    calendar.attach(backend.as_ref()).await.unwrap();
    calendar
}

fn temp_journal() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotline_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("bookings.wal")
}

fn assert_no_overlaps(rows: &[Booking]) {
    for (i, a) in rows.iter().enumerate() {
        for b in &rows[i + 1..] {
            assert!(
                !a.span().overlaps(&b.span()),
                "{} [{}, {}) overlaps {} [{}, {})",
                a.id,
                a.start,
                a.end,
                b.id,
                b.start,
                b.end
            );
        }
    }
}

/// xorshift64, enough to scatter operations deterministically.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

// ── Races ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_overlapping_creates_commit_once() {
    let backend = Arc::new(MemoryBackend::new());
    let n = 16;

    let mut handles = Vec::new();
    for i in 0..n {
        let mutator = mutator_for(&backend, &format!("user-{i}"));
        handles.push(tokio::spawn(async move {
            let owner = mutator.current_viewer().await;
            // All ranges share 10:30-11:00.
            let span = Span::new(JAN_20_10H + i * M, JAN_20_10H + H);
            mutator
                .create(ROOM, span, "Contested", owner.as_ref(), None)
                .await
        }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert_eq!(e, BookingError::SlotUnavailable),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(backend.booking_count(ROOM).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_disjoint_creates_all_commit() {
    let backend = Arc::new(MemoryBackend::new());

    let mut handles = Vec::new();
    for i in 0..24 {
        let mutator = mutator_for(&backend, "alice");
        handles.push(tokio::spawn(async move {
            let owner = mutator.current_viewer().await;
            let span = Span::new(JAN_20_10H + i * H, JAN_20_10H + (i + 1) * H);
            mutator.create(ROOM, span, "Hourly", owner.as_ref(), None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let rows = backend.query_by_resource(ROOM).await.unwrap();
    assert_eq!(rows.len(), 24);
    assert!(rows.windows(2).all(|w| w[0].start <= w[1].start));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn random_workload_never_overlaps() {
    let backend = Arc::new(MemoryBackend::new());
    let resources = ["roomA", "roomB", "roomC"];

    let mut handles = Vec::new();
    for worker in 0..6u64 {
        let mutator = mutator_for(&backend, "alice");
        let backend = backend.clone();
        handles.push(tokio::spawn(async move {
            let mut rng = Rng(0x9E37_79B9_7F4A_7C15 ^ (worker + 1));
            let owner = mutator.current_viewer().await;
            for _ in 0..80 {
                let resource = resources[rng.below(3) as usize];
                let start = JAN_20_10H + rng.below(48) as Ms * 30 * M;
                let span = Span::new(start, start + (1 + rng.below(4) as Ms) * 30 * M);
                match rng.below(4) {
                    0 | 1 => {
                        let owner = owner.as_ref();
                        let _ = mutator.create(resource, span, "Random", owner, None).await;
                    }
                    2 => {
                        let rows = backend.query_by_resource(resource).await.unwrap();
                        if let Some(b) = rows.get(rng.below(rows.len() as u64 + 1) as usize) {
                            let owner = owner.as_ref();
                            let _ = mutator.update(&b.id, resource, span, None, owner).await;
                        }
                    }
                    _ => {
                        let rows = backend.query_by_resource(resource).await.unwrap();
                        if let Some(b) = rows.get(rng.below(rows.len() as u64 + 1) as usize) {
                            let _ = mutator.delete(&b.id, resource, owner.as_ref()).await;
                        }
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for resource in resources {
        let rows = backend.query_by_resource(resource).await.unwrap();
        assert_no_overlaps(&rows);
    }
}

// ── Live feed convergence ────────────────────────────────────

#[tokio::test]
async fn two_calendars_converge_through_the_feed() {
    let backend = Arc::new(MemoryBackend::new());
    let mut alice = view_for(&backend, "alice").await;
    let mut bob = view_for(&backend, "bob").await;

    alice.on_range_select(Span::new(JAN_20_10H, JAN_20_10H + H));
    alice.form_mut().unwrap().set_title("Standup");
    let created = alice.submit_modal().await.unwrap().unwrap();

    let kind = tokio::time::timeout(Duration::from_secs(1), bob.next_change())
        .await
        .unwrap();
    assert_eq!(kind, Some(ChangeKind::Insert));
    let seen = bob.events();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].title, "Standup");
    assert!(!seen[0].editable);

    // Bob cannot drag Alice's booking.
    let mut reverted = false;
    let elsewhere = Span::new(JAN_20_10H + 2 * H, JAN_20_10H + 3 * H);
    let err = bob
        .on_drag_reschedule(&created.id, elsewhere, || reverted = true)
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::NotAuthorized);
    assert!(reverted);

    // Alice can, and Bob sees it move.
    let moved = Span::new(JAN_20_10H + 2 * H, JAN_20_10H + 3 * H);
    alice.on_drag_reschedule(&created.id, moved, || {}).await.unwrap();
    let kind = tokio::time::timeout(Duration::from_secs(1), bob.next_change())
        .await
        .unwrap();
    assert_eq!(kind, Some(ChangeKind::Update));
    assert_eq!(bob.store().get(&created.id).unwrap().span(), moved);

    // Alice's own echoes never duplicate her row.
    alice.pump_feed();
    assert_eq!(alice.store().len(), 1);
    assert_eq!(alice.store().get(&created.id).unwrap().span(), moved);

    assert!(alice.on_event_click(&created.id));
    assert_eq!(alice.delete_from_modal().await.unwrap(), Ok(DeleteOutcome::Deleted));
    let kind = tokio::time::timeout(Duration::from_secs(1), bob.next_change())
        .await
        .unwrap();
    assert_eq!(kind, Some(ChangeKind::Delete));
    assert!(bob.store().is_empty());
}

#[tokio::test]
async fn feed_is_scoped_to_resource() {
    let backend = Arc::new(MemoryBackend::new());
    let mut watcher = view_for(&backend, "bob").await;
    let writer = mutator_for(&backend, "alice");
    let alice = UserId::from("alice");

    writer
        .create("roomB", Span::new(JAN_20_10H, JAN_20_10H + H), "Elsewhere", Some(&alice), None)
        .await
        .unwrap();
    writer
        .create(ROOM, Span::new(JAN_20_10H, JAN_20_10H + H), "Here", Some(&alice), None)
        .await
        .unwrap();

    let kind = tokio::time::timeout(Duration::from_secs(1), watcher.next_change())
        .await
        .unwrap();
    assert_eq!(kind, Some(ChangeKind::Insert));
    assert_eq!(watcher.store().len(), 1);
    assert_eq!(watcher.store().bookings()[0].title, "Here");
}

// ── Durability ───────────────────────────────────────────────

#[tokio::test]
async fn journal_replay_restores_bookings() {
    let path = temp_journal();
    let alice = UserId::from("alice");
    let (kept, removed) = {
        let backend = Arc::new(MemoryBackend::open(&path).unwrap());
        let mutator = mutator_for(&backend, "alice");
        let kept = mutator
            .create(ROOM, Span::new(JAN_20_10H, JAN_20_10H + H), "Kept", Some(&alice), None)
            .await
            .unwrap();
        let later = Span::new(JAN_20_10H + H, JAN_20_10H + 2 * H);
        let removed = mutator
            .create(ROOM, later, "Removed", Some(&alice), None)
            .await
            .unwrap();
        let moved = Span::new(JAN_20_10H + 3 * H, JAN_20_10H + 4 * H);
        mutator
            .update(&kept.id, ROOM, moved, Some("Moved"), Some(&alice))
            .await
            .unwrap();
        mutator.delete(&removed.id, ROOM, Some(&alice)).await.unwrap();
        (kept, removed)
    };

    let backend = MemoryBackend::open(&path).unwrap();
    let rows = backend.query_by_resource(ROOM).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, kept.id);
    assert_eq!(rows[0].title, "Moved");
    assert_eq!(rows[0].span(), Span::new(JAN_20_10H + 3 * H, JAN_20_10H + 4 * H));
    assert_eq!(backend.get(&removed.id).await.unwrap(), None);
}
