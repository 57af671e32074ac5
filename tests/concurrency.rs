use std::sync::Arc;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use drivetime::clock::ManualClock;
use drivetime::config::Config;
use drivetime::error::SlotError;
use drivetime::limits::{HOUR_MS, MINUTE_MS};
use drivetime::model::{Ms, SessionId, Span};
use drivetime::platform::Platform;
use drivetime::recalc::RecalcReceiver;
use drivetime::reservation::BookingRequest;
use drivetime::schedule::{AppointmentType, WeeklyHours};

const MONDAY: Ms = 1_767_571_200_000; // 2026-01-05T00:00:00Z

async fn platform_with_grid(name: &str) -> (Arc<Platform>, RecalcReceiver, Ulid) {
    let data_dir = std::env::temp_dir().join(format!("drivetime_concurrency_{name}_{}", Ulid::new()));
    std::fs::create_dir_all(&data_dir).unwrap();
    let config = Config {
        data_dir,
        ..Config::default()
    };
    let clock = Arc::new(ManualClock::new(MONDAY + 6 * HOUR_MS));
    let (platform, receiver) = Platform::new(config, clock, CancellationToken::new());

    let staff = Ulid::new();
    platform
        .calendar
        .set_working_hours(
            "school",
            staff,
            vec![WeeklyHours {
                weekday: 0,
                start_minute: 8 * 60,
                end_minute: 12 * 60,
                location_id: None,
                category: Some("B".into()),
            }],
        )
        .unwrap();
    platform.generator.regenerate("school", staff).await.unwrap();
    (Arc::new(platform), receiver, staff)
}

async fn first_slot(platform: &Platform, staff: Ulid) -> Ulid {
    let store = platform.tenants.get("school").unwrap();
    let day = Span::new(MONDAY, MONDAY + 24 * HOUR_MS);
    let slots = store.slots_starting_in(Some(&staff), &day).await;
    assert_eq!(slots.len(), 8);
    assert_eq!(slots[0].span.start, MONDAY + 8 * HOUR_MS);
    slots[0].id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_concurrent_reserve_wins() {
    let (platform, _receiver, staff) = platform_with_grid("reserve").await;
    let slot_id = first_slot(&platform, staff).await;

    let attempts = (0..64).map(|i| {
        let platform = platform.clone();
        tokio::spawn(async move {
            let session = SessionId::parse(format!("cart-{i}")).unwrap();
            platform.reservations.reserve("school", slot_id, &session).await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, SlotError::SlotAlreadyReserved(id) if *id == slot_id));
        }
    }

    // The stored hold belongs to the winner.
    let slot = platform.tenants.get("school").unwrap().get_slot(&slot_id).await.unwrap();
    assert_eq!(slot.reserved_by_session.as_ref(), Some(&winners[0].session_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_confirmations_book_once() {
    let (platform, _receiver, staff) = platform_with_grid("confirm").await;
    let slot_id = first_slot(&platform, staff).await;
    let session = SessionId::parse("cart").unwrap();
    assert_ok!(platform.reservations.reserve("school", slot_id, &session).await);

    let confirmations = (0..16).map(|_| {
        let platform = platform.clone();
        let request = BookingRequest {
            tenant: "school".into(),
            slot_id,
            session_id: session.clone(),
            appointment_type: AppointmentType::Lesson,
            category: "B".into(),
            notes: None,
        };
        tokio::spawn(async move { platform.reservations.confirm_booking(request).await })
    });
    let results: Vec<_> = join_all(confirmations)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, SlotError::ReservationExpired(_))));
    assert_eq!(platform.appointments.confirmed_for_slot(slot_id), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reserves_on_different_slots_do_not_interfere() {
    let (platform, _receiver, staff) = platform_with_grid("parallel").await;
    let store = platform.tenants.get("school").unwrap();
    let day = Span::new(MONDAY, MONDAY + 24 * HOUR_MS);
    let slot_ids: Vec<Ulid> = store
        .slots_starting_in(Some(&staff), &day)
        .await
        .iter()
        .map(|s| s.id)
        .collect();

    let attempts = slot_ids.iter().enumerate().map(|(i, &slot_id)| {
        let platform = platform.clone();
        tokio::spawn(async move {
            let session = SessionId::parse(format!("cart-{i}")).unwrap();
            platform.reservations.reserve("school", slot_id, &session).await
        })
    });
    for joined in join_all(attempts).await {
        let held = assert_ok!(joined.unwrap());
        assert_eq!(held.end - held.start, 30 * MINUTE_MS);
    }

    let stats = platform
        .tenants
        .existing_manager("school")
        .unwrap()
        .get_slot_stats(staff, MONDAY + 9 * HOUR_MS, "school")
        .await
        .unwrap();
    assert_eq!((stats.total, stats.reserved, stats.available), (8, 8, 0));

    // A second round finds everything taken.
    let session = SessionId::parse("late").unwrap();
    assert_err!(platform.reservations.reserve("school", slot_ids[0], &session).await);
}
