//! End-to-end booking scenarios against the in-memory store.
//!
//! Covers the documented walkthroughs (two confirmations then a waitlist,
//! promotion on cancellation, duplicates, disabled waitlist) plus FIFO order,
//! idempotent cancellation, withdrawal and rollback on a failed commit.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use chrono::NaiveDate;
use futures::TryStreamExt;
use studio_booking::{Coordinator, RequestOutcome, WaitlistPosition};
use studio_booking_core::store::{BookingStore, ScheduleAdmin};
use studio_booking_core::{
    BookingError, Occurrence, Principal, RequesterId, ReservationOrigin, ReservationStatus,
    SlotId, WaitlistStatus,
};
use studio_booking_testing::{AdvancingClock, InMemoryBookingStore, helpers};

struct Fixture {
    store: InMemoryBookingStore,
    coordinator: Coordinator<InMemoryBookingStore, AdvancingClock>,
    slot_id: SlotId,
    date: NaiveDate,
}

impl Fixture {
    async fn new(maximum: u32, waitlist_allowed: bool) -> Self {
        helpers::init_test_tracing();
        let store = InMemoryBookingStore::new();
        let slot = helpers::seed_slot(&store, maximum, waitlist_allowed)
            .await
            .expect("Failed to seed slot");
        Self {
            coordinator: Coordinator::new(store.clone(), AdvancingClock::default()),
            store,
            slot_id: slot.id,
            date: helpers::class_date(),
        }
    }

    const fn occurrence(&self) -> Occurrence {
        Occurrence::new(self.slot_id, self.date)
    }

    async fn request(&self, principal: &Principal, join: bool) -> RequestOutcome {
        self.coordinator
            .request_reservation(principal, self.slot_id, self.date, join)
            .await
            .expect("Request should succeed")
    }

    async fn waitlist(&self, principal: &Principal) -> Vec<WaitlistPosition> {
        self.coordinator
            .list_waitlist(principal)
            .try_collect()
            .await
            .expect("Listing should succeed")
    }
}

fn member() -> Principal {
    Principal::member(RequesterId::new())
}

#[tokio::test]
async fn scenario_a_fills_capacity_then_waitlists() {
    let fx = Fixture::new(2, true).await;
    let (user1, user2, user3) = (member(), member(), member());

    assert!(matches!(fx.request(&user1, false).await, RequestOutcome::Confirmed { .. }));
    assert!(matches!(fx.request(&user2, false).await, RequestOutcome::Confirmed { .. }));

    let outcome = fx.request(&user3, true).await;
    assert_eq!(outcome.position(), Some(1));

    let snapshot = fx.coordinator.inspect(fx.slot_id, fx.date).await.unwrap();
    assert_eq!(snapshot.confirmed_count, 2);
    assert_eq!(snapshot.available_spots, 0);
    assert!(snapshot.is_full);
    assert_eq!(snapshot.waitlist_count, 1);
}

#[tokio::test]
async fn scenario_b_cancellation_promotes_the_waiting_member() {
    let fx = Fixture::new(2, true).await;
    let (user1, user2, user3) = (member(), member(), member());

    let held = fx.request(&user1, false).await;
    fx.request(&user2, false).await;
    fx.request(&user3, true).await;

    let outcome = fx
        .coordinator
        .cancel_reservation(&user1, held.reservation().unwrap().id, None)
        .await
        .expect("Cancel should succeed");

    assert!(outcome.cancelled.status.is_cancelled());
    assert_eq!(outcome.promoted(), Some(user3.requester_id));

    let user3_reservations = fx.coordinator.list_reservations(&user3).await.unwrap();
    assert_eq!(user3_reservations.len(), 1);
    assert_eq!(user3_reservations[0].status, ReservationStatus::Confirmed);
    assert_eq!(
        user3_reservations[0].origin,
        ReservationOrigin::PromotedFromWaitlist
    );

    assert!(fx.waitlist(&user3).await.is_empty());
    assert_eq!(fx.store.count_waiting(fx.occurrence()).await.unwrap(), 0);
    assert_eq!(fx.store.count_confirmed(fx.occurrence()).await.unwrap(), 2);

    let entries = fx.store.waitlist_of(fx.occurrence()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].status.promoted_reservation(),
        Some(user3_reservations[0].id)
    );
}

#[tokio::test]
async fn scenario_c_second_request_is_a_duplicate() {
    let fx = Fixture::new(5, true).await;
    let user1 = member();

    fx.request(&user1, false).await;
    let second = fx
        .coordinator
        .request_reservation(&user1, fx.slot_id, fx.date, true)
        .await;

    assert_eq!(second, Err(BookingError::DuplicateReservation));
    assert_eq!(fx.store.count_confirmed(fx.occurrence()).await.unwrap(), 1);
    assert_eq!(fx.store.count_waiting(fx.occurrence()).await.unwrap(), 0);
}

#[tokio::test]
async fn scenario_d_disabled_waitlist_reports_full() {
    let fx = Fixture::new(1, false).await;
    fx.request(&member(), false).await;

    let outcome = fx.request(&member(), true).await;

    assert_eq!(outcome, RequestOutcome::Full { can_join_waitlist: false });
    assert_eq!(fx.store.count_waiting(fx.occurrence()).await.unwrap(), 0);
}

#[tokio::test]
async fn waitlist_is_promoted_in_arrival_order() {
    let fx = Fixture::new(1, true).await;
    let holder = member();
    let (a, b, c) = (member(), member(), member());

    let held = fx.request(&holder, false).await;
    assert_eq!(fx.request(&a, true).await.position(), Some(1));
    assert_eq!(fx.request(&b, true).await.position(), Some(2));
    assert_eq!(fx.request(&c, true).await.position(), Some(3));

    let first = fx
        .coordinator
        .cancel_reservation(&holder, held.reservation().unwrap().id, None)
        .await
        .unwrap();
    assert_eq!(first.promoted(), Some(a.requester_id));

    assert_eq!(fx.waitlist(&b).await[0].position, 1);
    assert_eq!(fx.waitlist(&c).await[0].position, 2);

    let promoted = first.promotion.unwrap().reservation;
    let second = fx
        .coordinator
        .cancel_reservation(&a, promoted.id, None)
        .await
        .unwrap();
    assert_eq!(second.promoted(), Some(b.requester_id));
    assert_eq!(fx.waitlist(&c).await[0].position, 1);
}

#[tokio::test]
async fn cancelling_twice_does_not_promote_twice() {
    let fx = Fixture::new(1, true).await;
    let holder = member();
    let (first_waiter, second_waiter) = (member(), member());

    let held = fx.request(&holder, false).await;
    fx.request(&first_waiter, true).await;
    fx.request(&second_waiter, true).await;
    let reservation_id = held.reservation().unwrap().id;

    let outcome = fx
        .coordinator
        .cancel_reservation(&holder, reservation_id, Some("injury".to_string()))
        .await
        .unwrap();
    assert_eq!(outcome.promoted(), Some(first_waiter.requester_id));
    assert!(matches!(
        &outcome.cancelled.status,
        ReservationStatus::Cancelled { reason: Some(reason), .. } if reason == "injury"
    ));

    let again = fx
        .coordinator
        .cancel_reservation(&holder, reservation_id, None)
        .await;
    assert_eq!(again, Err(BookingError::AlreadyCancelled));

    assert_eq!(fx.store.count_confirmed(fx.occurrence()).await.unwrap(), 1);
    assert_eq!(fx.waitlist(&second_waiter).await[0].position, 1);
}

#[tokio::test]
async fn withdrawal_shifts_positions_and_skips_promotion() {
    let fx = Fixture::new(1, true).await;
    let holder = member();
    let (a, b, c) = (member(), member(), member());

    let held = fx.request(&holder, false).await;
    fx.request(&a, true).await;
    let RequestOutcome::Waitlisted { entry: b_entry, .. } = fx.request(&b, true).await else {
        panic!("b should be waitlisted");
    };
    fx.request(&c, true).await;

    let withdrawn = fx
        .coordinator
        .withdraw_from_waitlist(&b, b_entry.id)
        .await
        .expect("Withdraw should succeed");
    assert!(matches!(withdrawn.status, WaitlistStatus::Withdrawn { .. }));

    assert!(fx.waitlist(&b).await.is_empty());
    assert_eq!(fx.waitlist(&c).await[0].position, 2);
    assert!(fx.coordinator.list_reservations(&b).await.unwrap().is_empty());
    // Withdrawal alone never fills a spot.
    assert_eq!(fx.store.count_confirmed(fx.occurrence()).await.unwrap(), 1);

    let first = fx
        .coordinator
        .cancel_reservation(&holder, held.reservation().unwrap().id, None)
        .await
        .unwrap();
    assert_eq!(first.promoted(), Some(a.requester_id));

    let second = fx
        .coordinator
        .cancel_reservation(&a, first.promotion.unwrap().reservation.id, None)
        .await
        .unwrap();
    assert_eq!(second.promoted(), Some(c.requester_id));
    assert!(fx.coordinator.list_reservations(&b).await.unwrap().is_empty());
}

#[tokio::test]
async fn only_owner_or_staff_may_cancel() {
    let fx = Fixture::new(2, true).await;
    let owner = member();
    let held = fx.request(&owner, false).await;
    let reservation_id = held.reservation().unwrap().id;

    let stranger = fx
        .coordinator
        .cancel_reservation(&member(), reservation_id, None)
        .await;
    assert_eq!(stranger, Err(BookingError::Forbidden));
    assert_eq!(fx.store.count_confirmed(fx.occurrence()).await.unwrap(), 1);

    let staff = Principal::elevated(RequesterId::new());
    let outcome = fx
        .coordinator
        .cancel_reservation(&staff, reservation_id, Some("class moved".to_string()))
        .await
        .expect("Staff may cancel on behalf of a member");
    assert!(outcome.cancelled.status.is_cancelled());
    assert_eq!(outcome.cancelled.requester_id, owner.requester_id);
}

#[tokio::test]
async fn joining_the_waitlist_twice_is_a_duplicate() {
    let fx = Fixture::new(0, true).await;
    let waiter = member();

    assert_eq!(fx.request(&waiter, true).await.position(), Some(1));
    let again = fx
        .coordinator
        .request_reservation(&waiter, fx.slot_id, fx.date, true)
        .await;
    assert_eq!(again, Err(BookingError::DuplicateWaitlistEntry));

    // Declining to join reports Full rather than the duplicate.
    assert_eq!(
        fx.request(&waiter, false).await,
        RequestOutcome::Full { can_join_waitlist: true }
    );
}

#[tokio::test]
async fn inactive_or_unknown_slots_are_not_found() {
    let fx = Fixture::new(3, true).await;
    fx.store
        .set_slot_active(fx.slot_id, false)
        .await
        .expect("Failed to deactivate");

    let inactive = fx
        .coordinator
        .request_reservation(&member(), fx.slot_id, fx.date, false)
        .await;
    assert_eq!(inactive, Err(BookingError::NotFound));

    let unknown = fx
        .coordinator
        .request_reservation(&member(), SlotId::new(), fx.date, false)
        .await;
    assert_eq!(unknown, Err(BookingError::NotFound));
}

#[tokio::test]
async fn occurrences_on_different_dates_are_independent() {
    let fx = Fixture::new(1, true).await;
    let holder = member();
    let next_week = fx.date + chrono::Duration::days(7);

    fx.request(&holder, false).await;
    let outcome = fx
        .coordinator
        .request_reservation(&holder, fx.slot_id, next_week, false)
        .await
        .expect("Next week is a separate occurrence");
    assert!(outcome.reservation().is_some());

    let reservations = fx.coordinator.list_reservations(&holder).await.unwrap();
    assert_eq!(reservations.len(), 2);
    // Newest first.
    assert_eq!(reservations[0].occurrence.date, next_week);
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_promotion() {
    let fx = Fixture::new(1, true).await;
    let holder = member();
    let waiter = member();

    let held = fx.request(&holder, false).await;
    fx.request(&waiter, true).await;
    let reservation_id = held.reservation().unwrap().id;

    fx.store.fail_next_commits(1);
    let failed = fx
        .coordinator
        .cancel_reservation(&holder, reservation_id, None)
        .await;
    assert_eq!(failed, Err(BookingError::StorageTransient));

    let still_held = fx
        .store
        .find_reservation(reservation_id)
        .await
        .unwrap()
        .unwrap();
    assert!(still_held.is_confirmed());
    assert_eq!(fx.waitlist(&waiter).await[0].position, 1);
    assert!(fx.coordinator.list_reservations(&waiter).await.unwrap().is_empty());

    // Re-running the whole operation succeeds.
    let outcome = fx
        .coordinator
        .cancel_reservation(&holder, reservation_id, None)
        .await
        .unwrap();
    assert_eq!(outcome.promoted(), Some(waiter.requester_id));
}

#[tokio::test]
async fn failed_begin_surfaces_storage_transient() {
    let fx = Fixture::new(1, true).await;
    fx.store.fail_next_begins(1);

    let result = fx
        .coordinator
        .request_reservation(&member(), fx.slot_id, fx.date, false)
        .await;
    assert_eq!(result, Err(BookingError::StorageTransient));
    assert_eq!(fx.store.count_confirmed(fx.occurrence()).await.unwrap(), 0);
}

#[tokio::test]
async fn waitlist_listing_restarts_on_every_call() {
    let fx = Fixture::new(0, true).await;
    let waiter = member();
    let next_week = fx.date + chrono::Duration::days(7);

    fx.request(&waiter, true).await;
    fx.coordinator
        .request_reservation(&waiter, fx.slot_id, next_week, true)
        .await
        .unwrap();

    let first = fx.waitlist(&waiter).await;
    let second = fx.waitlist(&waiter).await;
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert!(first.iter().all(|p| p.position == 1));
}
