//! Booking service: the outer shell around the coordinator.
//!
//! Adds what the coordinator deliberately leaves out:
//!
//! - **Retry**: operations failing with [`BookingError::StorageTransient`] are
//!   re-run from the start under a [`RetryPolicy`]. Every attempt is a fresh
//!   unit of work, so nothing is applied twice.
//! - **Metrics**: outcome counters, error kinds and latency.
//! - **Notifications**: dispatched after commit on a spawned task. A failed
//!   delivery is logged and counted and never touches reservation state.

use crate::capacity::CapacitySnapshot;
use crate::coordinator::{CancelOutcome, Coordinator, RequestOutcome, WaitlistStream};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Instant;
use studio_booking_core::environment::Clock;
use studio_booking_core::error::Result;
use studio_booking_core::notify::{NotificationEvent, Notifier};
use studio_booking_core::store::BookingStore;
use studio_booking_core::{
    BookingError, Principal, RequesterId, Reservation, ReservationId, SlotId, WaitlistEntry,
    WaitlistEntryId,
};
use studio_booking_runtime::metrics::BookingMetrics;
use studio_booking_runtime::{RetryPolicy, retry_with_predicate};

/// Which optional notifications are sent.
///
/// Promotions are always notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingSettings {
    /// Send `ReservationConfirmed` on direct confirmation
    pub notify_on_confirmation: bool,
    /// Send `WaitlistJoined` when a request joins the waitlist
    pub notify_on_waitlist: bool,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            notify_on_confirmation: true,
            notify_on_waitlist: false,
        }
    }
}

/// Retrying, instrumented, notifying front of the [`Coordinator`].
#[derive(Debug)]
pub struct BookingService<S, C, N> {
    coordinator: Arc<Coordinator<S, C>>,
    notifier: Arc<N>,
    retry: RetryPolicy,
    settings: BookingSettings,
}

impl<S, C, N> Clone for BookingService<S, C, N> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            notifier: Arc::clone(&self.notifier),
            retry: self.retry.clone(),
            settings: self.settings,
        }
    }
}

impl<S, C, N> BookingService<S, C, N>
where
    S: BookingStore + Clone,
    C: Clock,
    N: Notifier + 'static,
{
    /// Create a service.
    #[must_use]
    pub fn new(
        coordinator: Coordinator<S, C>,
        notifier: N,
        retry: RetryPolicy,
        settings: BookingSettings,
    ) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            notifier: Arc::new(notifier),
            retry,
            settings,
        }
    }

    /// The wrapped coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Coordinator<S, C> {
        &self.coordinator
    }

    /// See [`Coordinator::request_reservation`].
    ///
    /// # Errors
    ///
    /// As [`Coordinator::request_reservation`]; `StorageTransient` only once
    /// the retry policy is exhausted.
    pub async fn request_reservation(
        &self,
        principal: &Principal,
        slot_id: SlotId,
        date: NaiveDate,
        join_waitlist_if_full: bool,
    ) -> Result<RequestOutcome> {
        let coordinator = &*self.coordinator;
        let start = Instant::now();
        let result = retry_with_predicate(
            &self.retry,
            move || coordinator.request_reservation(principal, slot_id, date, join_waitlist_if_full),
            BookingError::is_retryable,
        )
        .await;
        BookingMetrics::record_duration("request_reservation", start.elapsed());

        match &result {
            Ok(RequestOutcome::Confirmed { reservation }) => {
                BookingMetrics::record_confirmed(reservation.origin.as_str());
                if self.settings.notify_on_confirmation {
                    self.dispatch(
                        reservation.requester_id,
                        NotificationEvent::ReservationConfirmed {
                            reservation_id: reservation.id,
                            occurrence: reservation.occurrence,
                        },
                    );
                }
            }
            Ok(RequestOutcome::Full { .. }) => BookingMetrics::record_full(),
            Ok(RequestOutcome::Waitlisted { entry, position }) => {
                BookingMetrics::record_waitlisted();
                if self.settings.notify_on_waitlist {
                    self.dispatch(
                        entry.requester_id,
                        NotificationEvent::WaitlistJoined {
                            entry_id: entry.id,
                            occurrence: entry.occurrence,
                            position: *position,
                        },
                    );
                }
            }
            Err(e) => BookingMetrics::record_error(e.kind()),
        }
        result
    }

    /// See [`Coordinator::cancel_reservation`].
    ///
    /// The promoted requester, if any, is notified after commit.
    ///
    /// # Errors
    ///
    /// As [`Coordinator::cancel_reservation`]; `StorageTransient` only once
    /// the retry policy is exhausted.
    pub async fn cancel_reservation(
        &self,
        principal: &Principal,
        reservation_id: ReservationId,
        reason: Option<String>,
    ) -> Result<CancelOutcome> {
        let coordinator = &*self.coordinator;
        let start = Instant::now();
        let result = retry_with_predicate(
            &self.retry,
            move || coordinator.cancel_reservation(principal, reservation_id, reason.clone()),
            BookingError::is_retryable,
        )
        .await;
        BookingMetrics::record_duration("cancel_reservation", start.elapsed());

        match &result {
            Ok(outcome) => {
                BookingMetrics::record_cancelled(outcome.promotion.is_some());
                if let Some(promotion) = &outcome.promotion {
                    self.dispatch(
                        promotion.requester_id,
                        NotificationEvent::PromotedFromWaitlist {
                            entry_id: promotion.entry_id,
                            reservation_id: promotion.reservation.id,
                            occurrence: promotion.reservation.occurrence,
                        },
                    );
                }
            }
            Err(e) => BookingMetrics::record_error(e.kind()),
        }
        result
    }

    /// See [`Coordinator::withdraw_from_waitlist`].
    ///
    /// # Errors
    ///
    /// As [`Coordinator::withdraw_from_waitlist`]; `StorageTransient` only
    /// once the retry policy is exhausted.
    pub async fn withdraw_from_waitlist(
        &self,
        principal: &Principal,
        entry_id: WaitlistEntryId,
    ) -> Result<WaitlistEntry> {
        let coordinator = &*self.coordinator;
        let start = Instant::now();
        let result = retry_with_predicate(
            &self.retry,
            move || coordinator.withdraw_from_waitlist(principal, entry_id),
            BookingError::is_retryable,
        )
        .await;
        BookingMetrics::record_duration("withdraw_from_waitlist", start.elapsed());

        match &result {
            Ok(_) => BookingMetrics::record_withdrawn(),
            Err(e) => BookingMetrics::record_error(e.kind()),
        }
        result
    }

    /// See [`Coordinator::list_waitlist`].
    pub fn list_waitlist(&self, principal: &Principal) -> WaitlistStream<'_> {
        self.coordinator.list_waitlist(principal)
    }

    /// See [`Coordinator::inspect`].
    ///
    /// # Errors
    ///
    /// As [`Coordinator::inspect`].
    pub async fn inspect(&self, slot_id: SlotId, date: NaiveDate) -> Result<CapacitySnapshot> {
        self.coordinator.inspect(slot_id, date).await
    }

    /// See [`Coordinator::list_reservations`].
    ///
    /// # Errors
    ///
    /// As [`Coordinator::list_reservations`].
    pub async fn list_reservations(&self, principal: &Principal) -> Result<Vec<Reservation>> {
        self.coordinator.list_reservations(principal).await
    }

    /// Hand `event` to the notifier without waiting for delivery.
    fn dispatch(&self, requester_id: RequesterId, event: NotificationEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let event_type = event.event_type();
            if let Err(e) = notifier.notify(requester_id, event).await {
                tracing::warn!(
                    requester_id = %requester_id,
                    event_type,
                    error = %e,
                    "Notification delivery failed"
                );
                BookingMetrics::record_notification_failed(event_type);
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use studio_booking_core::Occurrence;
    use studio_booking_testing::{AdvancingClock, InMemoryBookingStore, RecordingNotifier, helpers};

    async fn service(
        settings: BookingSettings,
    ) -> (
        BookingService<InMemoryBookingStore, AdvancingClock, RecordingNotifier>,
        InMemoryBookingStore,
        RecordingNotifier,
        SlotId,
    ) {
        service_with(settings, RecordingNotifier::new()).await
    }

    async fn service_with(
        settings: BookingSettings,
        notifier: RecordingNotifier,
    ) -> (
        BookingService<InMemoryBookingStore, AdvancingClock, RecordingNotifier>,
        InMemoryBookingStore,
        RecordingNotifier,
        SlotId,
    ) {
        let store = InMemoryBookingStore::new();
        let slot = helpers::seed_slot(&store, 1, true).await.unwrap();
        let service = BookingService::new(
            Coordinator::new(store.clone(), AdvancingClock::default()),
            notifier.clone(),
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(std::time::Duration::from_millis(1))
                .build(),
            settings,
        );
        (service, store, notifier, slot.id)
    }

    #[tokio::test]
    async fn transient_commit_failure_is_retried() {
        let (service, store, _, slot_id) = service(BookingSettings::default()).await;
        store.fail_next_commits(1);

        let outcome = service
            .request_reservation(
                &Principal::member(RequesterId::new()),
                slot_id,
                helpers::class_date(),
                false,
            )
            .await
            .unwrap();
        assert!(outcome.reservation().is_some());
        assert_eq!(
            service
                .inspect(slot_id, helpers::class_date())
                .await
                .unwrap()
                .confirmed_count,
            1
        );
    }

    #[tokio::test]
    async fn exhausted_retries_surface_storage_transient() {
        let (service, store, _, slot_id) = service(BookingSettings::default()).await;
        store.fail_next_commits(3);

        let result = service
            .request_reservation(
                &Principal::member(RequesterId::new()),
                slot_id,
                helpers::class_date(),
                false,
            )
            .await;
        assert_eq!(result, Err(BookingError::StorageTransient));
        assert_eq!(
            store
                .count_confirmed(Occurrence::new(slot_id, helpers::class_date()))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn promotion_is_notified_even_when_confirmations_are_muted() {
        let settings = BookingSettings {
            notify_on_confirmation: false,
            notify_on_waitlist: false,
        };
        let (service, _, notifier, slot_id) = service(settings).await;
        let date = helpers::class_date();
        let holder = Principal::member(RequesterId::new());
        let waiter = RequesterId::new();

        let held = service
            .request_reservation(&holder, slot_id, date, false)
            .await
            .unwrap();
        service
            .request_reservation(&Principal::member(waiter), slot_id, date, true)
            .await
            .unwrap();
        let outcome = service
            .cancel_reservation(&holder, held.reservation().unwrap().id, None)
            .await
            .unwrap();
        assert_eq!(outcome.promoted(), Some(waiter));

        let received = notifier.wait_for(1).await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, waiter);
        assert!(matches!(
            received[0].1,
            NotificationEvent::PromotedFromWaitlist { .. }
        ));
    }

    #[tokio::test]
    async fn failed_promotion_notice_keeps_the_promotion() {
        let settings = BookingSettings {
            notify_on_confirmation: false,
            notify_on_waitlist: false,
        };
        let (service, _, notifier, slot_id) =
            service_with(settings, RecordingNotifier::failing()).await;
        let date = helpers::class_date();
        let holder = Principal::member(RequesterId::new());
        let waiter = RequesterId::new();

        let held = service
            .request_reservation(&holder, slot_id, date, false)
            .await
            .unwrap();
        service
            .request_reservation(&Principal::member(waiter), slot_id, date, true)
            .await
            .unwrap();

        let outcome = service
            .cancel_reservation(&holder, held.reservation().unwrap().id, None)
            .await
            .unwrap();
        assert_eq!(outcome.promoted(), Some(waiter));

        let attempted = notifier.wait_for(1).await;
        assert_eq!(attempted.len(), 1);
        assert_eq!(attempted[0].0, waiter);

        let snapshot = service.inspect(slot_id, date).await.unwrap();
        assert_eq!(snapshot.confirmed_count, 1);
        assert_eq!(snapshot.waitlist_count, 0);
        let promoted = service
            .list_reservations(&Principal::member(waiter))
            .await
            .unwrap();
        assert!(promoted.iter().any(Reservation::is_confirmed));
    }

    #[tokio::test]
    async fn confirmation_survives_a_notifier_outage() {
        let (service, _, notifier, slot_id) = service(BookingSettings::default()).await;
        notifier.set_failing(true);
        let requester = RequesterId::new();

        let outcome = service
            .request_reservation(
                &Principal::member(requester),
                slot_id,
                helpers::class_date(),
                false,
            )
            .await
            .unwrap();
        assert!(outcome.reservation().is_some());
        assert_eq!(notifier.wait_for(1).await.len(), 1);
        assert_eq!(
            service
                .inspect(slot_id, helpers::class_date())
                .await
                .unwrap()
                .confirmed_count,
            1
        );
    }

    #[tokio::test]
    async fn waitlist_notification_follows_settings() {
        let settings = BookingSettings {
            notify_on_confirmation: false,
            notify_on_waitlist: true,
        };
        let (service, _, notifier, slot_id) = service(settings).await;
        let date = helpers::class_date();

        service
            .request_reservation(&Principal::member(RequesterId::new()), slot_id, date, false)
            .await
            .unwrap();
        let waiter = RequesterId::new();
        service
            .request_reservation(&Principal::member(waiter), slot_id, date, true)
            .await
            .unwrap();

        let received = notifier.wait_for(1).await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, waiter);
        assert!(matches!(
            received[0].1,
            NotificationEvent::WaitlistJoined { position: 1, .. }
        ));
    }
}
