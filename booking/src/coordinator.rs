//! Reservation Coordinator.
//!
//! Validates requests, consults the [`CapacityTracker`], and writes to the
//! reservation ledger or the waitlist queue. Every write path runs inside a
//! single [`OccurrenceUnit`]:
//!
//! - **request**: duplicate check, capacity check and insert commit together,
//!   so concurrent requests for the last spot cannot both succeed.
//! - **cancel**: the cancellation and the promotion of the oldest waiting
//!   entry commit together or not at all.
//! - **withdraw**: re-reads the entry under the unit before changing it.
//!
//! The coordinator is stateless between calls; the store is the only shared
//! mutable resource. It never talks to the notification collaborator, see
//! [`BookingService`](crate::service::BookingService) for that.

use crate::capacity::{CapacitySnapshot, CapacityTracker};
use crate::registry::ScheduleRegistry;
use chrono::NaiveDate;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use studio_booking_core::environment::Clock;
use studio_booking_core::error::Result;
use studio_booking_core::store::{BookingStore, OccurrenceUnit};
use studio_booking_core::{
    BookingError, Occurrence, Principal, RequesterId, Reservation, ReservationId,
    ReservationOrigin, ReservationStatus, SlotId, StoreError, WaitlistEntry, WaitlistEntryId,
    WaitlistStatus,
};

/// Result of [`Coordinator::request_reservation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// A spot was free and is now held.
    Confirmed {
        /// The new reservation
        reservation: Reservation,
    },

    /// No spot was free and nothing was written.
    ///
    /// A decision point for the caller, not an error.
    Full {
        /// The slot's waitlist flag
        can_join_waitlist: bool,
    },

    /// No spot was free; the requester joined the waitlist.
    Waitlisted {
        /// The new entry
        entry: WaitlistEntry,
        /// 1-based FIFO rank at the time of joining
        position: u32,
    },
}

impl RequestOutcome {
    /// The confirmed reservation, if any.
    #[must_use]
    pub const fn reservation(&self) -> Option<&Reservation> {
        match self {
            Self::Confirmed { reservation } => Some(reservation),
            _ => None,
        }
    }

    /// The waitlist position, if the request was waitlisted.
    #[must_use]
    pub const fn position(&self) -> Option<u32> {
        match self {
            Self::Waitlisted { position, .. } => Some(*position),
            _ => None,
        }
    }
}

/// A waitlist entry converted into a confirmed reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    /// The promoted entry
    pub entry_id: WaitlistEntryId,
    /// Who was promoted
    pub requester_id: RequesterId,
    /// The reservation created for them
    pub reservation: Reservation,
}

/// Result of [`Coordinator::cancel_reservation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    /// The reservation in its cancelled state
    pub cancelled: Reservation,
    /// The promotion committed together with the cancellation
    pub promotion: Option<Promotion>,
}

impl CancelOutcome {
    /// The promoted requester, if the cancellation freed a spot for one.
    #[must_use]
    pub fn promoted(&self) -> Option<RequesterId> {
        self.promotion.as_ref().map(|p| p.requester_id)
    }
}

/// A waiting entry with its FIFO rank, computed when it was read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitlistPosition {
    /// The waiting entry
    pub entry: WaitlistEntry,
    /// 1-based rank among waiting entries of the same occurrence
    pub position: u32,
}

/// Lazy sequence produced by [`Coordinator::list_waitlist`].
pub type WaitlistStream<'a> = Pin<Box<dyn Stream<Item = Result<WaitlistPosition>> + Send + 'a>>;

/// The reservation coordinator.
///
/// Generic over the store and the clock so tests can run it against the
/// in-memory store with deterministic time.
#[derive(Debug, Clone)]
pub struct Coordinator<S, C> {
    store: S,
    clock: C,
    registry: ScheduleRegistry<S>,
    tracker: CapacityTracker<S>,
}

impl<S, C> Coordinator<S, C>
where
    S: BookingStore + Clone,
    C: Clock,
{
    /// Create a coordinator over `store`.
    #[must_use]
    pub fn new(store: S, clock: C) -> Self {
        Self {
            registry: ScheduleRegistry::new(store.clone()),
            tracker: CapacityTracker::new(store.clone()),
            store,
            clock,
        }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The schedule registry read path.
    #[must_use]
    pub const fn registry(&self) -> &ScheduleRegistry<S> {
        &self.registry
    }

    /// Request a spot for the principal on `slot_id` at `date`.
    ///
    /// Validation runs in order: slot bookable, no confirmed reservation
    /// already held, then the capacity decision. If the occurrence is full and
    /// the caller opted in (and the slot allows it), a waiting entry is
    /// created instead.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the slot is missing, inactive, has no
    ///   capacity record, or does not recur on `date`
    /// - [`BookingError::DuplicateReservation`] if the principal already
    ///   holds a confirmed reservation for the occurrence
    /// - [`BookingError::DuplicateWaitlistEntry`] if the principal is already
    ///   waiting for the occurrence
    /// - [`BookingError::StorageTransient`] if the unit could not run or commit
    #[tracing::instrument(
        skip_all,
        fields(requester_id = %principal.requester_id, slot_id = %slot_id, date = %date)
    )]
    pub async fn request_reservation(
        &self,
        principal: &Principal,
        slot_id: SlotId,
        date: NaiveDate,
        join_waitlist_if_full: bool,
    ) -> Result<RequestOutcome> {
        let slot = self.registry.bookable(slot_id).await?;
        if !slot.occurs_on(date) {
            tracing::debug!(weekday = ?slot.weekday, "Slot does not recur on requested date");
            return Err(BookingError::NotFound);
        }

        let requester_id = principal.requester_id;
        let occurrence = Occurrence::new(slot_id, date);
        let mut unit = self.store.begin(occurrence).await?;

        if unit.confirmed_for(requester_id).await?.is_some() {
            return Err(BookingError::DuplicateReservation);
        }

        let snapshot = self.tracker.inspect_within(&mut unit).await?;

        if !snapshot.is_full {
            let reservation = Reservation::confirmed(
                requester_id,
                occurrence,
                ReservationOrigin::Direct,
                self.clock.now(),
            );
            unit.insert_reservation(&reservation).await?;

            // A confirmed seat supersedes the requester's own waiting entry.
            if let Some(entry) = unit.waiting_for(requester_id).await? {
                unit.update_waitlist_status(
                    entry.id,
                    &WaitlistStatus::Withdrawn {
                        withdrawn_at: reservation.created_at,
                    },
                )
                .await?;
                tracing::info!(entry_id = %entry.id, "Waiting entry superseded by direct confirmation");
            }

            unit.commit().await?;
            tracing::info!(
                reservation_id = %reservation.id,
                available_spots = snapshot.available_spots - 1,
                "Reservation confirmed"
            );
            return Ok(RequestOutcome::Confirmed { reservation });
        }

        if !join_waitlist_if_full || !snapshot.waitlist_allowed {
            tracing::info!(
                maximum = snapshot.maximum,
                waitlist_allowed = snapshot.waitlist_allowed,
                "Occurrence full"
            );
            return Ok(RequestOutcome::Full {
                can_join_waitlist: snapshot.waitlist_allowed,
            });
        }

        if unit.waiting_for(requester_id).await?.is_some() {
            return Err(BookingError::DuplicateWaitlistEntry);
        }

        let entry = WaitlistEntry::waiting(requester_id, occurrence, self.clock.now());
        unit.insert_waitlist_entry(&entry).await?;
        let position = unit.waitlist_position(entry.id).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("new waitlist entry {} has no position", entry.id))
        })?;
        unit.commit().await?;

        tracing::info!(entry_id = %entry.id, position, "Joined waitlist");
        Ok(RequestOutcome::Waitlisted { entry, position })
    }

    /// Cancel a confirmed reservation and promote the oldest waiting entry
    /// into the freed spot.
    ///
    /// The cancellation and the promotion commit as one unit. A promotion
    /// only happens while the occurrence is below its ceiling after the
    /// cancellation.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the reservation does not exist
    /// - [`BookingError::Forbidden`] if the principal is neither the owner
    ///   nor elevated
    /// - [`BookingError::AlreadyCancelled`] if the reservation was already
    ///   cancelled; nothing is written and no promotion runs
    /// - [`BookingError::StorageTransient`] if the unit could not run or commit
    #[tracing::instrument(
        skip_all,
        fields(requester_id = %principal.requester_id, reservation_id = %reservation_id)
    )]
    pub async fn cancel_reservation(
        &self,
        principal: &Principal,
        reservation_id: ReservationId,
        reason: Option<String>,
    ) -> Result<CancelOutcome> {
        let existing = self
            .store
            .find_reservation(reservation_id)
            .await?
            .ok_or(BookingError::NotFound)?;

        if !principal.may_act_for(existing.requester_id) {
            tracing::warn!(owner = %existing.requester_id, "Cancellation refused");
            return Err(BookingError::Forbidden);
        }

        let occurrence = existing.occurrence;
        let mut unit = self.store.begin(occurrence).await?;

        let reservation = unit
            .reservation(reservation_id)
            .await?
            .ok_or(BookingError::NotFound)?;
        if reservation.status.is_cancelled() {
            return Err(BookingError::AlreadyCancelled);
        }

        let now = self.clock.now();
        let status = ReservationStatus::Cancelled {
            reason,
            cancelled_at: now,
        };
        unit.update_reservation_status(reservation_id, &status).await?;

        let promotion = Self::promote_oldest(&mut unit, occurrence, now).await?;

        unit.commit().await?;

        match &promotion {
            Some(p) => tracing::info!(
                promoted_requester_id = %p.requester_id,
                entry_id = %p.entry_id,
                promoted_reservation_id = %p.reservation.id,
                "Reservation cancelled, waitlist entry promoted"
            ),
            None => tracing::info!("Reservation cancelled"),
        }

        Ok(CancelOutcome {
            cancelled: Reservation {
                status,
                ..reservation
            },
            promotion,
        })
    }

    /// Promote the head of the queue if the occurrence has a free spot.
    async fn promote_oldest(
        unit: &mut S::Unit,
        occurrence: Occurrence,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Promotion>> {
        let Some(capacity) = unit.capacity().await? else {
            return Ok(None);
        };
        if unit.count_confirmed().await? >= capacity.maximum {
            return Ok(None);
        }
        let Some(entry) = unit.oldest_waiting().await? else {
            return Ok(None);
        };

        let reservation = Reservation::confirmed(
            entry.requester_id,
            occurrence,
            ReservationOrigin::PromotedFromWaitlist,
            now,
        );
        unit.insert_reservation(&reservation).await?;
        unit.update_waitlist_status(
            entry.id,
            &WaitlistStatus::Promoted {
                reservation_id: reservation.id,
                promoted_at: now,
            },
        )
        .await?;

        Ok(Some(Promotion {
            entry_id: entry.id,
            requester_id: entry.requester_id,
            reservation,
        }))
    }

    /// The principal's waiting entries with their current positions.
    ///
    /// The returned stream is lazy and finite; every call starts a fresh
    /// sequence. Positions are computed while the stream is polled, and an
    /// entry that stops waiting before its turn is skipped.
    pub fn list_waitlist(&self, principal: &Principal) -> WaitlistStream<'_> {
        let requester_id = principal.requester_id;
        let store = &self.store;

        Box::pin(async_stream::stream! {
            let entries = match store.waiting_entries_for(requester_id).await {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(BookingError::from(e));
                    return;
                }
            };

            for entry in entries {
                match store.waitlist_position(entry.id).await {
                    Ok(Some(position)) => yield Ok(WaitlistPosition { entry, position }),
                    Ok(None) => {
                        tracing::debug!(entry_id = %entry.id, "Entry left the queue while listing");
                    }
                    Err(e) => {
                        yield Err(BookingError::from(e));
                        return;
                    }
                }
            }
        })
    }

    /// Withdraw one of the principal's waiting entries.
    ///
    /// Never promotes anyone; promotion follows cancellations only.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] unless the entry exists, belongs to the
    ///   principal, and is still waiting
    /// - [`BookingError::StorageTransient`] if the unit could not run or commit
    #[tracing::instrument(
        skip_all,
        fields(requester_id = %principal.requester_id, entry_id = %entry_id)
    )]
    pub async fn withdraw_from_waitlist(
        &self,
        principal: &Principal,
        entry_id: WaitlistEntryId,
    ) -> Result<WaitlistEntry> {
        let existing = self
            .store
            .find_waitlist_entry(entry_id)
            .await?
            .filter(|entry| entry.requester_id == principal.requester_id)
            .ok_or(BookingError::NotFound)?;

        let mut unit = self.store.begin(existing.occurrence).await?;
        let entry = unit
            .waitlist_entry(entry_id)
            .await?
            .filter(WaitlistEntry::is_waiting)
            .ok_or(BookingError::NotFound)?;

        let status = WaitlistStatus::Withdrawn {
            withdrawn_at: self.clock.now(),
        };
        unit.update_waitlist_status(entry_id, &status).await?;
        unit.commit().await?;

        tracing::info!("Withdrawn from waitlist");
        Ok(WaitlistEntry { status, ..entry })
    }

    /// Capacity snapshot of an occurrence (plain reads).
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the slot has no capacity record
    /// - [`BookingError::StorageTransient`] if the store cannot be read
    pub async fn inspect(&self, slot_id: SlotId, date: NaiveDate) -> Result<CapacitySnapshot> {
        self.tracker.inspect(Occurrence::new(slot_id, date)).await
    }

    /// The principal's reservations in any status, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StorageTransient`] if the store cannot be read.
    pub async fn list_reservations(&self, principal: &Principal) -> Result<Vec<Reservation>> {
        Ok(self.store.reservations_for(principal.requester_id).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use studio_booking_core::SlotCapacity;
    use studio_booking_core::store::ScheduleAdmin;
    use studio_booking_testing::{AdvancingClock, InMemoryBookingStore, helpers};

    async fn setup(
        maximum: u32,
        waitlist_allowed: bool,
    ) -> (Coordinator<InMemoryBookingStore, AdvancingClock>, SlotId, NaiveDate) {
        let store = InMemoryBookingStore::new();
        let slot = helpers::seed_slot(&store, maximum, waitlist_allowed)
            .await
            .unwrap();
        (
            Coordinator::new(store, AdvancingClock::default()),
            slot.id,
            helpers::class_date(),
        )
    }

    #[tokio::test]
    async fn wrong_weekday_is_not_found() {
        let (coordinator, slot_id, date) = setup(2, true).await;
        let tuesday = date.succ_opt().unwrap();
        let result = coordinator
            .request_reservation(&Principal::member(RequesterId::new()), slot_id, tuesday, false)
            .await;
        assert_eq!(result, Err(BookingError::NotFound));
    }

    #[tokio::test]
    async fn full_without_opt_in_writes_nothing() {
        let (coordinator, slot_id, date) = setup(1, true).await;
        coordinator
            .request_reservation(&Principal::member(RequesterId::new()), slot_id, date, false)
            .await
            .unwrap();

        let outcome = coordinator
            .request_reservation(&Principal::member(RequesterId::new()), slot_id, date, false)
            .await
            .unwrap();
        assert_eq!(outcome, RequestOutcome::Full { can_join_waitlist: true });

        let snapshot = coordinator.inspect(slot_id, date).await.unwrap();
        assert_eq!(snapshot.confirmed_count, 1);
        assert_eq!(snapshot.waitlist_count, 0);
    }

    #[tokio::test]
    async fn direct_confirmation_withdraws_own_waiting_entry() {
        let (coordinator, slot_id, date) = setup(1, true).await;
        let holder = Principal::member(RequesterId::new());
        let waiter = Principal::member(RequesterId::new());

        let held = coordinator
            .request_reservation(&holder, slot_id, date, false)
            .await
            .unwrap();
        coordinator
            .request_reservation(&waiter, slot_id, date, true)
            .await
            .unwrap();

        // The administrator raises capacity; the waiter asks again directly.
        coordinator
            .store()
            .set_capacity(SlotCapacity::new(slot_id, 2, true))
            .await
            .unwrap();
        let outcome = coordinator
            .request_reservation(&waiter, slot_id, date, true)
            .await
            .unwrap();
        assert!(outcome.reservation().is_some());

        let waiting: Vec<WaitlistPosition> =
            coordinator.list_waitlist(&waiter).try_collect().await.unwrap();
        assert!(waiting.is_empty());

        // Cancelling the holder's seat promotes nobody: the queue is empty.
        let cancel = coordinator
            .cancel_reservation(&holder, held.reservation().unwrap().id, None)
            .await
            .unwrap();
        assert_eq!(cancel.promoted(), None);
    }

    #[tokio::test]
    async fn no_promotion_while_over_capacity() {
        let (coordinator, slot_id, date) = setup(2, true).await;
        let first = Principal::member(RequesterId::new());
        let second = Principal::member(RequesterId::new());
        let waiter = Principal::member(RequesterId::new());

        let held = coordinator
            .request_reservation(&first, slot_id, date, false)
            .await
            .unwrap();
        coordinator
            .request_reservation(&second, slot_id, date, false)
            .await
            .unwrap();
        coordinator
            .request_reservation(&waiter, slot_id, date, true)
            .await
            .unwrap();

        coordinator
            .store()
            .set_capacity(SlotCapacity::new(slot_id, 1, true))
            .await
            .unwrap();

        let cancel = coordinator
            .cancel_reservation(&first, held.reservation().unwrap().id, None)
            .await
            .unwrap();
        assert_eq!(cancel.promoted(), None);
        assert_eq!(coordinator.inspect(slot_id, date).await.unwrap().waitlist_count, 1);
    }

    #[tokio::test]
    async fn withdraw_requires_ownership() {
        let (coordinator, slot_id, date) = setup(0, true).await;
        let owner = Principal::member(RequesterId::new());
        let outcome = coordinator
            .request_reservation(&owner, slot_id, date, true)
            .await
            .unwrap();
        let RequestOutcome::Waitlisted { entry, position } = outcome else {
            panic!("expected waitlisted, got {outcome:?}");
        };
        assert_eq!(position, 1);

        let staff = Principal::elevated(RequesterId::new());
        assert_eq!(
            coordinator.withdraw_from_waitlist(&staff, entry.id).await,
            Err(BookingError::NotFound)
        );

        let withdrawn = coordinator
            .withdraw_from_waitlist(&owner, entry.id)
            .await
            .unwrap();
        assert!(matches!(withdrawn.status, WaitlistStatus::Withdrawn { .. }));

        // A second withdrawal finds nothing waiting.
        assert_eq!(
            coordinator.withdraw_from_waitlist(&owner, entry.id).await,
            Err(BookingError::NotFound)
        );
    }

    #[tokio::test]
    async fn cancel_unknown_reservation_is_not_found() {
        let (coordinator, _, _) = setup(1, false).await;
        let result = coordinator
            .cancel_reservation(
                &Principal::elevated(RequesterId::new()),
                ReservationId::new(),
                None,
            )
            .await;
        assert_eq!(result, Err(BookingError::NotFound));
    }
}
