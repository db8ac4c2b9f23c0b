//! In-memory booking store for fast, deterministic tests.
//!
//! Mirrors the unit-of-work semantics of the Postgres store:
//!
//! - one exclusive lock per occurrence, held for the lifetime of a unit and
//!   forgotten once no unit holds or awaits it
//! - writes are staged inside the unit and applied together on commit
//! - dropping a unit discards its staged writes
//! - the partial unique rules (one confirmed reservation and one waiting
//!   entry per requester and occurrence) are checked on insert
//!
//! Commits and begins can be made to fail on demand to exercise the
//! `StorageTransient` paths of the coordinator.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use studio_booking_core::store::{BookingStore, OccurrenceUnit, ScheduleAdmin};
use studio_booking_core::{
    Occurrence, RequesterId, Reservation, ReservationId, ReservationStatus, Slot, SlotCapacity,
    SlotId, StoreError, WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Tables {
    slots: HashMap<SlotId, Slot>,
    capacities: HashMap<SlotId, SlotCapacity>,
    reservations: HashMap<ReservationId, Reservation>,
    waitlist: HashMap<WaitlistEntryId, WaitlistEntry>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_begins: AtomicUsize,
    failing_commits: AtomicUsize,
}

impl Faults {
    /// Consume one pending failure from `counter`, if any.
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

type OccurrenceLocks = HashMap<Occurrence, Arc<AsyncMutex<()>>>;

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

/// In-memory [`BookingStore`] and [`ScheduleAdmin`].
///
/// Cloning is cheap and every clone shares the same tables.
///
/// # Example
///
/// ```
/// use studio_booking_testing::InMemoryBookingStore;
/// use studio_booking_core::store::{BookingStore, OccurrenceUnit, ScheduleAdmin};
/// use studio_booking_core::{NaiveDate, NaiveTime, Occurrence, Slot, SlotCapacity, VenueId, Weekday};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryBookingStore::new();
/// let slot = Slot::new(
///     VenueId::new(),
///     Weekday::Mon,
///     NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
///     NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
///     "reformer",
/// );
/// store.upsert_slot(&slot).await?;
/// store.set_capacity(SlotCapacity::new(slot.id, 2, true)).await?;
///
/// let occurrence = Occurrence::new(slot.id, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());
/// let mut unit = store.begin(occurrence).await?;
/// assert_eq!(unit.count_confirmed().await?, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBookingStore {
    tables: Arc<Mutex<Tables>>,
    locks: Arc<Mutex<OccurrenceLocks>>,
    faults: Arc<Faults>,
}

impl InMemoryBookingStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to [`BookingStore::begin`] fail with
    /// [`StoreError::Unavailable`].
    pub fn fail_next_begins(&self, n: usize) {
        self.faults.failing_begins.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` unit commits fail with [`StoreError::Unavailable`].
    ///
    /// A failed commit applies none of the unit's writes.
    pub fn fail_next_commits(&self, n: usize) {
        self.faults.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Every reservation of an occurrence in any status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the table lock is poisoned.
    pub fn reservations_of(&self, occurrence: Occurrence) -> Result<Vec<Reservation>, StoreError> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        let mut reservations: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| r.occurrence == occurrence)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| (r.created_at, r.id));
        Ok(reservations)
    }

    /// Every waitlist entry of an occurrence in any status, in queue order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the table lock is poisoned.
    pub fn waitlist_of(&self, occurrence: Occurrence) -> Result<Vec<WaitlistEntry>, StoreError> {
        let tables = self.tables.lock().map_err(|_| poisoned())?;
        let mut entries: Vec<WaitlistEntry> = tables
            .waitlist
            .values()
            .filter(|e| e.occurrence == occurrence)
            .cloned()
            .collect();
        entries.sort_by_key(WaitlistEntry::queue_key);
        Ok(entries)
    }

    fn occurrence_lock(&self, occurrence: Occurrence) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        Ok(Arc::clone(locks.entry(occurrence).or_default()))
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

fn waiting_rank(entries: &[WaitlistEntry], entry_id: WaitlistEntryId) -> Option<u32> {
    let mut waiting: Vec<&WaitlistEntry> = entries.iter().filter(|e| e.is_waiting()).collect();
    waiting.sort_by_key(|e| e.queue_key());
    waiting
        .iter()
        .position(|e| e.id == entry_id)
        .and_then(|index| u32::try_from(index + 1).ok())
}

fn count_u32(count: usize) -> Result<u32, StoreError> {
    u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("count {count} exceeds u32")))
}

impl BookingStore for InMemoryBookingStore {
    type Unit = InMemoryUnit;

    fn find_slot(
        &self,
        slot_id: SlotId,
    ) -> impl Future<Output = Result<Option<Slot>, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            Ok(tables
                .lock()
                .map_err(|_| poisoned())?
                .slots
                .get(&slot_id)
                .cloned())
        }
    }

    fn list_slots(&self) -> impl Future<Output = Result<Vec<Slot>, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            let mut slots: Vec<Slot> = tables
                .lock()
                .map_err(|_| poisoned())?
                .slots
                .values()
                .cloned()
                .collect();
            slots.sort_by_key(|s| (s.weekday.num_days_from_monday(), s.starts_at, s.id));
            Ok(slots)
        }
    }

    fn find_capacity(
        &self,
        slot_id: SlotId,
    ) -> impl Future<Output = Result<Option<SlotCapacity>, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            Ok(tables
                .lock()
                .map_err(|_| poisoned())?
                .capacities
                .get(&slot_id)
                .copied())
        }
    }

    fn find_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            Ok(tables
                .lock()
                .map_err(|_| poisoned())?
                .reservations
                .get(&reservation_id)
                .cloned())
        }
    }

    fn find_waitlist_entry(
        &self,
        entry_id: WaitlistEntryId,
    ) -> impl Future<Output = Result<Option<WaitlistEntry>, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            Ok(tables
                .lock()
                .map_err(|_| poisoned())?
                .waitlist
                .get(&entry_id)
                .cloned())
        }
    }

    fn count_confirmed(
        &self,
        occurrence: Occurrence,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            let count = tables
                .lock()
                .map_err(|_| poisoned())?
                .reservations
                .values()
                .filter(|r| r.occurrence == occurrence && r.is_confirmed())
                .count();
            count_u32(count)
        }
    }

    fn count_waiting(
        &self,
        occurrence: Occurrence,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            let count = tables
                .lock()
                .map_err(|_| poisoned())?
                .waitlist
                .values()
                .filter(|e| e.occurrence == occurrence && e.is_waiting())
                .count();
            count_u32(count)
        }
    }

    fn waiting_entries_for(
        &self,
        requester_id: RequesterId,
    ) -> impl Future<Output = Result<Vec<WaitlistEntry>, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            let mut entries: Vec<WaitlistEntry> = tables
                .lock()
                .map_err(|_| poisoned())?
                .waitlist
                .values()
                .filter(|e| e.requester_id == requester_id && e.is_waiting())
                .cloned()
                .collect();
            entries.sort_by_key(WaitlistEntry::queue_key);
            Ok(entries)
        }
    }

    fn waitlist_position(
        &self,
        entry_id: WaitlistEntryId,
    ) -> impl Future<Output = Result<Option<u32>, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            let tables = tables.lock().map_err(|_| poisoned())?;
            let Some(entry) = tables.waitlist.get(&entry_id) else {
                return Ok(None);
            };
            let siblings: Vec<WaitlistEntry> = tables
                .waitlist
                .values()
                .filter(|e| e.occurrence == entry.occurrence)
                .cloned()
                .collect();
            Ok(waiting_rank(&siblings, entry_id))
        }
    }

    fn reservations_for(
        &self,
        requester_id: RequesterId,
    ) -> impl Future<Output = Result<Vec<Reservation>, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            let mut reservations: Vec<Reservation> = tables
                .lock()
                .map_err(|_| poisoned())?
                .reservations
                .values()
                .filter(|r| r.requester_id == requester_id)
                .cloned()
                .collect();
            reservations.sort_by_key(|r| std::cmp::Reverse((r.created_at, r.id)));
            Ok(reservations)
        }
    }

    fn begin(
        &self,
        occurrence: Occurrence,
    ) -> impl Future<Output = Result<Self::Unit, StoreError>> + Send {
        let lock = self.occurrence_lock(occurrence);
        let tables = Arc::clone(&self.tables);
        let locks = Arc::clone(&self.locks);
        let faults = Arc::clone(&self.faults);

        async move {
            if Faults::take(&faults.failing_begins) {
                return Err(StoreError::Unavailable("injected begin failure".to_string()));
            }
            let guard = lock?.lock_owned().await;
            Ok(InMemoryUnit {
                occurrence,
                tables,
                locks,
                faults,
                staged_reservations: HashMap::new(),
                staged_waitlist: HashMap::new(),
                guard,
            })
        }
    }
}

impl ScheduleAdmin for InMemoryBookingStore {
    fn upsert_slot(&self, slot: &Slot) -> impl Future<Output = Result<(), StoreError>> + Send {
        let tables = Arc::clone(&self.tables);
        let slot = slot.clone();

        async move {
            tables
                .lock()
                .map_err(|_| poisoned())?
                .slots
                .insert(slot.id, slot);
            Ok(())
        }
    }

    fn set_capacity(
        &self,
        capacity: SlotCapacity,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            let mut tables = tables.lock().map_err(|_| poisoned())?;
            if !tables.slots.contains_key(&capacity.slot_id) {
                return Err(StoreError::Conflict(format!(
                    "capacity references unknown slot {}",
                    capacity.slot_id
                )));
            }
            tables.capacities.insert(capacity.slot_id, capacity);
            Ok(())
        }
    }

    fn set_slot_active(
        &self,
        slot_id: SlotId,
        active: bool,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        let tables = Arc::clone(&self.tables);

        async move {
            let mut tables = tables.lock().map_err(|_| poisoned())?;
            Ok(tables.slots.get_mut(&slot_id).is_some_and(|slot| {
                slot.active = active;
                true
            }))
        }
    }
}

/// Unit of work over one occurrence of an [`InMemoryBookingStore`].
///
/// Holds the occurrence lock until committed or dropped.
#[derive(Debug)]
pub struct InMemoryUnit {
    occurrence: Occurrence,
    tables: Arc<Mutex<Tables>>,
    locks: Arc<Mutex<OccurrenceLocks>>,
    faults: Arc<Faults>,
    staged_reservations: HashMap<ReservationId, Reservation>,
    staged_waitlist: HashMap<WaitlistEntryId, WaitlistEntry>,
    guard: OwnedMutexGuard<()>,
}

impl Drop for InMemoryUnit {
    fn drop(&mut self) {
        // The map and this guard are the only holders: nobody is waiting.
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        let mutex = OwnedMutexGuard::mutex(&self.guard);
        if Arc::strong_count(mutex) == 2
            && locks
                .get(&self.occurrence)
                .is_some_and(|tracked| Arc::ptr_eq(tracked, mutex))
        {
            locks.remove(&self.occurrence);
        }
    }
}

impl InMemoryUnit {
    /// Committed reservations of the occurrence overlaid with staged writes.
    fn reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let mut merged: HashMap<ReservationId, Reservation> = {
            let tables = self.tables.lock().map_err(|_| poisoned())?;
            tables
                .reservations
                .values()
                .filter(|r| r.occurrence == self.occurrence)
                .map(|r| (r.id, r.clone()))
                .collect()
        };
        merged.extend(
            self.staged_reservations
                .iter()
                .map(|(id, r)| (*id, r.clone())),
        );
        Ok(merged.into_values().collect())
    }

    /// Committed waitlist entries of the occurrence overlaid with staged writes.
    fn entries(&self) -> Result<Vec<WaitlistEntry>, StoreError> {
        let mut merged: HashMap<WaitlistEntryId, WaitlistEntry> = {
            let tables = self.tables.lock().map_err(|_| poisoned())?;
            tables
                .waitlist
                .values()
                .filter(|e| e.occurrence == self.occurrence)
                .map(|e| (e.id, e.clone()))
                .collect()
        };
        merged.extend(self.staged_waitlist.iter().map(|(id, e)| (*id, e.clone())));
        Ok(merged.into_values().collect())
    }

    fn stage_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        if reservation.occurrence != self.occurrence {
            return Err(StoreError::Conflict(format!(
                "reservation for {} written through unit on {}",
                reservation.occurrence, self.occurrence
            )));
        }
        let current = self.reservations()?;
        if current.iter().any(|r| r.id == reservation.id) {
            return Err(StoreError::Conflict(format!(
                "duplicate reservation id {}",
                reservation.id
            )));
        }
        if reservation.is_confirmed()
            && current
                .iter()
                .any(|r| r.requester_id == reservation.requester_id && r.is_confirmed())
        {
            return Err(StoreError::Conflict(format!(
                "requester {} already holds a confirmed reservation",
                reservation.requester_id
            )));
        }
        self.staged_reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    fn restage_reservation(
        &mut self,
        reservation_id: ReservationId,
        status: &ReservationStatus,
    ) -> Result<(), StoreError> {
        let mut reservation = self
            .reservations()?
            .into_iter()
            .find(|r| r.id == reservation_id)
            .ok_or_else(|| {
                StoreError::Conflict(format!(
                    "reservation {reservation_id} is not part of {}",
                    self.occurrence
                ))
            })?;
        reservation.status = status.clone();
        self.staged_reservations.insert(reservation_id, reservation);
        Ok(())
    }

    fn stage_entry(&mut self, entry: &WaitlistEntry) -> Result<(), StoreError> {
        if entry.occurrence != self.occurrence {
            return Err(StoreError::Conflict(format!(
                "waitlist entry for {} written through unit on {}",
                entry.occurrence, self.occurrence
            )));
        }
        let current = self.entries()?;
        if current.iter().any(|e| e.id == entry.id) {
            return Err(StoreError::Conflict(format!(
                "duplicate waitlist entry id {}",
                entry.id
            )));
        }
        if entry.is_waiting()
            && current
                .iter()
                .any(|e| e.requester_id == entry.requester_id && e.is_waiting())
        {
            return Err(StoreError::Conflict(format!(
                "requester {} is already waiting",
                entry.requester_id
            )));
        }
        self.staged_waitlist.insert(entry.id, entry.clone());
        Ok(())
    }

    fn restage_entry(
        &mut self,
        entry_id: WaitlistEntryId,
        status: &WaitlistStatus,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .entries()?
            .into_iter()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| {
                StoreError::Conflict(format!(
                    "waitlist entry {entry_id} is not part of {}",
                    self.occurrence
                ))
            })?;
        entry.status = status.clone();
        self.staged_waitlist.insert(entry_id, entry);
        Ok(())
    }

    fn apply(mut self) -> Result<(), StoreError> {
        if Faults::take(&self.faults.failing_commits) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }
        let mut tables = self.tables.lock().map_err(|_| poisoned())?;
        tables
            .reservations
            .extend(std::mem::take(&mut self.staged_reservations));
        tables
            .waitlist
            .extend(std::mem::take(&mut self.staged_waitlist));
        Ok(())
    }
}

impl OccurrenceUnit for InMemoryUnit {
    fn occurrence(&self) -> Occurrence {
        self.occurrence
    }

    fn capacity(
        &mut self,
    ) -> impl Future<Output = Result<Option<SlotCapacity>, StoreError>> + Send {
        let result = self
            .tables
            .lock()
            .map_err(|_| poisoned())
            .map(|tables| tables.capacities.get(&self.occurrence.slot_id).copied());
        async move { result }
    }

    fn count_confirmed(&mut self) -> impl Future<Output = Result<u32, StoreError>> + Send {
        let result = self
            .reservations()
            .and_then(|all| count_u32(all.iter().filter(|r| r.is_confirmed()).count()));
        async move { result }
    }

    fn count_waiting(&mut self) -> impl Future<Output = Result<u32, StoreError>> + Send {
        let result = self
            .entries()
            .and_then(|all| count_u32(all.iter().filter(|e| e.is_waiting()).count()));
        async move { result }
    }

    fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> impl Future<Output = Result<Option<Reservation>, StoreError>> + Send {
        let result = self
            .reservations()
            .map(|all| all.into_iter().find(|r| r.id == reservation_id));
        async move { result }
    }

    fn confirmed_for(
        &mut self,
        requester_id: RequesterId,
    ) -> impl Future<Output = Result<Option<Reservation>, StoreError>> + Send {
        let result = self.reservations().map(|all| {
            all.into_iter()
                .find(|r| r.requester_id == requester_id && r.is_confirmed())
        });
        async move { result }
    }

    fn waiting_for(
        &mut self,
        requester_id: RequesterId,
    ) -> impl Future<Output = Result<Option<WaitlistEntry>, StoreError>> + Send {
        let result = self.entries().map(|all| {
            all.into_iter()
                .find(|e| e.requester_id == requester_id && e.is_waiting())
        });
        async move { result }
    }

    fn waitlist_entry(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> impl Future<Output = Result<Option<WaitlistEntry>, StoreError>> + Send {
        let result = self
            .entries()
            .map(|all| all.into_iter().find(|e| e.id == entry_id));
        async move { result }
    }

    fn insert_reservation(
        &mut self,
        reservation: &Reservation,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.stage_reservation(reservation);
        async move { result }
    }

    fn update_reservation_status(
        &mut self,
        reservation_id: ReservationId,
        status: &ReservationStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.restage_reservation(reservation_id, status);
        async move { result }
    }

    fn insert_waitlist_entry(
        &mut self,
        entry: &WaitlistEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.stage_entry(entry);
        async move { result }
    }

    fn update_waitlist_status(
        &mut self,
        entry_id: WaitlistEntryId,
        status: &WaitlistStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.restage_entry(entry_id, status);
        async move { result }
    }

    fn oldest_waiting(
        &mut self,
    ) -> impl Future<Output = Result<Option<WaitlistEntry>, StoreError>> + Send {
        let result = self.entries().map(|all| {
            all.into_iter()
                .filter(WaitlistEntry::is_waiting)
                .min_by_key(WaitlistEntry::queue_key)
        });
        async move { result }
    }

    fn waitlist_position(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> impl Future<Output = Result<Option<u32>, StoreError>> + Send {
        let result = self.entries().map(|all| waiting_rank(&all, entry_id));
        async move { result }
    }

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.apply();
        async move { result }
    }
}
