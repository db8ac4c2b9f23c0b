//! Schedule Registry read path.
//!
//! The schedule is maintained by an administrative collaborator; the engine
//! only needs to know whether a slot exists and is active.

use chrono::Weekday;
use studio_booking_core::error::Result;
use studio_booking_core::store::BookingStore;
use studio_booking_core::{BookingError, Slot, SlotId};

/// Read-only view over the recurring class slots.
#[derive(Debug, Clone)]
pub struct ScheduleRegistry<S> {
    store: S,
}

impl<S: BookingStore> ScheduleRegistry<S> {
    /// Create a registry over `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Load a slot that can currently be reserved.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] if the slot does not exist or is inactive
    /// - [`BookingError::StorageTransient`] if the store cannot be read
    pub async fn bookable(&self, slot_id: SlotId) -> Result<Slot> {
        match self.store.find_slot(slot_id).await? {
            Some(slot) if slot.active => Ok(slot),
            Some(_) => {
                tracing::debug!(slot_id = %slot_id, "Slot is inactive");
                Err(BookingError::NotFound)
            }
            None => Err(BookingError::NotFound),
        }
    }

    /// Active slots, ordered by weekday then start time.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StorageTransient`] if the store cannot be read.
    pub async fn list_active(&self) -> Result<Vec<Slot>> {
        let mut slots: Vec<Slot> = self
            .store
            .list_slots()
            .await?
            .into_iter()
            .filter(|slot| slot.active)
            .collect();
        slots.sort_by_key(|slot| (slot.weekday.num_days_from_monday(), slot.starts_at));
        Ok(slots)
    }

    /// Active slots recurring on `weekday`, ordered by start time.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::StorageTransient`] if the store cannot be read.
    pub async fn list_for_weekday(&self, weekday: Weekday) -> Result<Vec<Slot>> {
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|slot| slot.weekday == weekday)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use studio_booking_core::VenueId;
    use studio_booking_core::store::ScheduleAdmin;
    use studio_booking_testing::InMemoryBookingStore;

    fn slot(weekday: Weekday, hour: u32) -> Slot {
        Slot::new(
            VenueId::new(),
            weekday,
            NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
            "mat",
        )
    }

    #[tokio::test]
    async fn inactive_and_missing_slots_are_not_bookable() {
        let store = InMemoryBookingStore::new();
        let registry = ScheduleRegistry::new(store.clone());
        let inactive = slot(Weekday::Tue, 9).inactive();
        store.upsert_slot(&inactive).await.unwrap();

        assert_eq!(
            registry.bookable(inactive.id).await,
            Err(BookingError::NotFound)
        );
        assert_eq!(
            registry.bookable(SlotId::new()).await,
            Err(BookingError::NotFound)
        );
    }

    #[tokio::test]
    async fn active_slots_are_listed_in_schedule_order() {
        let store = InMemoryBookingStore::new();
        let registry = ScheduleRegistry::new(store.clone());
        let wed_evening = slot(Weekday::Wed, 18);
        let mon_morning = slot(Weekday::Mon, 7);
        let mon_evening = slot(Weekday::Mon, 19);
        let hidden = slot(Weekday::Mon, 12).inactive();
        for s in [&wed_evening, &mon_evening, &hidden, &mon_morning] {
            store.upsert_slot(s).await.unwrap();
        }

        let ids: Vec<SlotId> = registry
            .list_active()
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![mon_morning.id, mon_evening.id, wed_evening.id]);

        let monday = registry.list_for_weekday(Weekday::Mon).await.unwrap();
        assert_eq!(monday.len(), 2);
        assert_eq!(registry.bookable(mon_evening.id).await.unwrap(), mon_evening);
    }
}
