//! `PostgresBookingStore`: plain reads, schedule administration, and the
//! unit-of-work factory.

use crate::rows::{
    ENTRY_COLUMNS, RESERVATION_COLUMNS, SLOT_COLUMNS, capacity_from_row, count_from_db,
    entry_from_row, map_sqlx, reservation_from_row, slot_from_row, weekday_to_db,
};
use crate::unit::PostgresOccurrenceUnit;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use studio_booking_core::store::{BookingStore, ScheduleAdmin};
use studio_booking_core::{
    Occurrence, RequesterId, Reservation, ReservationId, Slot, SlotCapacity, SlotId, StoreError,
    WaitlistEntry, WaitlistEntryId,
};

/// `PostgreSQL` booking store.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with the given pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection cannot be
    /// established.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections,
            min_connections,
            "Connected to booking database"
        );
        Ok(Self::from_pool(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl BookingStore for PostgresBookingStore {
    type Unit = PostgresOccurrenceUnit;

    async fn find_slot(&self, slot_id: SlotId) -> Result<Option<Slot>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = $1"))
            .bind(slot_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to load slot", &e))?;

        row.as_ref().map(slot_from_row).transpose()
    }

    async fn list_slots(&self) -> Result<Vec<Slot>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SLOT_COLUMNS} FROM slots ORDER BY weekday, starts_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to list slots", &e))?;

        rows.iter().map(slot_from_row).collect()
    }

    async fn find_capacity(&self, slot_id: SlotId) -> Result<Option<SlotCapacity>, StoreError> {
        let row = sqlx::query(
            "SELECT slot_id, maximum, waitlist_allowed FROM slot_capacities WHERE slot_id = $1",
        )
        .bind(slot_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to load capacity", &e))?;

        row.as_ref().map(capacity_from_row).transpose()
    }

    async fn find_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to load reservation", &e))?;

        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn find_waitlist_entry(
        &self,
        entry_id: WaitlistEntryId,
    ) -> Result<Option<WaitlistEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries WHERE id = $1"
        ))
        .bind(entry_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to load waitlist entry", &e))?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn count_confirmed(&self, occurrence: Occurrence) -> Result<u32, StoreError> {
        let count: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM reservations
            WHERE slot_id = $1 AND class_date = $2 AND status = 'confirmed'
            ",
        )
        .bind(occurrence.slot_id.as_uuid())
        .bind(occurrence.date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to count reservations", &e))?;

        count_from_db(count.0)
    }

    async fn count_waiting(&self, occurrence: Occurrence) -> Result<u32, StoreError> {
        let count: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM waitlist_entries
            WHERE slot_id = $1 AND class_date = $2 AND status = 'waiting'
            ",
        )
        .bind(occurrence.slot_id.as_uuid())
        .bind(occurrence.date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to count waitlist", &e))?;

        count_from_db(count.0)
    }

    async fn waiting_entries_for(
        &self,
        requester_id: RequesterId,
    ) -> Result<Vec<WaitlistEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {ENTRY_COLUMNS} FROM waitlist_entries
            WHERE requester_id = $1 AND status = 'waiting'
            ORDER BY created_at, id
            "
        ))
        .bind(requester_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to list waitlist entries", &e))?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn waitlist_position(&self, entry_id: WaitlistEntryId) -> Result<Option<u32>, StoreError> {
        // Entries ahead of the target in its own queue, the target included.
        let count: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM waitlist_entries target
            JOIN waitlist_entries queued
              ON queued.slot_id = target.slot_id
             AND queued.class_date = target.class_date
            WHERE target.id = $1
              AND target.status = 'waiting'
              AND queued.status = 'waiting'
              AND (queued.created_at, queued.id) <= (target.created_at, target.id)
            ",
        )
        .bind(entry_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to rank waitlist entry", &e))?;

        let position = count_from_db(count.0)?;
        Ok((position > 0).then_some(position))
    }

    async fn reservations_for(
        &self,
        requester_id: RequesterId,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE requester_id = $1
            ORDER BY created_at DESC, id DESC
            "
        ))
        .bind(requester_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to list reservations", &e))?;

        rows.iter().map(reservation_from_row).collect()
    }

    async fn begin(&self, occurrence: Occurrence) -> Result<PostgresOccurrenceUnit, StoreError> {
        PostgresOccurrenceUnit::begin(&self.pool, occurrence).await
    }
}

impl ScheduleAdmin for PostgresBookingStore {
    async fn upsert_slot(&self, slot: &Slot) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO slots (id, venue_id, weekday, starts_at, ends_at, class_type, level, instructor, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                venue_id = EXCLUDED.venue_id,
                weekday = EXCLUDED.weekday,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                class_type = EXCLUDED.class_type,
                level = EXCLUDED.level,
                instructor = EXCLUDED.instructor,
                active = EXCLUDED.active
            ",
        )
        .bind(slot.id.as_uuid())
        .bind(slot.venue_id.as_uuid())
        .bind(weekday_to_db(slot.weekday))
        .bind(slot.starts_at)
        .bind(slot.ends_at)
        .bind(&slot.class_type)
        .bind(slot.level.as_deref())
        .bind(slot.instructor.as_deref())
        .bind(slot.active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx("Failed to upsert slot", &e))?;

        tracing::debug!(slot_id = %slot.id, "Slot upserted");
        Ok(())
    }

    async fn set_capacity(&self, capacity: SlotCapacity) -> Result<(), StoreError> {
        let maximum = i32::try_from(capacity.maximum).map_err(|_| {
            StoreError::Conflict(format!("Capacity {} out of range", capacity.maximum))
        })?;

        sqlx::query(
            r"
            INSERT INTO slot_capacities (slot_id, maximum, waitlist_allowed)
            VALUES ($1, $2, $3)
            ON CONFLICT (slot_id) DO UPDATE SET
                maximum = EXCLUDED.maximum,
                waitlist_allowed = EXCLUDED.waitlist_allowed
            ",
        )
        .bind(capacity.slot_id.as_uuid())
        .bind(maximum)
        .bind(capacity.waitlist_allowed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // Foreign key violation: the slot does not exist.
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_foreign_key_violation() {
                    return StoreError::Conflict(format!(
                        "capacity references unknown slot {}",
                        capacity.slot_id
                    ));
                }
            }
            map_sqlx("Failed to set capacity", &e)
        })?;

        tracing::debug!(
            slot_id = %capacity.slot_id,
            maximum = capacity.maximum,
            waitlist_allowed = capacity.waitlist_allowed,
            "Capacity set"
        );
        Ok(())
    }

    async fn set_slot_active(&self, slot_id: SlotId, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE slots SET active = $2 WHERE id = $1")
            .bind(slot_id.as_uuid())
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("Failed to update slot", &e))?;

        Ok(result.rows_affected() > 0)
    }
}
