//! Transactional unit of work over one occurrence.

use crate::rows::{
    ENTRY_COLUMNS, RESERVATION_COLUMNS, cancellation_columns, capacity_from_row, count_from_db,
    entry_from_row, map_sqlx, reservation_from_row, transition_columns,
};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use studio_booking_core::store::OccurrenceUnit;
use studio_booking_core::{
    Occurrence, RequesterId, Reservation, ReservationId, ReservationStatus, SlotCapacity,
    StoreError, WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};

/// One database transaction holding the occurrence's advisory lock.
///
/// The lock is transaction-scoped: it is released on commit, on rollback,
/// and when the unit is dropped (sqlx rolls the transaction back).
pub struct PostgresOccurrenceUnit {
    occurrence: Occurrence,
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresOccurrenceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresOccurrenceUnit")
            .field("occurrence", &self.occurrence)
            .finish_non_exhaustive()
    }
}

impl PostgresOccurrenceUnit {
    pub(crate) async fn begin(pool: &PgPool, occurrence: Occurrence) -> Result<Self, StoreError> {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to begin unit: {e}")))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(lock_key(occurrence))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx("Failed to lock occurrence", &e))?;

        tracing::trace!(occurrence = %occurrence, "Unit opened");
        Ok(Self { occurrence, tx })
    }

    async fn fetch_reservation(
        &mut self,
        filter: &str,
        bind: uuid::Uuid,
    ) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {RESERVATION_COLUMNS} FROM reservations
            WHERE slot_id = $1 AND class_date = $2 AND {filter}
            "
        ))
        .bind(self.occurrence.slot_id.as_uuid())
        .bind(self.occurrence.date)
        .bind(bind)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to load reservation", &e))?;

        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn fetch_entry(
        &mut self,
        filter: &str,
        bind: uuid::Uuid,
    ) -> Result<Option<WaitlistEntry>, StoreError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {ENTRY_COLUMNS} FROM waitlist_entries
            WHERE slot_id = $1 AND class_date = $2 AND {filter}
            "
        ))
        .bind(self.occurrence.slot_id.as_uuid())
        .bind(self.occurrence.date)
        .bind(bind)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to load waitlist entry", &e))?;

        row.as_ref().map(entry_from_row).transpose()
    }
}

/// Advisory lock key text for an occurrence.
fn lock_key(occurrence: Occurrence) -> String {
    format!("booking:{}:{}", occurrence.slot_id, occurrence.date)
}

impl OccurrenceUnit for PostgresOccurrenceUnit {
    fn occurrence(&self) -> Occurrence {
        self.occurrence
    }

    async fn capacity(&mut self) -> Result<Option<SlotCapacity>, StoreError> {
        let row = sqlx::query(
            "SELECT slot_id, maximum, waitlist_allowed FROM slot_capacities WHERE slot_id = $1",
        )
        .bind(self.occurrence.slot_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to load capacity", &e))?;

        row.as_ref().map(capacity_from_row).transpose()
    }

    async fn count_confirmed(&mut self) -> Result<u32, StoreError> {
        let count: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM reservations
            WHERE slot_id = $1 AND class_date = $2 AND status = 'confirmed'
            ",
        )
        .bind(self.occurrence.slot_id.as_uuid())
        .bind(self.occurrence.date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to count reservations", &e))?;

        count_from_db(count.0)
    }

    async fn count_waiting(&mut self) -> Result<u32, StoreError> {
        let count: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM waitlist_entries
            WHERE slot_id = $1 AND class_date = $2 AND status = 'waiting'
            ",
        )
        .bind(self.occurrence.slot_id.as_uuid())
        .bind(self.occurrence.date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to count waitlist", &e))?;

        count_from_db(count.0)
    }

    async fn reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        self.fetch_reservation("id = $3", *reservation_id.as_uuid())
            .await
    }

    async fn confirmed_for(
        &mut self,
        requester_id: RequesterId,
    ) -> Result<Option<Reservation>, StoreError> {
        self.fetch_reservation(
            "requester_id = $3 AND status = 'confirmed'",
            *requester_id.as_uuid(),
        )
        .await
    }

    async fn waiting_for(
        &mut self,
        requester_id: RequesterId,
    ) -> Result<Option<WaitlistEntry>, StoreError> {
        self.fetch_entry(
            "requester_id = $3 AND status = 'waiting'",
            *requester_id.as_uuid(),
        )
        .await
    }

    async fn waitlist_entry(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> Result<Option<WaitlistEntry>, StoreError> {
        self.fetch_entry("id = $3", *entry_id.as_uuid()).await
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        if reservation.occurrence != self.occurrence {
            return Err(StoreError::Conflict(format!(
                "reservation for {} written through unit on {}",
                reservation.occurrence, self.occurrence
            )));
        }
        let (cancel_reason, cancelled_at) = cancellation_columns(&reservation.status);

        sqlx::query(
            r"
            INSERT INTO reservations (
                id, requester_id, slot_id, class_date, status, origin,
                cancel_reason, cancelled_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.requester_id.as_uuid())
        .bind(reservation.occurrence.slot_id.as_uuid())
        .bind(reservation.occurrence.date)
        .bind(reservation.status.as_str())
        .bind(reservation.origin.as_str())
        .bind(cancel_reason)
        .bind(cancelled_at)
        .bind(reservation.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to insert reservation", &e))?;

        Ok(())
    }

    async fn update_reservation_status(
        &mut self,
        reservation_id: ReservationId,
        status: &ReservationStatus,
    ) -> Result<(), StoreError> {
        let (cancel_reason, cancelled_at) = cancellation_columns(status);

        let result = sqlx::query(
            r"
            UPDATE reservations
            SET status = $4, cancel_reason = $5, cancelled_at = $6
            WHERE id = $1 AND slot_id = $2 AND class_date = $3
            ",
        )
        .bind(reservation_id.as_uuid())
        .bind(self.occurrence.slot_id.as_uuid())
        .bind(self.occurrence.date)
        .bind(status.as_str())
        .bind(cancel_reason)
        .bind(cancelled_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to update reservation", &e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "reservation {reservation_id} is not part of {}",
                self.occurrence
            )));
        }
        Ok(())
    }

    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> Result<(), StoreError> {
        if entry.occurrence != self.occurrence {
            return Err(StoreError::Conflict(format!(
                "waitlist entry for {} written through unit on {}",
                entry.occurrence, self.occurrence
            )));
        }
        let (promoted, changed_at) = transition_columns(&entry.status);

        sqlx::query(
            r"
            INSERT INTO waitlist_entries (
                id, requester_id, slot_id, class_date, status,
                promoted_reservation_id, status_changed_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.requester_id.as_uuid())
        .bind(entry.occurrence.slot_id.as_uuid())
        .bind(entry.occurrence.date)
        .bind(entry.status.as_str())
        .bind(promoted)
        .bind(changed_at)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to insert waitlist entry", &e))?;

        Ok(())
    }

    async fn update_waitlist_status(
        &mut self,
        entry_id: WaitlistEntryId,
        status: &WaitlistStatus,
    ) -> Result<(), StoreError> {
        let (promoted, changed_at) = transition_columns(status);

        let result = sqlx::query(
            r"
            UPDATE waitlist_entries
            SET status = $4, promoted_reservation_id = $5, status_changed_at = $6
            WHERE id = $1 AND slot_id = $2 AND class_date = $3
            ",
        )
        .bind(entry_id.as_uuid())
        .bind(self.occurrence.slot_id.as_uuid())
        .bind(self.occurrence.date)
        .bind(status.as_str())
        .bind(promoted)
        .bind(changed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to update waitlist entry", &e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "waitlist entry {entry_id} is not part of {}",
                self.occurrence
            )));
        }
        Ok(())
    }

    async fn oldest_waiting(&mut self) -> Result<Option<WaitlistEntry>, StoreError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {ENTRY_COLUMNS} FROM waitlist_entries
            WHERE slot_id = $1 AND class_date = $2 AND status = 'waiting'
            ORDER BY created_at, id
            LIMIT 1
            "
        ))
        .bind(self.occurrence.slot_id.as_uuid())
        .bind(self.occurrence.date)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to load waitlist head", &e))?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn waitlist_position(
        &mut self,
        entry_id: WaitlistEntryId,
    ) -> Result<Option<u32>, StoreError> {
        let count: (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM waitlist_entries target
            JOIN waitlist_entries queued
              ON queued.slot_id = target.slot_id
             AND queued.class_date = target.class_date
            WHERE target.id = $1
              AND target.slot_id = $2
              AND target.class_date = $3
              AND target.status = 'waiting'
              AND queued.status = 'waiting'
              AND (queued.created_at, queued.id) <= (target.created_at, target.id)
            ",
        )
        .bind(entry_id.as_uuid())
        .bind(self.occurrence.slot_id.as_uuid())
        .bind(self.occurrence.date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx("Failed to rank waitlist entry", &e))?;

        let position = count_from_db(count.0)?;
        Ok((position > 0).then_some(position))
    }

    async fn commit(self) -> Result<(), StoreError> {
        let occurrence = self.occurrence;
        self.tx.commit().await.map_err(|e| {
            metrics::counter!("booking_store_commit_failures_total").increment(1);
            StoreError::Unavailable(format!("Failed to commit unit on {occurrence}: {e}"))
        })?;

        tracing::trace!(occurrence = %occurrence, "Unit committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use studio_booking_core::SlotId;

    #[test]
    fn lock_key_distinguishes_dates() {
        let slot_id = SlotId::new();
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap_or_default();
        let next_monday = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap_or_default();
        assert_ne!(
            lock_key(Occurrence::new(slot_id, monday)),
            lock_key(Occurrence::new(slot_id, next_monday))
        );
    }
}
