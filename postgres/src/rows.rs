//! Row mapping between the booking tables and the domain model.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use sqlx::Row;
use sqlx::postgres::PgRow;
use studio_booking_core::{
    Occurrence, RequesterId, Reservation, ReservationId, ReservationOrigin, ReservationStatus,
    Slot, SlotCapacity, SlotId, StoreError, VenueId, WaitlistEntry, WaitlistEntryId,
    WaitlistStatus,
};
use uuid::Uuid;

pub(crate) const SLOT_COLUMNS: &str =
    "id, venue_id, weekday, starts_at, ends_at, class_type, level, instructor, active";

pub(crate) const RESERVATION_COLUMNS: &str =
    "id, requester_id, slot_id, class_date, status, origin, cancel_reason, cancelled_at, created_at";

pub(crate) const ENTRY_COLUMNS: &str =
    "id, requester_id, slot_id, class_date, status, promoted_reservation_id, status_changed_at, created_at";

/// Map an sqlx error into a store error.
///
/// Unique violations become [`StoreError::Conflict`]; everything else is
/// treated as the store being unavailable.
pub(crate) fn map_sqlx(context: &str, e: &sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = e {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(format!("{context}: {e}"));
        }
    }
    StoreError::Unavailable(format!("{context}: {e}"))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

pub(crate) fn weekday_to_db(weekday: Weekday) -> i16 {
    match weekday {
        Weekday::Mon => 0,
        Weekday::Tue => 1,
        Weekday::Wed => 2,
        Weekday::Thu => 3,
        Weekday::Fri => 4,
        Weekday::Sat => 5,
        Weekday::Sun => 6,
    }
}

fn weekday_from_db(value: i16) -> Result<Weekday, StoreError> {
    match value {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        _ => Err(StoreError::Corrupt(format!("Invalid weekday: {value}"))),
    }
}

pub(crate) fn slot_from_row(row: &PgRow) -> Result<Slot, StoreError> {
    Ok(Slot {
        id: SlotId::from_uuid(column(row, "id")?),
        venue_id: VenueId::from_uuid(column(row, "venue_id")?),
        weekday: weekday_from_db(column(row, "weekday")?)?,
        starts_at: column::<NaiveTime>(row, "starts_at")?,
        ends_at: column::<NaiveTime>(row, "ends_at")?,
        class_type: column(row, "class_type")?,
        level: column(row, "level")?,
        instructor: column(row, "instructor")?,
        active: column(row, "active")?,
    })
}

pub(crate) fn capacity_from_row(row: &PgRow) -> Result<SlotCapacity, StoreError> {
    let maximum: i32 = column(row, "maximum")?;
    Ok(SlotCapacity {
        slot_id: SlotId::from_uuid(column(row, "slot_id")?),
        maximum: u32::try_from(maximum)
            .map_err(|_| StoreError::Corrupt(format!("Negative capacity: {maximum}")))?,
        waitlist_allowed: column(row, "waitlist_allowed")?,
    })
}

fn occurrence_from_row(row: &PgRow) -> Result<Occurrence, StoreError> {
    Ok(Occurrence::new(
        SlotId::from_uuid(column(row, "slot_id")?),
        column::<NaiveDate>(row, "class_date")?,
    ))
}

pub(crate) fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    let status: String = column(row, "status")?;
    let origin: String = column(row, "origin")?;
    Ok(Reservation {
        id: ReservationId::from_uuid(column(row, "id")?),
        requester_id: RequesterId::from_uuid(column(row, "requester_id")?),
        occurrence: occurrence_from_row(row)?,
        status: ReservationStatus::from_columns(
            &status,
            column(row, "cancel_reason")?,
            column(row, "cancelled_at")?,
        )?,
        origin: ReservationOrigin::parse(&origin)?,
        created_at: column::<DateTime<Utc>>(row, "created_at")?,
    })
}

pub(crate) fn entry_from_row(row: &PgRow) -> Result<WaitlistEntry, StoreError> {
    let status: String = column(row, "status")?;
    let promoted: Option<Uuid> = column(row, "promoted_reservation_id")?;
    Ok(WaitlistEntry {
        id: WaitlistEntryId::from_uuid(column(row, "id")?),
        requester_id: RequesterId::from_uuid(column(row, "requester_id")?),
        occurrence: occurrence_from_row(row)?,
        status: WaitlistStatus::from_columns(
            &status,
            promoted.map(ReservationId::from_uuid),
            column(row, "status_changed_at")?,
        )?,
        created_at: column::<DateTime<Utc>>(row, "created_at")?,
    })
}

/// Cancellation columns `(cancel_reason, cancelled_at)` of a status.
pub(crate) fn cancellation_columns(
    status: &ReservationStatus,
) -> (Option<&str>, Option<DateTime<Utc>>) {
    match status {
        ReservationStatus::Confirmed => (None, None),
        ReservationStatus::Cancelled {
            reason,
            cancelled_at,
        } => (reason.as_deref(), Some(*cancelled_at)),
    }
}

/// Transition columns `(promoted_reservation_id, status_changed_at)` of a status.
pub(crate) fn transition_columns(status: &WaitlistStatus) -> (Option<Uuid>, Option<DateTime<Utc>>) {
    match status {
        WaitlistStatus::Waiting => (None, None),
        WaitlistStatus::Promoted {
            reservation_id,
            promoted_at,
        } => (Some(*reservation_id.as_uuid()), Some(*promoted_at)),
        WaitlistStatus::Withdrawn { withdrawn_at } => (None, Some(*withdrawn_at)),
    }
}

/// Convert a `COUNT(*)` result.
pub(crate) fn count_from_db(count: i64) -> Result<u32, StoreError> {
    u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("Invalid count: {count}")))
}
