//! Domain types for the class reservation engine.
//!
//! This module contains identifiers, the schedule records (slots and their
//! capacities), and the two stateful records the engine manages: reservations
//! and waitlist entries. Statuses are closed enums so that data which only
//! exists in one state (a cancellation reason, a promotion link) cannot be
//! attached to any other state.

use crate::error::StoreError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a recurring class slot
    SlotId
}

uuid_id! {
    /// Unique identifier for a venue
    VenueId
}

uuid_id! {
    /// Unique identifier for a reservation
    ReservationId
}

uuid_id! {
    /// Unique identifier for a waitlist entry
    WaitlistEntryId
}

uuid_id! {
    /// Identity of a requester, as supplied by the identity collaborator
    RequesterId
}

// ============================================================================
// Principal
// ============================================================================

/// Privilege level of a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Regular member; may only act on their own reservations
    Member,
    /// Staff or administrator; may act on behalf of any requester
    Elevated,
}

/// The caller of a coordinator operation.
///
/// Built by the caller from whatever the identity collaborator reports and
/// passed explicitly into every operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Who is calling
    pub requester_id: RequesterId,
    /// What they are allowed to do
    pub privilege: Privilege,
}

impl Principal {
    /// A regular member principal.
    #[must_use]
    pub const fn member(requester_id: RequesterId) -> Self {
        Self {
            requester_id,
            privilege: Privilege::Member,
        }
    }

    /// An elevated (staff) principal.
    #[must_use]
    pub const fn elevated(requester_id: RequesterId) -> Self {
        Self {
            requester_id,
            privilege: Privilege::Elevated,
        }
    }

    /// Whether this principal may act on a record owned by `owner`.
    #[must_use]
    pub fn may_act_for(&self, owner: RequesterId) -> bool {
        self.requester_id == owner || self.privilege == Privilege::Elevated
    }
}

// ============================================================================
// Schedule
// ============================================================================

/// A recurring class time-block at a venue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot identifier
    pub id: SlotId,
    /// Venue the class takes place at
    pub venue_id: VenueId,
    /// Day of the week the slot recurs on
    pub weekday: Weekday,
    /// Local start time
    pub starts_at: NaiveTime,
    /// Local end time
    pub ends_at: NaiveTime,
    /// Class type label (e.g. "reformer", "mat")
    pub class_type: String,
    /// Level label
    pub level: Option<String>,
    /// Instructor label
    pub instructor: Option<String>,
    /// Inactive slots cannot be reserved
    pub active: bool,
}

impl Slot {
    /// Creates a new active slot.
    #[must_use]
    pub fn new(
        venue_id: VenueId,
        weekday: Weekday,
        starts_at: NaiveTime,
        ends_at: NaiveTime,
        class_type: impl Into<String>,
    ) -> Self {
        Self {
            id: SlotId::new(),
            venue_id,
            weekday,
            starts_at,
            ends_at,
            class_type: class_type.into(),
            level: None,
            instructor: None,
            active: true,
        }
    }

    /// Set the level label.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Set the instructor label.
    #[must_use]
    pub fn with_instructor(mut self, instructor: impl Into<String>) -> Self {
        self.instructor = Some(instructor.into());
        self
    }

    /// Mark the slot inactive.
    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether the slot recurs on `date`.
    #[must_use]
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        date.weekday() == self.weekday
    }

    /// First date on or after `from` that the slot occurs on.
    #[must_use]
    pub fn next_occurrence(&self, from: NaiveDate) -> Occurrence {
        let ahead = (7 + self.weekday.num_days_from_monday()
            - from.weekday().num_days_from_monday())
            % 7;
        Occurrence::new(self.id, from + Duration::days(i64::from(ahead)))
    }
}

/// Capacity configuration of a slot (one-to-one with [`Slot`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCapacity {
    /// Slot this capacity belongs to
    pub slot_id: SlotId,
    /// Maximum number of confirmed reservations per occurrence
    pub maximum: u32,
    /// Whether requests against a full occurrence may join the waitlist
    pub waitlist_allowed: bool,
}

impl SlotCapacity {
    /// Creates a capacity record.
    #[must_use]
    pub const fn new(slot_id: SlotId, maximum: u32, waitlist_allowed: bool) -> Self {
        Self {
            slot_id,
            maximum,
            waitlist_allowed,
        }
    }
}

/// One dated instance of a slot: the key capacity is enforced against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    /// The recurring slot
    pub slot_id: SlotId,
    /// The class date
    pub date: NaiveDate,
}

impl Occurrence {
    /// Creates an occurrence key.
    #[must_use]
    pub const fn new(slot_id: SlotId, date: NaiveDate) -> Self {
        Self { slot_id, date }
    }
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot_id, self.date)
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// Status of a reservation.
///
/// `(none) → Confirmed → Cancelled` (terminal).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Holds a spot in the occurrence
    Confirmed,
    /// Released; never transitions again
    Cancelled {
        /// Free-form reason supplied by the caller
        reason: Option<String>,
        /// When the cancellation was committed
        cancelled_at: DateTime<Utc>,
    },
}

impl ReservationStatus {
    /// Storage representation of the status tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether the reservation holds a spot.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }

    /// Whether the reservation has been cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Rebuild a status from its storage columns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] for an unknown tag or a cancelled row
    /// without a cancellation timestamp.
    pub fn from_columns(
        tag: &str,
        reason: Option<String>,
        cancelled_at: Option<DateTime<Utc>>,
    ) -> Result<Self, StoreError> {
        match (tag, cancelled_at) {
            ("confirmed", _) => Ok(Self::Confirmed),
            ("cancelled", Some(cancelled_at)) => Ok(Self::Cancelled {
                reason,
                cancelled_at,
            }),
            ("cancelled", None) => Err(StoreError::Corrupt(
                "cancelled reservation without cancellation time".to_string(),
            )),
            _ => Err(StoreError::Corrupt(format!("Invalid reservation status: {tag}"))),
        }
    }
}

/// How a reservation came into existence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationOrigin {
    /// Confirmed immediately on request
    Direct,
    /// Created by promoting the oldest waitlist entry
    PromotedFromWaitlist,
}

impl ReservationOrigin {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::PromotedFromWaitlist => "promoted_from_waitlist",
        }
    }

    /// Parse from storage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the string is not a known origin.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "direct" => Ok(Self::Direct),
            "promoted_from_waitlist" => Ok(Self::PromotedFromWaitlist),
            _ => Err(StoreError::Corrupt(format!("Invalid reservation origin: {s}"))),
        }
    }
}

/// A requester's claim on one occurrence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub id: ReservationId,
    /// Owner of the reservation
    pub requester_id: RequesterId,
    /// Slot and date reserved
    pub occurrence: Occurrence,
    /// Current status
    pub status: ReservationStatus,
    /// Direct or promoted
    pub origin: ReservationOrigin,
    /// When the reservation was created
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a new confirmed reservation.
    #[must_use]
    pub fn confirmed(
        requester_id: RequesterId,
        occurrence: Occurrence,
        origin: ReservationOrigin,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            requester_id,
            occurrence,
            status: ReservationStatus::Confirmed,
            origin,
            created_at,
        }
    }

    /// Whether the reservation currently holds a spot.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.status.is_confirmed()
    }
}

// ============================================================================
// Waitlist
// ============================================================================

/// Status of a waitlist entry.
///
/// `(none) → Waiting → {Promoted | Withdrawn}` (both terminal).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WaitlistStatus {
    /// Queued for the next free spot
    Waiting,
    /// Converted into a confirmed reservation
    Promoted {
        /// The reservation created by the promotion
        reservation_id: ReservationId,
        /// When the promotion was committed
        promoted_at: DateTime<Utc>,
    },
    /// Removed by the requester
    Withdrawn {
        /// When the withdrawal was committed
        withdrawn_at: DateTime<Utc>,
    },
}

impl WaitlistStatus {
    /// Storage representation of the status tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Promoted { .. } => "promoted",
            Self::Withdrawn { .. } => "withdrawn",
        }
    }

    /// Whether the entry is still queued.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// The reservation this entry was promoted into, if any.
    #[must_use]
    pub const fn promoted_reservation(&self) -> Option<ReservationId> {
        match self {
            Self::Promoted { reservation_id, .. } => Some(*reservation_id),
            _ => None,
        }
    }

    /// Rebuild a status from its storage columns.
    ///
    /// `changed_at` is the promotion or withdrawal time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] for an unknown tag or missing columns.
    pub fn from_columns(
        tag: &str,
        reservation_id: Option<ReservationId>,
        changed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, StoreError> {
        match (tag, reservation_id, changed_at) {
            ("waiting", _, _) => Ok(Self::Waiting),
            ("promoted", Some(reservation_id), Some(promoted_at)) => Ok(Self::Promoted {
                reservation_id,
                promoted_at,
            }),
            ("withdrawn", _, Some(withdrawn_at)) => Ok(Self::Withdrawn { withdrawn_at }),
            ("promoted" | "withdrawn", _, _) => Err(StoreError::Corrupt(format!(
                "waitlist entry in state {tag} is missing its transition columns"
            ))),
            _ => Err(StoreError::Corrupt(format!("Invalid waitlist status: {tag}"))),
        }
    }
}

/// A pending request against a full occurrence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    /// Entry identifier
    pub id: WaitlistEntryId,
    /// Who is waiting
    pub requester_id: RequesterId,
    /// Slot and date waited for
    pub occurrence: Occurrence,
    /// Current status
    pub status: WaitlistStatus,
    /// When the entry joined the queue
    pub created_at: DateTime<Utc>,
}

impl WaitlistEntry {
    /// Creates a new waiting entry.
    #[must_use]
    pub fn waiting(
        requester_id: RequesterId,
        occurrence: Occurrence,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WaitlistEntryId::new(),
            requester_id,
            occurrence,
            status: WaitlistStatus::Waiting,
            created_at,
        }
    }

    /// FIFO ordering key: creation time, then entry id as a stable tie-break.
    #[must_use]
    pub const fn queue_key(&self) -> (DateTime<Utc>, WaitlistEntryId) {
        (self.created_at, self.id)
    }

    /// Whether the entry is still queued.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.status.is_waiting()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn principal_may_act_for_owner_or_when_elevated() {
        let owner = RequesterId::new();
        let other = RequesterId::new();

        assert!(Principal::member(owner).may_act_for(owner));
        assert!(!Principal::member(other).may_act_for(owner));
        assert!(Principal::elevated(other).may_act_for(owner));
    }

    #[test]
    fn reservation_status_columns_roundtrip() {
        let at = Utc::now();
        let cancelled = ReservationStatus::Cancelled {
            reason: Some("sick".to_string()),
            cancelled_at: at,
        };

        let rebuilt =
            ReservationStatus::from_columns(cancelled.as_str(), Some("sick".to_string()), Some(at))
                .unwrap();
        assert_eq!(rebuilt, cancelled);
        assert_eq!(
            ReservationStatus::from_columns("confirmed", None, None).unwrap(),
            ReservationStatus::Confirmed
        );
        assert!(ReservationStatus::from_columns("cancelled", None, None).is_err());
        assert!(ReservationStatus::from_columns("pending", None, None).is_err());
    }

    #[test]
    fn waitlist_status_requires_transition_columns() {
        let at = Utc::now();
        let reservation_id = ReservationId::new();

        assert_eq!(
            WaitlistStatus::from_columns("promoted", Some(reservation_id), Some(at)).unwrap(),
            WaitlistStatus::Promoted {
                reservation_id,
                promoted_at: at
            }
        );
        assert!(WaitlistStatus::from_columns("promoted", None, Some(at)).is_err());
        assert!(WaitlistStatus::from_columns("withdrawn", None, None).is_err());
        assert!(WaitlistStatus::from_columns("queued", None, None).is_err());
    }

    #[test]
    fn origin_parse_rejects_unknown() {
        assert_eq!(
            ReservationOrigin::parse("promoted_from_waitlist").unwrap(),
            ReservationOrigin::PromotedFromWaitlist
        );
        assert!(ReservationOrigin::parse("walk_in").is_err());
    }

    #[test]
    fn queue_key_orders_by_time_then_id() {
        let occurrence = Occurrence::new(SlotId::new(), date(2025, 3, 3));
        let t0 = Utc::now();
        let early = WaitlistEntry::waiting(RequesterId::new(), occurrence, t0);
        let late = WaitlistEntry::waiting(RequesterId::new(), occurrence, t0 + Duration::seconds(1));
        assert!(early.queue_key() < late.queue_key());

        let mut a = WaitlistEntry::waiting(RequesterId::new(), occurrence, t0);
        let mut b = WaitlistEntry::waiting(RequesterId::new(), occurrence, t0);
        a.id = WaitlistEntryId::from_uuid(Uuid::from_u128(1));
        b.id = WaitlistEntryId::from_uuid(Uuid::from_u128(2));
        assert!(a.queue_key() < b.queue_key());
    }

    #[test]
    fn next_occurrence_lands_on_slot_weekday() {
        let slot = Slot::new(
            VenueId::new(),
            Weekday::Wed,
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            "mat",
        );

        // 2025-03-03 is a Monday
        let next = slot.next_occurrence(date(2025, 3, 3));
        assert_eq!(next.date, date(2025, 3, 5));
        assert!(slot.occurs_on(next.date));

        // Already on the weekday
        assert_eq!(slot.next_occurrence(date(2025, 3, 5)).date, date(2025, 3, 5));
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(WaitlistStatus::Waiting).unwrap();
        assert_eq!(json["status"], "waiting");
    }
}
