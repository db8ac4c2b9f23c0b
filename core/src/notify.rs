//! Notification collaborator.
//!
//! The engine never delivers notifications itself. After a unit of work has
//! committed, the caller hands the outcome to a [`Notifier`]; delivery is
//! fire-and-forget and its failure never affects reservation state.

use crate::error::NotifyError;
use crate::types::{Occurrence, RequesterId, ReservationId, WaitlistEntryId};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Something a requester should hear about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// A direct request was confirmed.
    ReservationConfirmed {
        /// The new reservation
        reservation_id: ReservationId,
        /// Slot and date
        occurrence: Occurrence,
    },

    /// A waitlist entry was promoted into a confirmed reservation.
    PromotedFromWaitlist {
        /// The promoted entry
        entry_id: WaitlistEntryId,
        /// The reservation created by the promotion
        reservation_id: ReservationId,
        /// Slot and date
        occurrence: Occurrence,
    },

    /// A request joined the waitlist.
    WaitlistJoined {
        /// The new entry
        entry_id: WaitlistEntryId,
        /// Slot and date
        occurrence: Occurrence,
        /// FIFO position at the time of joining
        position: u32,
    },
}

impl NotificationEvent {
    /// Stable event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ReservationConfirmed { .. } => "reservation_confirmed",
            Self::PromotedFromWaitlist { .. } => "promoted_from_waitlist",
            Self::WaitlistJoined { .. } => "waitlist_joined",
        }
    }

    /// The occurrence the event refers to.
    #[must_use]
    pub const fn occurrence(&self) -> Occurrence {
        match self {
            Self::ReservationConfirmed { occurrence, .. }
            | Self::PromotedFromWaitlist { occurrence, .. }
            | Self::WaitlistJoined { occurrence, .. } => *occurrence,
        }
    }
}

/// Notification delivery.
///
/// This trait abstracts over delivery channels (email, push, SMS).
pub trait Notifier: Send + Sync {
    /// Deliver `event` to `requester_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery fails. Callers log and count the
    /// failure; it is never retried by the engine.
    fn notify(
        &self,
        requester_id: RequesterId,
        event: NotificationEvent,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Notifier that only writes a structured log line.
///
/// Used where no delivery channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        requester_id: RequesterId,
        event: NotificationEvent,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            requester_id = %requester_id,
            event_type = event.event_type(),
            occurrence = %event.occurrence(),
            "Notification"
        );
        Ok(())
    }
}
