//! Wiring: build a service from configuration and run the demo workload.

use crate::config::{BookingConfig, ConfigError};
use crate::coordinator::{CancelOutcome, Coordinator, RequestOutcome};
use crate::service::{BookingService, BookingSettings};
use chrono::{NaiveDate, NaiveTime, Weekday};
use studio_booking_core::environment::{Clock, SystemClock};
use studio_booking_core::notify::TracingNotifier;
use studio_booking_core::store::{BookingStore, ScheduleAdmin};
use studio_booking_core::{
    BookingError, Occurrence, Principal, RequesterId, Slot, SlotCapacity, StoreError, VenueId,
};
use studio_booking_postgres::PostgresBookingStore;
use crate::telemetry;
use studio_booking_runtime::metrics::{MetricsError, MetricsServer};
use thiserror::Error;

/// Errors raised while assembling or running the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Store could not be reached, migrated or seeded
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A coordinator operation failed
    #[error("Booking error: {0}")]
    Booking(#[from] BookingError),

    /// Metrics exporter could not start
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Tracing subscriber could not be installed
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tracing_subscriber::util::TryInitError),
}

/// Install tracing and start the metrics exporter.
///
/// The metrics address is validated before any global state is touched.
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`AppError::Config`] for an invalid metrics address,
/// [`AppError::Telemetry`] if a subscriber is already installed and
/// [`AppError::Metrics`] if the exporter cannot start.
pub fn start_observability(config: &BookingConfig) -> Result<MetricsServer, AppError> {
    let addr = config.metrics_addr()?;
    telemetry::init(config)?;
    Ok(telemetry::start_metrics(addr)?)
}

/// Connect to `PostgreSQL` and apply pending migrations.
///
/// # Errors
///
/// Returns [`AppError::Store`] if the pool cannot connect or a migration fails.
pub async fn connect_postgres(config: &BookingConfig) -> Result<PostgresBookingStore, AppError> {
    let store = PostgresBookingStore::connect(
        &config.postgres.url,
        config.postgres.max_connections,
        config.postgres.min_connections,
        config.connect_timeout(),
    )
    .await?;
    store.migrate().await?;
    Ok(store)
}

/// Build a service over `store` using the system clock and a log-only notifier.
#[must_use]
pub fn build_service<S>(
    store: S,
    config: &BookingConfig,
) -> BookingService<S, SystemClock, TracingNotifier>
where
    S: BookingStore + Clone,
{
    BookingService::new(
        Coordinator::new(store, SystemClock),
        TracingNotifier,
        config.retry_policy(),
        BookingSettings {
            notify_on_confirmation: config.notifications.on_confirmation,
            notify_on_waitlist: config.notifications.on_waitlist,
        },
    )
}

/// What the demo workload observed.
#[derive(Debug, Clone)]
pub struct DemoReport {
    /// The occurrence the demo booked
    pub occurrence: Occurrence,
    /// Outcomes of the three requests, in order
    pub requests: Vec<RequestOutcome>,
    /// Outcome of the first requester's cancellation
    pub cancellation: CancelOutcome,
    /// Waiting entries left after the cancellation
    pub remaining_waitlist: u32,
}

/// Seed a two-spot Monday slot and run the demo workload on its next
/// occurrence.
///
/// Two members book directly, a third joins the waitlist, then the first
/// cancels and the waiting member is promoted into the freed spot.
///
/// # Errors
///
/// Returns [`AppError`] if seeding or any booking operation fails.
pub async fn run_demo<S>(store: S, config: &BookingConfig) -> Result<DemoReport, AppError>
where
    S: BookingStore + ScheduleAdmin + Clone,
{
    let slot = Slot::new(
        VenueId::new(),
        Weekday::Mon,
        NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
        NaiveTime::from_hms_opt(19, 0, 0).unwrap_or_default(),
        "reformer",
    );
    store.upsert_slot(&slot).await?;
    store
        .set_capacity(SlotCapacity::new(slot.id, 2, true))
        .await?;

    let today: NaiveDate = SystemClock.now().date_naive();
    let occurrence = slot.next_occurrence(today);
    tracing::info!(slot_id = %slot.id, date = %occurrence.date, "Seeded demo slot");

    let service = build_service(store, config);
    let members: Vec<Principal> = (0..3)
        .map(|_| Principal::member(RequesterId::new()))
        .collect();

    let mut requests = Vec::with_capacity(members.len());
    for member in &members {
        let outcome = service
            .request_reservation(member, slot.id, occurrence.date, true)
            .await?;
        tracing::info!(requester_id = %member.requester_id, ?outcome, "Request handled");
        requests.push(outcome);
    }

    let first = requests
        .first()
        .and_then(RequestOutcome::reservation)
        .ok_or(BookingError::NotFound)?;
    let cancellation = service
        .cancel_reservation(&members[0], first.id, Some("schedule conflict".to_string()))
        .await?;
    tracing::info!(promoted = ?cancellation.promoted(), "Cancellation handled");

    let snapshot = service.inspect(slot.id, occurrence.date).await?;
    tracing::info!(
        confirmed = snapshot.confirmed_count,
        available = snapshot.available_spots,
        waiting = snapshot.waitlist_count,
        "Final capacity"
    );

    Ok(DemoReport {
        occurrence,
        requests,
        cancellation,
        remaining_waitlist: snapshot.waitlist_count,
    })
}
