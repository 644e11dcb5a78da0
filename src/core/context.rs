//! Shared handles for engine operations.
//!
//! Nothing in the engine reaches for globals: the database, the clock and the
//! notifier all arrive through a [`StoreContext`], so a test can swap any of
//! them.

use crate::{
    config::AppConfig,
    core::clock::{Clock, SystemClock},
    notify::{LogNotifier, Notifier},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Timing and quantity rules for reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// How long after creation a student may still cancel
    pub cancel_window: Duration,
    /// How long after the cancel window the items are held for pickup
    pub claim_window: Duration,
    /// Largest quantity of one item (or variant) a reservation may hold
    pub max_quantity_per_item: i32,
    /// Upper bound on a single notification send
    pub notification_timeout: std::time::Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            cancel_window: Duration::minutes(10),
            claim_window: Duration::hours(24),
            max_quantity_per_item: 5,
            notification_timeout: std::time::Duration::from_secs(15),
        }
    }
}

impl ReservationPolicy {
    /// Builds the policy from loaded settings.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cancel_window: config.reservation.cancel_window(),
            claim_window: config.reservation.claim_window(),
            max_quantity_per_item: config.reservation.max_quantity_per_item,
            notification_timeout: std::time::Duration::from_secs(config.email.timeout_secs),
        }
    }

    /// End of the self-service cancellation window for a reservation made at `created_at`.
    #[must_use]
    pub fn cancel_deadline(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.cancel_window
    }

    /// Claim deadline for a reservation whose cancel window closes at `cancel_deadline`.
    #[must_use]
    pub fn claim_deadline(&self, cancel_deadline: DateTime<Utc>) -> DateTime<Utc> {
        cancel_deadline + self.claim_window
    }
}

/// Handles every engine operation runs against.
#[derive(Clone)]
pub struct StoreContext {
    /// Database handle
    pub db: DatabaseConnection,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Outbound email channel
    pub notifier: Arc<dyn Notifier>,
    /// Reservation rules
    pub policy: ReservationPolicy,
}

impl StoreContext {
    /// Context with the system clock, the console notifier and default rules.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            policy: ReservationPolicy::default(),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the reservation rules.
    #[must_use]
    pub fn with_policy(mut self, policy: ReservationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current instant according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
