//! Shared test utilities for the reservation engine.
//!
//! This module provides common helper functions for setting up test databases,
//! creating catalog entries with sensible defaults, and observing notifications.
#![allow(clippy::unwrap_used)]

use crate::{
    core::{
        catalog::{self, NewItem, NewVariant},
        clock::ManualClock,
        context::StoreContext,
        ledger::StockLine,
        reservation::NewReservation,
        system_config,
    },
    entities::{ReservationStatus, item, item_variant, reservation, student},
    errors::{Error, Result},
    notify::{NoticeKind, Notifier, ReservationNotice},
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::{Arc, Mutex};

/// Creates an in-memory `SQLite` database with all tables initialized and no
/// system configuration.
pub async fn setup_bare_db() -> Result<DatabaseConnection> {
    let db = crate::config::database::create_connection("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// The global walk-in floor is set to 0 so tests opt into floors per item.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = setup_bare_db().await?;
    system_config::set_min_reservation_stock(&db, 0).await?;
    Ok(db)
}

/// Creates a test item with sensible defaults.
///
/// # Defaults
/// * price: 100.0
/// * `min_reservation_stock`: None (global floor)
pub async fn create_test_item(
    db: &DatabaseConnection,
    name: &str,
    stock: i32,
) -> Result<item::Model> {
    create_custom_item(db, name, 100.0, stock, None).await
}

/// Creates a test item with custom parameters.
pub async fn create_custom_item(
    db: &DatabaseConnection,
    name: &str,
    price: f64,
    stock: i32,
    min_reservation_stock: Option<i32>,
) -> Result<item::Model> {
    catalog::create_item(
        db,
        NewItem {
            name: name.to_string(),
            description: None,
            price,
            stock,
            min_reservation_stock,
            admin_id: None,
        },
    )
    .await
}

/// Creates a variant that inherits the item price.
pub async fn create_test_variant(
    db: &DatabaseConnection,
    item_id: i64,
    size: &str,
    stock: i32,
) -> Result<item_variant::Model> {
    create_custom_variant(db, item_id, size, None, stock).await
}

/// Creates a variant with a custom price override.
pub async fn create_custom_variant(
    db: &DatabaseConnection,
    item_id: i64,
    size: &str,
    price: Option<f64>,
    stock: i32,
) -> Result<item_variant::Model> {
    catalog::create_variant(
        db,
        NewVariant {
            item_id,
            size: size.to_string(),
            price,
            stock,
            admin_id: None,
        },
    )
    .await
}

/// Inserts a bare Pending reservation row with no lines, bypassing the
/// state machine. For ledger tests that need a reservation id.
pub async fn create_test_reservation_row(
    db: &DatabaseConnection,
    student_number: &str,
) -> Result<(student::Model, reservation::Model)> {
    let student = student::ActiveModel {
        full_name: Set(format!("Student {student_number}")),
        email: Set(None),
        student_number: Set(student_number.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    let now = Utc::now();
    let reservation = reservation::ActiveModel {
        code: Set(format!("RES-T{}", student.id)),
        student_id: Set(student.id),
        status: Set(ReservationStatus::Pending),
        created_at: Set(now),
        cancel_window_expires: Set(now + Duration::minutes(10)),
        claim_deadline: Set(Some(now + Duration::hours(24))),
        claim_notified_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok((student, reservation))
}

/// Builds a reservation request for item-level lines. The student email is
/// derived from the student number.
pub fn reservation_request(name: &str, student_number: &str, lines: &[(i64, i32)]) -> NewReservation {
    NewReservation {
        student_name: name.to_string(),
        student_email: Some(format!("{student_number}@students.example")),
        student_number: Some(student_number.to_string()),
        lines: lines
            .iter()
            .map(|&(item_id, quantity)| StockLine::item(item_id, quantity))
            .collect(),
    }
}

/// A notice captured by [`RecordingNotifier`].
#[derive(Debug, Clone)]
pub struct SentNotice {
    /// Which event
    pub kind: NoticeKind,
    /// Recipient
    pub to: String,
    /// Payload
    pub notice: ReservationNotice,
}

/// Notifier that keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotice>>,
}

impl RecordingNotifier {
    /// Notices sent so far, in order.
    pub fn sent(&self) -> Vec<SentNotice> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, kind: NoticeKind, to: &str, notice: &ReservationNotice) {
        self.sent.lock().unwrap().push(SentNotice {
            kind,
            to: to.to_string(),
            notice: notice.clone(),
        });
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_reservation_created(&self, to: &str, notice: &ReservationNotice) -> Result<()> {
        self.record(NoticeKind::Created, to, notice);
        Ok(())
    }

    async fn send_reservation_canceled(
        &self,
        to: &str,
        notice: &ReservationNotice,
    ) -> Result<()> {
        self.record(NoticeKind::Canceled, to, notice);
        Ok(())
    }

    async fn send_claim_ready(&self, to: &str, notice: &ReservationNotice) -> Result<()> {
        self.record(NoticeKind::ClaimReady, to, notice);
        Ok(())
    }
}

/// Notifier whose every send fails.
#[derive(Debug, Default)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send_reservation_created(&self, _: &str, _: &ReservationNotice) -> Result<()> {
        Err(Error::Notification {
            message: "relay refused connection".to_string(),
        })
    }

    async fn send_reservation_canceled(&self, _: &str, _: &ReservationNotice) -> Result<()> {
        Err(Error::Notification {
            message: "relay refused connection".to_string(),
        })
    }

    async fn send_claim_ready(&self, _: &str, _: &ReservationNotice) -> Result<()> {
        Err(Error::Notification {
            message: "relay refused connection".to_string(),
        })
    }
}

/// Notifier whose sends never complete.
#[derive(Debug, Default)]
pub struct HangingNotifier;

#[async_trait]
impl Notifier for HangingNotifier {
    async fn send_reservation_created(&self, _: &str, _: &ReservationNotice) -> Result<()> {
        std::future::pending().await
    }

    async fn send_reservation_canceled(&self, _: &str, _: &ReservationNotice) -> Result<()> {
        std::future::pending().await
    }

    async fn send_claim_ready(&self, _: &str, _: &ReservationNotice) -> Result<()> {
        std::future::pending().await
    }
}

/// A store context with handles to its manual clock and recording notifier.
pub struct TestContext {
    /// The context under test
    pub ctx: StoreContext,
    /// Clock shared with `ctx`
    pub clock: Arc<ManualClock>,
    /// Notifier shared with `ctx`
    pub notifier: Arc<RecordingNotifier>,
}

/// Fresh database, a clock frozen at a fixed school-day morning, a recording
/// notifier and default reservation rules.
pub async fn setup_test_context() -> Result<TestContext> {
    let db = setup_test_db().await?;
    let start = Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let notifier = Arc::new(RecordingNotifier::default());

    let ctx = StoreContext::new(db)
        .with_clock(Arc::clone(&clock) as Arc<dyn crate::core::clock::Clock>)
        .with_notifier(Arc::clone(&notifier) as Arc<dyn Notifier>);
    Ok(TestContext {
        ctx,
        clock,
        notifier,
    })
}
