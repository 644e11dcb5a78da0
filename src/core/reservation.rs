//! Reservation business logic - Creating, canceling and inspecting student
//! reservations.
//!
//! A reservation holds stock from the moment it is created. Creation,
//! cancellation and every later transition run in one database transaction
//! together with their ledger movements, so a failure half-way leaves neither
//! a reservation nor a decremented counter behind. Emails go out only after
//! the transaction has committed.
//!
//! ```text
//! Pending --cancel--> Canceled
//!    |  \--deadline--> Expired
//!    v
//! Approved --confirm--> Claimed
//!    |  \--deadline--> Expired
//!    \--reject--> Canceled
//! ```

use crate::{
    core::{
        context::StoreContext,
        ledger::{self, Provenance, Purpose, StockLine},
        student,
    },
    entities::{
        Item, ItemVariant, Reservation, ReservationItem, ReservationStatus, reservation,
        reservation_item, student as student_entity,
    },
    errors::{Error, Result},
    notify::{self, NoticeKind, NoticeLine, ReservationNotice},
};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use sea_orm::{QueryOrder, Set, SqlErr, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{debug, info, instrument};

/// Prefix of every reservation code.
pub const RESERVATION_CODE_PREFIX: &str = "RES-";

const CODE_LENGTH: usize = 8;
const CODE_ATTEMPTS: usize = 5;

/// A student's request to reserve items.
#[derive(Debug, Clone, Default)]
pub struct NewReservation {
    /// Full name of the student
    pub student_name: String,
    /// Contact address for reservation emails
    pub student_email: Option<String>,
    /// School id number; required
    pub student_number: Option<String>,
    /// Requested lines; lines naming the same item and variant are merged
    pub lines: Vec<StockLine>,
}

/// A reservation line with the catalog data needed to display it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationLineDetails {
    /// The stored line
    pub line: reservation_item::Model,
    /// Item name
    pub item_name: String,
    /// Variant size label
    pub variant_size: Option<String>,
    /// Current unit price: the variant override, else the item price
    pub unit_price: f64,
}

/// A reservation together with its student and lines.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationDetails {
    /// The reservation
    pub reservation: reservation::Model,
    /// Who holds it
    pub student: student_entity::Model,
    /// What it holds
    pub lines: Vec<ReservationLineDetails>,
    /// Another student with the same email holds an active reservation.
    /// Staff should verify the holder before approving.
    pub email_has_other_active: bool,
}

impl ReservationDetails {
    /// Sum of quantity times current unit price over all lines.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.lines
            .iter()
            .map(|l| f64::from(l.line.quantity) * l.unit_price)
            .sum()
    }

    /// The email payload for this reservation.
    #[must_use]
    pub fn notice(&self, deadline: Option<DateTime<Utc>>) -> ReservationNotice {
        ReservationNotice {
            code: self.reservation.code.clone(),
            student_name: self.student.full_name.clone(),
            items: self
                .lines
                .iter()
                .map(|l| NoticeLine {
                    product_name: l.item_name.clone(),
                    variant_name: l.variant_size.clone(),
                    quantity: l.line.quantity,
                })
                .collect(),
            deadline,
        }
    }
}

/// Optional filters for [`list_reservations`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservationFilter {
    /// Only reservations in this status
    pub status: Option<ReservationStatus>,
    /// Only reservations of this student
    pub student_id: Option<i64>,
}

/// Generates `prefix` followed by eight random uppercase letters and digits.
#[must_use]
pub fn generate_code(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("{prefix}{suffix}")
}

async fn unique_reservation_code<C>(conn: &C) -> Result<String>
where
    C: ConnectionTrait,
{
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_code(RESERVATION_CODE_PREFIX);
        let taken = Reservation::find()
            .filter(reservation::Column::Code.eq(&code))
            .count(conn)
            .await?;
        if taken == 0 {
            return Ok(code);
        }
    }
    Err(Error::Database(DbErr::Custom(
        "could not generate a unique reservation code".to_string(),
    )))
}

/// Sums the quantities of lines that name the same item and variant,
/// keeping first-seen order.
pub(crate) fn merge_lines(lines: &[StockLine]) -> Vec<StockLine> {
    let mut merged: Vec<StockLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged
            .iter_mut()
            .find(|m| m.item_id == line.item_id && m.variant_id == line.variant_id)
        {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(*line),
        }
    }
    merged
}

fn validate_request(request: &NewReservation, max_per_item: i32) -> Result<Vec<StockLine>> {
    if request.student_name.trim().is_empty() {
        return Err(Error::Validation {
            message: "Student name is required".to_string(),
        });
    }
    if request
        .student_number
        .as_deref()
        .is_none_or(|n| n.trim().is_empty())
    {
        return Err(Error::Validation {
            message: "Student number is required".to_string(),
        });
    }
    if request.lines.is_empty() {
        return Err(Error::Validation {
            message: "A reservation needs at least one item".to_string(),
        });
    }
    if let Some(bad) = request.lines.iter().find(|l| l.quantity <= 0) {
        return Err(Error::Validation {
            message: format!(
                "Quantity for item {} must be positive, got {}",
                bad.item_id, bad.quantity
            ),
        });
    }

    let merged = merge_lines(&request.lines);
    if let Some(over) = merged.iter().find(|l| l.quantity > max_per_item) {
        return Err(Error::Validation {
            message: format!(
                "At most {max_per_item} of item {} may be reserved, got {}",
                over.item_id, over.quantity
            ),
        });
    }
    Ok(merged)
}

/// Looks up a reservation by code.
///
/// # Errors
/// Returns `ReservationNotFound` if no reservation has this code.
pub async fn find_by_code<C>(conn: &C, code: &str) -> Result<reservation::Model>
where
    C: ConnectionTrait,
{
    Reservation::find()
        .filter(reservation::Column::Code.eq(code.trim()))
        .one(conn)
        .await?
        .ok_or_else(|| Error::ReservationNotFound {
            code: code.trim().to_string(),
        })
}

/// The student's Pending or Approved reservation, if any.
pub async fn active_reservation_for_student<C>(
    conn: &C,
    student_id: i64,
) -> Result<Option<reservation::Model>>
where
    C: ConnectionTrait,
{
    Reservation::find()
        .filter(reservation::Column::StudentId.eq(student_id))
        .filter(reservation::Column::Status.is_in(ReservationStatus::ACTIVE))
        .one(conn)
        .await
        .map_err(Into::into)
}

/// Moves a reservation to `to`, but only if it is still in one of `from`.
/// A reservation that moved on in the meantime yields `InvalidTransition`.
pub(crate) async fn transition<C>(
    conn: &C,
    reservation: &reservation::Model,
    from: &[ReservationStatus],
    to: ReservationStatus,
    action: &'static str,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Reservation::update_many()
        .col_expr(reservation::Column::Status, Expr::value(to))
        .filter(reservation::Column::Id.eq(reservation.id))
        .filter(reservation::Column::Status.is_in(from.iter().copied()))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let current = Reservation::find_by_id(reservation.id)
            .one(conn)
            .await?
            .map_or(reservation.status, |r| r.status);
        return Err(Error::InvalidTransition {
            code: reservation.code.clone(),
            status: current,
            action,
        });
    }
    debug!(code = %reservation.code, %to, "Reservation status changed");
    Ok(())
}

/// Stored lines of a reservation in creation order.
pub async fn lines_for_reservation<C>(
    conn: &C,
    reservation_id: i64,
) -> Result<Vec<reservation_item::Model>>
where
    C: ConnectionTrait,
{
    ReservationItem::find()
        .filter(reservation_item::Column::ReservationId.eq(reservation_id))
        .order_by_asc(reservation_item::Column::Id)
        .all(conn)
        .await
        .map_err(Into::into)
}

/// Returns every line of the reservation to stock.
pub(crate) async fn release_lines<C>(
    conn: &C,
    reservation: &reservation::Model,
    at: DateTime<Utc>,
    reference: &str,
) -> Result<Vec<reservation_item::Model>>
where
    C: ConnectionTrait,
{
    let lines = lines_for_reservation(conn, reservation.id).await?;
    for line in &lines {
        ledger::release(
            conn,
            StockLine {
                item_id: line.item_id,
                variant_id: line.variant_id,
                quantity: line.quantity,
            },
            Provenance::reservation(at, reservation.id, reference.to_string()),
        )
        .await?;
    }
    Ok(lines)
}

/// Loads the student and display lines of a reservation.
pub async fn load_details<C>(conn: &C, reservation: reservation::Model) -> Result<ReservationDetails>
where
    C: ConnectionTrait,
{
    let student = student::get_student(conn, reservation.student_id).await?;
    let stored = lines_for_reservation(conn, reservation.id).await?;

    let mut lines = Vec::with_capacity(stored.len());
    for line in stored {
        let item = Item::find_by_id(line.item_id)
            .one(conn)
            .await?
            .ok_or(Error::ItemNotFound {
                item_id: line.item_id,
            })?;
        let variant = match line.variant_id {
            Some(variant_id) => Some(
                ItemVariant::find_by_id(variant_id)
                    .one(conn)
                    .await?
                    .ok_or(Error::VariantNotFound {
                        item_id: line.item_id,
                        variant_id,
                    })?,
            ),
            None => None,
        };
        lines.push(ReservationLineDetails {
            item_name: item.name,
            unit_price: variant.as_ref().and_then(|v| v.price).unwrap_or(item.price),
            variant_size: variant.map(|v| v.size),
            line,
        });
    }

    let email_has_other_active = email_shared_with_active(conn, &student).await?;
    Ok(ReservationDetails {
        reservation,
        student,
        lines,
        email_has_other_active,
    })
}

/// Whether any other student on file with this student's email holds a
/// Pending or Approved reservation.
async fn email_shared_with_active<C>(conn: &C, holder: &student_entity::Model) -> Result<bool>
where
    C: ConnectionTrait,
{
    let Some(email) = holder.email.as_deref() else {
        return Ok(false);
    };
    let others: Vec<i64> = student_entity::Entity::find()
        .filter(student_entity::Column::Email.eq(email))
        .filter(student_entity::Column::Id.ne(holder.id))
        .all(conn)
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();
    if others.is_empty() {
        return Ok(false);
    }
    let active = Reservation::find()
        .filter(reservation::Column::StudentId.is_in(others))
        .filter(reservation::Column::Status.is_in(ReservationStatus::ACTIVE))
        .count(conn)
        .await?;
    Ok(active > 0)
}

/// Sends a reservation email after commit. Students without an address are
/// skipped; delivery problems are logged by [`notify::deliver`].
pub(crate) async fn notify_student(
    ctx: &StoreContext,
    kind: NoticeKind,
    details: &ReservationDetails,
    deadline: Option<DateTime<Utc>>,
) -> bool {
    let Some(email) = details.student.email.as_deref() else {
        debug!(%kind, code = %details.reservation.code, "No email on file, skipping notification");
        return false;
    };
    notify::deliver(
        ctx.notifier.as_ref(),
        kind,
        email,
        &details.notice(deadline),
        ctx.policy.notification_timeout,
    )
    .await
}

/// Creates a Pending reservation and holds its stock.
///
/// # Errors
/// - `Validation` for a missing name or student number, no lines, a
///   non-positive quantity, or a merged quantity above the per-item cap
/// - `DuplicateActiveReservation` if the student already holds a Pending or
///   Approved reservation
/// - Any ledger error for a line (`ItemNotFound`, `VariantNotFound`,
///   `ItemUnavailable`, `InsufficientStock`, `ReservationFloorViolation`);
///   nothing is kept in that case
#[instrument(skip(ctx, request), fields(student_number = ?request.student_number, lines = request.lines.len()))]
pub async fn create_reservation(
    ctx: &StoreContext,
    request: NewReservation,
) -> Result<reservation::Model> {
    let lines = validate_request(&request, ctx.policy.max_quantity_per_item)?;
    let student_number = request.student_number.as_deref().unwrap_or_default();
    let now = ctx.now();

    let txn = ctx.db.begin().await?;
    let student = student::resolve_or_create(
        &txn,
        &request.student_name,
        request.student_email.as_deref(),
        student_number,
    )
    .await?;

    if let Some(active) = active_reservation_for_student(&txn, student.id).await? {
        return Err(Error::DuplicateActiveReservation { code: active.code });
    }

    let code = unique_reservation_code(&txn).await?;
    let cancel_window_expires = ctx.policy.cancel_deadline(now);
    let inserted = reservation::ActiveModel {
        code: Set(code.clone()),
        student_id: Set(student.id),
        status: Set(ReservationStatus::Pending),
        created_at: Set(now),
        cancel_window_expires: Set(cancel_window_expires),
        claim_deadline: Set(Some(ctx.policy.claim_deadline(cancel_window_expires))),
        claim_notified_at: Set(None),
        ..Default::default()
    }
    .insert(&txn)
    .await;

    let reservation = match inserted {
        Ok(reservation) => reservation,
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            // The partial unique index caught a concurrent reservation.
            return match active_reservation_for_student(&txn, student.id).await? {
                Some(active) => Err(Error::DuplicateActiveReservation { code: active.code }),
                None => Err(e.into()),
            };
        }
        Err(e) => return Err(e.into()),
    };

    for line in &lines {
        ledger::reserve(
            &txn,
            *line,
            Purpose::Reservation,
            Provenance::reservation(now, reservation.id, format!("Reserved for {code}")),
        )
        .await?;

        reservation_item::ActiveModel {
            reservation_id: Set(reservation.id),
            item_id: Set(line.item_id),
            variant_id: Set(line.variant_id),
            quantity: Set(line.quantity),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }

    let details = load_details(&txn, reservation.clone()).await?;
    txn.commit().await?;

    info!(code = %reservation.code, student_id = student.id, lines = lines.len(), "Reservation created");
    notify_student(
        ctx,
        NoticeKind::Created,
        &details,
        Some(reservation.cancel_window_expires),
    )
    .await;
    Ok(reservation)
}

/// Cancels a Pending reservation and returns its stock.
///
/// Students may cancel only until the cancellation window closes; admins
/// may cancel a Pending reservation at any time.
///
/// # Errors
/// - `ReservationNotFound` for an unknown code
/// - `WindowExpired` if a non-admin cancels after the window
/// - `InvalidTransition` if the reservation is no longer Pending
#[instrument(skip(ctx))]
pub async fn cancel_reservation(
    ctx: &StoreContext,
    code: &str,
    acting_as_admin: bool,
) -> Result<reservation::Model> {
    let now = ctx.now();
    let txn = ctx.db.begin().await?;
    let reservation = find_by_code(&txn, code).await?;

    if !acting_as_admin && now > reservation.cancel_window_expires {
        return Err(Error::WindowExpired {
            code: reservation.code,
            expired_at: reservation.cancel_window_expires,
        });
    }
    if reservation.status != ReservationStatus::Pending {
        return Err(Error::InvalidTransition {
            code: reservation.code,
            status: reservation.status,
            action: "cancel",
        });
    }

    transition(
        &txn,
        &reservation,
        &[ReservationStatus::Pending],
        ReservationStatus::Canceled,
        "cancel",
    )
    .await?;
    let reference = if acting_as_admin {
        format!("Canceled {} by admin", reservation.code)
    } else {
        format!("Canceled {}", reservation.code)
    };
    release_lines(&txn, &reservation, now, &reference).await?;

    let canceled = find_by_code(&txn, &reservation.code).await?;
    let details = load_details(&txn, canceled.clone()).await?;
    txn.commit().await?;

    info!(code = %canceled.code, admin = acting_as_admin, "Reservation canceled");
    notify_student(ctx, NoticeKind::Canceled, &details, None).await;
    Ok(canceled)
}

/// A reservation with its student and lines.
///
/// # Errors
/// Returns `ReservationNotFound` for an unknown code.
pub async fn get_reservation(ctx: &StoreContext, code: &str) -> Result<ReservationDetails> {
    let reservation = find_by_code(&ctx.db, code).await?;
    load_details(&ctx.db, reservation).await
}

/// Reservations matching the filter, newest first.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn list_reservations(
    ctx: &StoreContext,
    filter: ReservationFilter,
) -> Result<Vec<reservation::Model>> {
    let mut query = Reservation::find();
    if let Some(status) = filter.status {
        query = query.filter(reservation::Column::Status.eq(status));
    }
    if let Some(student_id) = filter.student_id {
        query = query.filter(reservation::Column::StudentId.eq(student_id));
    }
    query
        .order_by_desc(reservation::Column::CreatedAt)
        .order_by_desc(reservation::Column::Id)
        .all(&ctx.db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        core::context::ReservationPolicy,
        entities::TransactionType,
        test_utils::*,
    };
    use chrono::Duration;
    use std::sync::Arc;

    #[test]
    fn test_generate_code_format() {
        let code = generate_code(RESERVATION_CODE_PREFIX);
        assert_eq!(code.len(), 12);
        assert!(code.starts_with("RES-"));
        assert!(
            code[4..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_merge_lines_sums_duplicates() {
        let merged = merge_lines(&[
            StockLine::item(1, 2),
            StockLine::variant(1, 7, 1),
            StockLine::item(1, 3),
        ]);
        assert_eq!(merged, vec![StockLine::item(1, 5), StockLine::variant(1, 7, 1)]);
    }

    #[test]
    fn test_validate_request() {
        let ok = reservation_request("Ana", "2024-0001", &[(1, 2)]);
        assert!(validate_request(&ok, 5).is_ok());

        let mut no_number = ok.clone();
        no_number.student_number = None;
        assert!(matches!(validate_request(&no_number, 5), Err(Error::Validation { .. })));

        let mut no_name = ok.clone();
        no_name.student_name = "  ".to_string();
        assert!(matches!(validate_request(&no_name, 5), Err(Error::Validation { .. })));

        let empty = reservation_request("Ana", "2024-0001", &[]);
        assert!(matches!(validate_request(&empty, 5), Err(Error::Validation { .. })));

        let zero = reservation_request("Ana", "2024-0001", &[(1, 0)]);
        assert!(matches!(validate_request(&zero, 5), Err(Error::Validation { .. })));

        // 3 + 3 of the same item exceeds the cap once merged
        let split = reservation_request("Ana", "2024-0001", &[(1, 3), (1, 3)]);
        assert!(matches!(validate_request(&split, 5), Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_create_reservation_holds_stock() -> Result<()> {
        let t = setup_test_context().await?;
        let mug = create_test_item(&t.ctx.db, "Mug", 10).await?;
        let start = t.ctx.now();

        let reservation = create_reservation(
            &t.ctx,
            reservation_request("Ana Cruz", "2024-0001", &[(mug.id, 2)]),
        )
        .await?;

        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert!(reservation.code.starts_with("RES-"));
        assert_eq!(reservation.created_at, start);
        assert_eq!(reservation.cancel_window_expires, start + Duration::minutes(10));
        assert_eq!(
            reservation.claim_deadline,
            Some(start + Duration::minutes(10) + Duration::hours(24))
        );
        assert_eq!(ledger::current_stock(&t.ctx.db, mug.id, None).await?, 8);

        let sent = t.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NoticeKind::Created);
        assert_eq!(sent[0].to, "2024-0001@students.example");
        assert_eq!(sent[0].notice.code, reservation.code);
        assert_eq!(sent[0].notice.items[0].product_name, "Mug");
        Ok(())
    }

    #[tokio::test]
    async fn test_one_active_reservation_per_student() -> Result<()> {
        let t = setup_test_context().await?;
        let mug = create_test_item(&t.ctx.db, "Mug", 10).await?;

        let first = create_reservation(
            &t.ctx,
            reservation_request("Ana", "2024-0001", &[(mug.id, 1)]),
        )
        .await?;
        let second = create_reservation(
            &t.ctx,
            reservation_request("Ana", "2024-0001", &[(mug.id, 1)]),
        )
        .await;
        match second {
            Err(Error::DuplicateActiveReservation { code }) => assert_eq!(code, first.code),
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(ledger::current_stock(&t.ctx.db, mug.id, None).await?, 9);

        cancel_reservation(&t.ctx, &first.code, false).await?;
        let third = create_reservation(
            &t.ctx,
            reservation_request("Ana", "2024-0001", &[(mug.id, 1)]),
        )
        .await?;
        assert_ne!(third.code, first.code);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_line_rolls_back_everything() -> Result<()> {
        let t = setup_test_context().await?;
        let mug = create_test_item(&t.ctx.db, "Mug", 10).await?;
        let pin = create_test_item(&t.ctx.db, "Pin", 1).await?;

        let result = create_reservation(
            &t.ctx,
            reservation_request("Ana", "2024-0001", &[(mug.id, 2), (pin.id, 3)]),
        )
        .await;
        assert!(matches!(result, Err(Error::InsufficientStock { .. })));

        assert_eq!(ledger::current_stock(&t.ctx.db, mug.id, None).await?, 10);
        assert_eq!(Reservation::find().count(&t.ctx.db).await?, 0);
        assert_eq!(ReservationItem::find().count(&t.ctx.db).await?, 0);
        assert!(
            ledger::transactions_for_item(&t.ctx.db, mug.id)
                .await?
                .iter()
                .all(|row| row.transaction_type == TransactionType::Add)
        );
        assert!(t.notifier.sent().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_floor_blocks_reservation() -> Result<()> {
        let t = setup_test_context().await?;
        let shirt = create_custom_item(&t.ctx.db, "Shirt", 300.0, 5, Some(2)).await?;

        create_reservation(
            &t.ctx,
            reservation_request("Ana", "2024-0001", &[(shirt.id, 3)]),
        )
        .await?;
        let result = create_reservation(
            &t.ctx,
            reservation_request("Ben", "2024-0002", &[(shirt.id, 1)]),
        )
        .await;
        assert!(matches!(result, Err(Error::ReservationFloorViolation { floor: 2, .. })));
        assert_eq!(ledger::current_stock(&t.ctx.db, shirt.id, None).await?, 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_oversell_under_concurrency() -> Result<()> {
        let t = setup_test_context().await?;
        let cap = create_custom_item(&t.ctx.db, "Cap", 250.0, 6, Some(2)).await?;

        let mut handles = Vec::new();
        for n in 0..12 {
            let ctx = t.ctx.clone();
            let item_id = cap.id;
            handles.push(tokio::spawn(async move {
                create_reservation(
                    &ctx,
                    reservation_request(&format!("Student {n}"), &format!("2024-1{n:03}"), &[(item_id, 1)]),
                )
                .await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(Error::InsufficientStock { .. } | Error::ReservationFloorViolation { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(succeeded, 4);
        assert_eq!(ledger::current_stock(&t.ctx.db, cap.id, None).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_with_balanced_rows() -> Result<()> {
        let t = setup_test_context().await?;
        let hoodie = create_test_item(&t.ctx.db, "Hoodie", 4).await?;
        let medium = create_test_variant(&t.ctx.db, hoodie.id, "M", 5).await?;

        let reservation = create_reservation(
            &t.ctx,
            NewReservation {
                lines: vec![StockLine::item(hoodie.id, 1), StockLine::variant(hoodie.id, medium.id, 2)],
                ..reservation_request("Ana", "2024-0001", &[])
            },
        )
        .await?;
        assert_eq!(ledger::current_stock(&t.ctx.db, hoodie.id, Some(medium.id)).await?, 3);

        t.clock.advance(Duration::minutes(5));
        let canceled = cancel_reservation(&t.ctx, &reservation.code, false).await?;
        assert_eq!(canceled.status, ReservationStatus::Canceled);

        assert_eq!(ledger::current_stock(&t.ctx.db, hoodie.id, None).await?, 4);
        assert_eq!(ledger::current_stock(&t.ctx.db, hoodie.id, Some(medium.id)).await?, 5);

        let rows = ledger::transactions_for_reservation(&t.ctx.db, reservation.id).await?;
        assert_eq!(rows.len(), 4);
        assert_eq!(rows.iter().map(|r| r.quantity_change).sum::<i32>(), 0);
        assert_eq!(
            rows.iter()
                .filter(|r| r.transaction_type == TransactionType::Release)
                .count(),
            2
        );

        let kinds: Vec<_> = t.notifier.sent().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![NoticeKind::Created, NoticeKind::Canceled]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_window_applies_to_students_only() -> Result<()> {
        let t = setup_test_context().await?;
        let mug = create_test_item(&t.ctx.db, "Mug", 10).await?;
        let reservation = create_reservation(
            &t.ctx,
            reservation_request("Ana", "2024-0001", &[(mug.id, 2)]),
        )
        .await?;

        t.clock.advance(Duration::minutes(11));
        let result = cancel_reservation(&t.ctx, &reservation.code, false).await;
        assert!(matches!(result, Err(Error::WindowExpired { .. })));
        assert_eq!(ledger::current_stock(&t.ctx.db, mug.id, None).await?, 8);

        cancel_reservation(&t.ctx, &reservation.code, true).await?;
        assert_eq!(ledger::current_stock(&t.ctx.db, mug.id, None).await?, 10);

        let again = cancel_reservation(&t.ctx, &reservation.code, true).await;
        assert!(matches!(
            again,
            Err(Error::InvalidTransition {
                status: ReservationStatus::Canceled,
                ..
            })
        ));
        assert_eq!(ledger::current_stock(&t.ctx.db, mug.id, None).await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_unknown_code() -> Result<()> {
        let t = setup_test_context().await?;
        let result = cancel_reservation(&t.ctx, "RES-NOPE0000", true).await;
        assert!(matches!(result, Err(Error::ReservationNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_fail_reservation() -> Result<()> {
        let t = setup_test_context().await?;
        let mug = create_test_item(&t.ctx.db, "Mug", 10).await?;
        let ctx = t.ctx.clone().with_notifier(Arc::new(FailingNotifier));

        let reservation = create_reservation(
            &ctx,
            reservation_request("Ana", "2024-0001", &[(mug.id, 1)]),
        )
        .await?;
        assert_eq!(find_by_code(&ctx.db, &reservation.code).await?.id, reservation.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_hanging_notifier_is_cut_off() -> Result<()> {
        let t = setup_test_context().await?;
        let mug = create_test_item(&t.ctx.db, "Mug", 10).await?;
        let ctx = t
            .ctx
            .clone()
            .with_notifier(Arc::new(HangingNotifier))
            .with_policy(ReservationPolicy {
                notification_timeout: std::time::Duration::from_millis(50),
                ..ReservationPolicy::default()
            });

        create_reservation(&ctx, reservation_request("Ana", "2024-0001", &[(mug.id, 1)])).await?;
        assert_eq!(ledger::current_stock(&ctx.db, mug.id, None).await?, 9);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_email_means_no_notification() -> Result<()> {
        let t = setup_test_context().await?;
        let mug = create_test_item(&t.ctx.db, "Mug", 10).await?;

        create_reservation(
            &t.ctx,
            NewReservation {
                student_email: None,
                ..reservation_request("Ana", "2024-0001", &[(mug.id, 1)])
            },
        )
        .await?;
        assert!(t.notifier.sent().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_get_and_list_reservations() -> Result<()> {
        let t = setup_test_context().await?;
        let hoodie = create_custom_item(&t.ctx.db, "Hoodie", 800.0, 0, None).await?;
        let large = create_custom_variant(&t.ctx.db, hoodie.id, "L", Some(850.0), 5).await?;
        let mug = create_custom_item(&t.ctx.db, "Mug", 150.0, 10, None).await?;

        let first = create_reservation(
            &t.ctx,
            NewReservation {
                lines: vec![StockLine::variant(hoodie.id, large.id, 1), StockLine::item(mug.id, 2)],
                ..reservation_request("Ana", "2024-0001", &[])
            },
        )
        .await?;
        t.clock.advance(Duration::minutes(1));
        let second = create_reservation(
            &t.ctx,
            reservation_request("Ben", "2024-0002", &[(mug.id, 1)]),
        )
        .await?;
        cancel_reservation(&t.ctx, &second.code, false).await?;

        let details = get_reservation(&t.ctx, &first.code).await?;
        assert_eq!(details.student.full_name, "Ana");
        assert_eq!(details.lines.len(), 2);
        assert_eq!(details.lines[0].variant_size.as_deref(), Some("L"));
        assert!((details.lines[0].unit_price - 850.0).abs() < f64::EPSILON);
        assert!((details.total() - 1150.0).abs() < f64::EPSILON);

        let all = list_reservations(&t.ctx, ReservationFilter::default()).await?;
        assert_eq!(
            all.iter().map(|r| r.code.as_str()).collect::<Vec<_>>(),
            vec![second.code.as_str(), first.code.as_str()]
        );

        let pending = list_reservations(
            &t.ctx,
            ReservationFilter {
                status: Some(ReservationStatus::Pending),
                student_id: None,
            },
        )
        .await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);

        let bens = list_reservations(
            &t.ctx,
            ReservationFilter {
                status: None,
                student_id: Some(second.student_id),
            },
        )
        .await?;
        assert_eq!(bens.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_flags_email_shared_with_other_active_reservation() -> Result<()> {
        let t = setup_test_context().await?;
        let mug = create_test_item(&t.ctx.db, "Mug", 10).await?;
        let shared = |name: &str, number: &str| NewReservation {
            student_email: Some("family@example.com".to_string()),
            ..reservation_request(name, number, &[(mug.id, 1)])
        };

        let first = create_reservation(&t.ctx, shared("Ben", "2024-0002")).await?;
        assert!(!get_reservation(&t.ctx, &first.code).await?.email_has_other_active);

        let second = create_reservation(&t.ctx, shared("Bea", "2024-0003")).await?;
        assert!(get_reservation(&t.ctx, &first.code).await?.email_has_other_active);
        assert!(get_reservation(&t.ctx, &second.code).await?.email_has_other_active);

        let own = create_reservation(
            &t.ctx,
            reservation_request("Cy", "2024-0004", &[(mug.id, 1)]),
        )
        .await?;
        assert!(!get_reservation(&t.ctx, &own.code).await?.email_has_other_active);

        cancel_reservation(&t.ctx, &second.code, false).await?;
        assert!(!get_reservation(&t.ctx, &first.code).await?.email_has_other_active);
        Ok(())
    }
}
