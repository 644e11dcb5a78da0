//! Purchase and payment flow.
//!
//! A purchase is either made from a reservation (whose stock is already held)
//! or rung up on-site (stock is taken as a direct sale). Either way it gets a
//! single payment that starts Pending; staff then confirm or reject it.
//! Confirming completes the sale, rejecting returns the stock.

use crate::{
    core::{
        context::StoreContext,
        ledger::{self, Provenance, Purpose, StockLine},
        reservation::{self as reservations, generate_code, merge_lines},
        student,
    },
    entities::{
        Item, ItemVariant, Payment, PaymentStatus, Purchase, PurchaseItem, PurchaseType,
        Reservation, ReservationStatus, payment, purchase, purchase_item, reservation,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument, warn};

/// Prefix of every payment reference.
pub const PAYMENT_REF_PREFIX: &str = "PAY-";

const REF_ATTEMPTS: usize = 5;

/// A purchase with its lines and its payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    /// The purchase
    pub purchase: purchase::Model,
    /// Priced lines
    pub items: Vec<purchase_item::Model>,
    /// The payment settling it
    pub payment: payment::Model,
}

/// A pending payment as listed for staff review.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPaymentView {
    /// The payment
    pub payment: payment::Model,
    /// Reservation pickup or walk-in sale
    pub purchase_type: PurchaseType,
    /// Holder of the reservation; `None` for walk-in sales
    pub student_name: Option<String>,
}

/// A purchased line with its display name.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLine {
    /// Item name
    pub item_name: String,
    /// Variant size label
    pub variant_size: Option<String>,
    /// Units
    pub quantity: i32,
    /// Price charged per unit
    pub unit_price: f64,
}

/// Everything staff see before settling a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    /// The payment
    pub payment: payment::Model,
    /// Reservation pickup or walk-in sale
    pub purchase_type: PurchaseType,
    /// Holder of the reservation; `None` for walk-in sales
    pub student_name: Option<String>,
    /// Purchased lines in entry order
    pub items: Vec<PaymentLine>,
}

async fn unique_payment_ref<C>(conn: &C) -> Result<String>
where
    C: ConnectionTrait,
{
    for _ in 0..REF_ATTEMPTS {
        let candidate = generate_code(PAYMENT_REF_PREFIX);
        let taken = Payment::find()
            .filter(payment::Column::PaymentRef.eq(&candidate))
            .count(conn)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    Err(Error::Database(DbErr::Custom(
        "could not generate a unique payment reference".to_string(),
    )))
}

/// Current unit price of an item or variant: the variant override, else the item price.
async fn unit_price<C>(conn: &C, item_id: i64, variant_id: Option<i64>) -> Result<f64>
where
    C: ConnectionTrait,
{
    let item = Item::find_by_id(item_id)
        .one(conn)
        .await?
        .ok_or(Error::ItemNotFound { item_id })?;
    let Some(variant_id) = variant_id else {
        return Ok(item.price);
    };
    let variant = ItemVariant::find_by_id(variant_id)
        .one(conn)
        .await?
        .filter(|v| v.item_id == item_id)
        .ok_or(Error::VariantNotFound {
            item_id,
            variant_id,
        })?;
    Ok(variant.price.unwrap_or(item.price))
}

async fn insert_purchase<C>(
    conn: &C,
    reservation_id: Option<i64>,
    purchase_type: PurchaseType,
    at: DateTime<Utc>,
    priced: &[(StockLine, f64)],
) -> Result<(purchase::Model, Vec<purchase_item::Model>, payment::Model)>
where
    C: ConnectionTrait,
{
    let total: f64 = priced
        .iter()
        .map(|(line, price)| f64::from(line.quantity) * price)
        .sum();

    let purchase = purchase::ActiveModel {
        reservation_id: Set(reservation_id),
        purchase_type: Set(purchase_type),
        date_purchased: Set(at),
        total_amount: Set(total),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(priced.len());
    for (line, price) in priced {
        let item = purchase_item::ActiveModel {
            purchase_id: Set(purchase.id),
            item_id: Set(line.item_id),
            variant_id: Set(line.variant_id),
            quantity: Set(line.quantity),
            unit_price: Set(*price),
            ..Default::default()
        }
        .insert(conn)
        .await?;
        items.push(item);
    }

    let payment = payment::ActiveModel {
        purchase_id: Set(purchase.id),
        payment_ref: Set(unique_payment_ref(conn).await?),
        amount_paid: Set(total),
        status: Set(PaymentStatus::Pending),
        payment_date: Set(at),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    Ok((purchase, items, payment))
}

/// Turns a Pending reservation into a purchase awaiting payment. The
/// reservation becomes Approved; its held stock stays held.
///
/// # Errors
/// - `ReservationNotFound` for an unknown code
/// - `InvalidTransition` if the reservation is not Pending
#[instrument(skip(ctx))]
pub async fn create_purchase_from_reservation(
    ctx: &StoreContext,
    code: &str,
) -> Result<PurchaseReceipt> {
    let now = ctx.now();
    let txn = ctx.db.begin().await?;
    let reservation = reservations::find_by_code(&txn, code).await?;
    if reservation.status != ReservationStatus::Pending {
        return Err(Error::InvalidTransition {
            code: reservation.code,
            status: reservation.status,
            action: "approve",
        });
    }
    reservations::transition(
        &txn,
        &reservation,
        &[ReservationStatus::Pending],
        ReservationStatus::Approved,
        "approve",
    )
    .await?;

    let details = reservations::load_details(&txn, reservation.clone()).await?;
    let priced: Vec<(StockLine, f64)> = details
        .lines
        .iter()
        .map(|l| {
            (
                StockLine {
                    item_id: l.line.item_id,
                    variant_id: l.line.variant_id,
                    quantity: l.line.quantity,
                },
                l.unit_price,
            )
        })
        .collect();

    let (purchase, items, payment) = insert_purchase(
        &txn,
        Some(reservation.id),
        PurchaseType::Reservation,
        now,
        &priced,
    )
    .await?;
    ledger::link_reservation_to_payment(&txn, reservation.id, payment.id).await?;
    txn.commit().await?;

    info!(code = %reservation.code, payment_ref = %payment.payment_ref, total = purchase.total_amount, "Reservation approved");
    Ok(PurchaseReceipt {
        purchase,
        items,
        payment,
    })
}

/// Rings up a walk-in sale. Stock is taken immediately and may go below the
/// reservation floor.
///
/// # Errors
/// - `Validation` for no lines or a non-positive quantity
/// - Any ledger error for a line; nothing is kept in that case
#[instrument(skip(ctx, lines), fields(lines = lines.len()))]
pub async fn record_onsite_sale(
    ctx: &StoreContext,
    lines: Vec<StockLine>,
    admin_id: Option<i64>,
) -> Result<PurchaseReceipt> {
    if lines.is_empty() {
        return Err(Error::Validation {
            message: "A sale needs at least one item".to_string(),
        });
    }
    if let Some(bad) = lines.iter().find(|l| l.quantity <= 0) {
        return Err(Error::Validation {
            message: format!(
                "Quantity for item {} must be positive, got {}",
                bad.item_id, bad.quantity
            ),
        });
    }
    let lines = merge_lines(&lines);

    let now = ctx.now();
    let txn = ctx.db.begin().await?;
    let mut priced = Vec::with_capacity(lines.len());
    for line in &lines {
        priced.push((*line, unit_price(&txn, line.item_id, line.variant_id).await?));
    }

    let (purchase, items, payment) =
        insert_purchase(&txn, None, PurchaseType::Onsite, now, &priced).await?;

    for line in &lines {
        let mut provenance =
            Provenance::payment(now, payment.id, format!("On-site sale {}", payment.payment_ref));
        provenance.admin_id = admin_id;
        ledger::reserve(&txn, *line, Purpose::Sale, provenance).await?;
    }
    txn.commit().await?;

    info!(payment_ref = %payment.payment_ref, total = purchase.total_amount, "On-site sale recorded");
    Ok(PurchaseReceipt {
        purchase,
        items,
        payment,
    })
}

async fn load_pending_payment<C>(conn: &C, payment_id: i64) -> Result<payment::Model>
where
    C: ConnectionTrait,
{
    let payment = Payment::find_by_id(payment_id)
        .one(conn)
        .await?
        .ok_or(Error::PaymentNotFound { payment_id })?;
    if payment.status != PaymentStatus::Pending {
        return Err(Error::PaymentAlreadySettled { payment_id });
    }
    Ok(payment)
}

/// Moves a Pending payment to `to`; a payment settled in the meantime yields
/// `PaymentAlreadySettled`.
async fn settle<C>(conn: &C, payment_id: i64, to: PaymentStatus) -> Result<()>
where
    C: ConnectionTrait,
{
    let result = Payment::update_many()
        .col_expr(payment::Column::Status, Expr::value(to))
        .filter(payment::Column::Id.eq(payment_id))
        .filter(payment::Column::Status.eq(PaymentStatus::Pending))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::PaymentAlreadySettled { payment_id });
    }
    Ok(())
}

async fn reservation_of<C>(conn: &C, purchase: &purchase::Model) -> Result<Option<reservation::Model>>
where
    C: ConnectionTrait,
{
    match purchase.reservation_id {
        Some(id) => Reservation::find_by_id(id).one(conn).await.map_err(Into::into),
        None => Ok(None),
    }
}

async fn purchase_of<C>(conn: &C, payment: &payment::Model) -> Result<purchase::Model>
where
    C: ConnectionTrait,
{
    Purchase::find_by_id(payment.purchase_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            Error::Database(DbErr::RecordNotFound(format!(
                "purchase {} of payment {}",
                payment.purchase_id, payment.id
            )))
        })
}

/// Confirms a Pending payment. A reservation purchase completes its
/// reservation (Approved to Claimed); the held stock stays consumed.
///
/// # Errors
/// - `PaymentNotFound` for an unknown id
/// - `PaymentAlreadySettled` if the payment is not Pending
/// - `InvalidTransition` if the linked reservation is not Approved
#[instrument(skip(ctx))]
pub async fn confirm_payment(ctx: &StoreContext, payment_id: i64) -> Result<payment::Model> {
    let txn = ctx.db.begin().await?;
    let payment = load_pending_payment(&txn, payment_id).await?;
    let purchase = purchase_of(&txn, &payment).await?;

    settle(&txn, payment_id, PaymentStatus::Confirmed).await?;
    if let Some(reservation) = reservation_of(&txn, &purchase).await? {
        reservations::transition(
            &txn,
            &reservation,
            &[ReservationStatus::Approved],
            ReservationStatus::Claimed,
            "claim",
        )
        .await?;
    }
    ledger::annotate_payment_rows(&txn, payment_id, "payment confirmed").await?;

    let confirmed = Payment::find_by_id(payment_id)
        .one(&txn)
        .await?
        .ok_or(Error::PaymentNotFound { payment_id })?;
    txn.commit().await?;

    info!(payment_ref = %confirmed.payment_ref, "Payment confirmed");
    Ok(confirmed)
}

/// Rejects a Pending payment and returns the stock of its purchase. A
/// reservation purchase cancels its reservation (Approved to Canceled).
///
/// # Errors
/// - `PaymentNotFound` for an unknown id
/// - `PaymentAlreadySettled` if the payment is not Pending
/// - `InvalidTransition` if the linked reservation is not Approved
#[instrument(skip(ctx))]
pub async fn reject_payment(ctx: &StoreContext, payment_id: i64) -> Result<payment::Model> {
    let now = ctx.now();
    let txn = ctx.db.begin().await?;
    let payment = load_pending_payment(&txn, payment_id).await?;
    let purchase = purchase_of(&txn, &payment).await?;

    settle(&txn, payment_id, PaymentStatus::Rejected).await?;
    ledger::annotate_payment_rows(&txn, payment_id, "payment rejected").await?;

    let reference = format!("Payment {} rejected", payment.payment_ref);
    match reservation_of(&txn, &purchase).await? {
        Some(reservation) => {
            reservations::transition(
                &txn,
                &reservation,
                &[ReservationStatus::Approved],
                ReservationStatus::Canceled,
                "reject",
            )
            .await?;
            reservations::release_lines(&txn, &reservation, now, &reference).await?;
        }
        None => {
            let lines = PurchaseItem::find()
                .filter(purchase_item::Column::PurchaseId.eq(purchase.id))
                .all(&txn)
                .await?;
            for line in lines {
                ledger::release(
                    &txn,
                    StockLine {
                        item_id: line.item_id,
                        variant_id: line.variant_id,
                        quantity: line.quantity,
                    },
                    Provenance::payment(now, payment_id, reference.clone()),
                )
                .await?;
            }
        }
    }

    let rejected = Payment::find_by_id(payment_id)
        .one(&txn)
        .await?
        .ok_or(Error::PaymentNotFound { payment_id })?;
    txn.commit().await?;

    warn!(payment_ref = %rejected.payment_ref, "Payment rejected, stock returned");
    Ok(rejected)
}

/// Marks every Pending payment of a reservation's purchases as Rejected.
/// Stock is not touched; the caller releases the reservation's lines.
pub(crate) async fn reject_pending_for_reservation<C>(conn: &C, reservation_id: i64) -> Result<u64>
where
    C: ConnectionTrait,
{
    let purchase_ids: Vec<i64> = Purchase::find()
        .filter(purchase::Column::ReservationId.eq(reservation_id))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    if purchase_ids.is_empty() {
        return Ok(0);
    }

    let pending = Payment::find()
        .filter(payment::Column::PurchaseId.is_in(purchase_ids))
        .filter(payment::Column::Status.eq(PaymentStatus::Pending))
        .all(conn)
        .await?;
    for payment in &pending {
        settle(conn, payment.id, PaymentStatus::Rejected).await?;
        ledger::annotate_payment_rows(conn, payment.id, "reservation expired").await?;
    }
    Ok(pending.len() as u64)
}

async fn student_name_of<C>(conn: &C, purchase: &purchase::Model) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    let Some(reservation) = reservation_of(conn, purchase).await? else {
        return Ok(None);
    };
    let holder = student::get_student(conn, reservation.student_id).await?;
    Ok(Some(holder.full_name))
}

/// Payments awaiting confirmation, oldest first, with the purchase type and
/// the student they belong to.
///
/// # Errors
/// Returns an error if the database query fails.
pub async fn pending_payments(ctx: &StoreContext) -> Result<Vec<PendingPaymentView>> {
    let payments = Payment::find()
        .filter(payment::Column::Status.eq(PaymentStatus::Pending))
        .order_by_asc(payment::Column::PaymentDate)
        .order_by_asc(payment::Column::Id)
        .all(&ctx.db)
        .await?;

    let mut views = Vec::with_capacity(payments.len());
    for payment in payments {
        let purchase = purchase_of(&ctx.db, &payment).await?;
        views.push(PendingPaymentView {
            student_name: student_name_of(&ctx.db, &purchase).await?,
            purchase_type: purchase.purchase_type,
            payment,
        });
    }
    Ok(views)
}

/// A payment in any status with its purchased lines.
///
/// # Errors
/// - `PaymentNotFound` for an unknown id
/// - `ItemNotFound` / `VariantNotFound` if a purchased line's catalog entry is gone
pub async fn payment_details(ctx: &StoreContext, payment_id: i64) -> Result<PaymentDetails> {
    let payment = Payment::find_by_id(payment_id)
        .one(&ctx.db)
        .await?
        .ok_or(Error::PaymentNotFound { payment_id })?;
    let purchase = purchase_of(&ctx.db, &payment).await?;

    let stored = PurchaseItem::find()
        .filter(purchase_item::Column::PurchaseId.eq(purchase.id))
        .order_by_asc(purchase_item::Column::Id)
        .all(&ctx.db)
        .await?;
    let mut items = Vec::with_capacity(stored.len());
    for line in stored {
        let item = Item::find_by_id(line.item_id)
            .one(&ctx.db)
            .await?
            .ok_or(Error::ItemNotFound {
                item_id: line.item_id,
            })?;
        let variant_size = match line.variant_id {
            Some(variant_id) => Some(
                ItemVariant::find_by_id(variant_id)
                    .one(&ctx.db)
                    .await?
                    .ok_or(Error::VariantNotFound {
                        item_id: line.item_id,
                        variant_id,
                    })?
                    .size,
            ),
            None => None,
        };
        items.push(PaymentLine {
            item_name: item.name,
            variant_size,
            quantity: line.quantity,
            unit_price: line.unit_price,
        });
    }

    Ok(PaymentDetails {
        student_name: student_name_of(&ctx.db, &purchase).await?,
        purchase_type: purchase.purchase_type,
        payment,
        items,
    })
}
