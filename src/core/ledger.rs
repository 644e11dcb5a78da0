//! Inventory ledger - The only code that writes stock counters.
//!
//! Every mutation is a single conditional `UPDATE` on the item or variant row
//! followed by exactly one appended `inventory_transactions` row, both issued
//! on the caller's connection so they commit or roll back with the caller's
//! database transaction. Stock can never go negative: the guard lives in the
//! `WHERE` clause, so two writers racing for the last unit cannot both win.

use crate::{
    core::system_config,
    entities::{
        InventoryTransaction, Item, ItemVariant, TransactionType, inventory_transaction, item,
        item_variant,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QueryOrder, Set, prelude::*, sea_query::Expr};
use tracing::{debug, instrument};

/// A quantity of one item, or one variant of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLine {
    /// Item whose counter is addressed
    pub item_id: i64,
    /// Variant whose counter is addressed instead of the item's
    pub variant_id: Option<i64>,
    /// Units to move, always positive
    pub quantity: i32,
}

impl StockLine {
    /// Line for the item's own counter
    #[must_use]
    pub const fn item(item_id: i64, quantity: i32) -> Self {
        Self {
            item_id,
            variant_id: None,
            quantity,
        }
    }

    /// Line for a variant's counter
    #[must_use]
    pub const fn variant(item_id: i64, variant_id: i64, quantity: i32) -> Self {
        Self {
            item_id,
            variant_id: Some(variant_id),
            quantity,
        }
    }
}

/// Why stock is being withdrawn. Reservations respect the walk-in floor,
/// direct sales may take the counter down to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Held for a student reservation
    Reservation,
    /// Sold over the counter
    Sale,
}

/// Who and what a ledger row is attributed to.
#[derive(Debug, Clone)]
pub struct Provenance {
    /// When the movement happened
    pub at: DateTime<Utc>,
    /// Human-readable reference stored on the row
    pub reference: String,
    /// Owning reservation
    pub reservation_id: Option<i64>,
    /// Settling payment
    pub payment_id: Option<i64>,
    /// Acting admin
    pub admin_id: Option<i64>,
}

impl Provenance {
    /// Movement made on behalf of a reservation
    #[must_use]
    pub fn reservation(at: DateTime<Utc>, reservation_id: i64, reference: String) -> Self {
        Self {
            at,
            reference,
            reservation_id: Some(reservation_id),
            payment_id: None,
            admin_id: None,
        }
    }

    /// Movement made on behalf of a payment
    #[must_use]
    pub fn payment(at: DateTime<Utc>, payment_id: i64, reference: String) -> Self {
        Self {
            at,
            reference,
            reservation_id: None,
            payment_id: Some(payment_id),
            admin_id: None,
        }
    }

    /// Movement made directly by staff
    #[must_use]
    pub fn admin(at: DateTime<Utc>, admin_id: Option<i64>, reference: String) -> Self {
        Self {
            at,
            reference,
            reservation_id: None,
            payment_id: None,
            admin_id,
        }
    }
}

/// A direct staff edit of a counter.
#[derive(Debug, Clone)]
pub struct Adjustment {
    /// Item whose counter is edited
    pub item_id: i64,
    /// Variant whose counter is edited instead
    pub variant_id: Option<i64>,
    /// Signed change; zero for pure markers such as Deactivate
    pub delta: i32,
    /// Tag stored on the ledger row
    pub kind: TransactionType,
    /// Attribution
    pub provenance: Provenance,
}

/// The counter a line resolves to.
#[derive(Debug, Clone)]
enum Counter {
    Item(item::Model),
    Variant(item::Model, item_variant::Model),
}

impl Counter {
    const fn item(&self) -> &item::Model {
        match self {
            Self::Item(item) | Self::Variant(item, _) => item,
        }
    }

    const fn stock(&self) -> i32 {
        match self {
            Self::Item(item) => item.stock_quantity,
            Self::Variant(_, variant) => variant.stock_quantity,
        }
    }

    const fn is_active(&self) -> bool {
        match self {
            Self::Item(item) => item.is_active,
            Self::Variant(item, variant) => item.is_active && variant.is_active,
        }
    }

    const fn variant_id(&self) -> Option<i64> {
        match self {
            Self::Item(_) => None,
            Self::Variant(_, variant) => Some(variant.id),
        }
    }
}

async fn load_counter<C>(conn: &C, item_id: i64, variant_id: Option<i64>) -> Result<Counter>
where
    C: ConnectionTrait,
{
    let item = Item::find_by_id(item_id)
        .one(conn)
        .await?
        .ok_or(Error::ItemNotFound { item_id })?;

    let Some(variant_id) = variant_id else {
        return Ok(Counter::Item(item));
    };

    let variant = ItemVariant::find_by_id(variant_id)
        .one(conn)
        .await?
        .filter(|v| v.item_id == item_id)
        .ok_or(Error::VariantNotFound {
            item_id,
            variant_id,
        })?;
    Ok(Counter::Variant(item, variant))
}

/// Adds `delta` to the counter, but only if the counter stays at or above
/// `minimum`. Returns false when the guard rejected the update.
async fn apply_guarded_delta<C>(conn: &C, counter: &Counter, delta: i32, minimum: i32) -> Result<bool>
where
    C: ConnectionTrait,
{
    // stock + delta >= minimum  <=>  stock >= minimum - delta
    let threshold = minimum.checked_sub(delta).ok_or_else(|| Error::Validation {
        message: format!("Stock change {delta} is out of range"),
    })?;
    let result = match counter {
        Counter::Item(item) => {
            Item::update_many()
                .col_expr(
                    item::Column::StockQuantity,
                    Expr::col(item::Column::StockQuantity).add(delta),
                )
                .filter(item::Column::Id.eq(item.id))
                .filter(item::Column::StockQuantity.gte(threshold))
                .exec(conn)
                .await?
        }
        Counter::Variant(_, variant) => {
            ItemVariant::update_many()
                .col_expr(
                    item_variant::Column::StockQuantity,
                    Expr::col(item_variant::Column::StockQuantity).add(delta),
                )
                .filter(item_variant::Column::Id.eq(variant.id))
                .filter(item_variant::Column::StockQuantity.gte(threshold))
                .exec(conn)
                .await?
        }
    };
    Ok(result.rows_affected == 1)
}

async fn append_row<C>(
    conn: &C,
    counter: &Counter,
    quantity_change: i32,
    kind: TransactionType,
    provenance: Provenance,
) -> Result<inventory_transaction::Model>
where
    C: ConnectionTrait,
{
    let row = inventory_transaction::ActiveModel {
        item_id: Set(counter.item().id),
        variant_id: Set(counter.variant_id()),
        quantity_change: Set(quantity_change),
        transaction_type: Set(kind),
        reference: Set(Some(provenance.reference)),
        created_at: Set(provenance.at),
        admin_id: Set(provenance.admin_id),
        reservation_id: Set(provenance.reservation_id),
        payment_id: Set(provenance.payment_id),
        ..Default::default()
    };
    row.insert(conn).await.map_err(Into::into)
}

fn ensure_positive(quantity: i32) -> Result<()> {
    if quantity <= 0 {
        return Err(Error::Validation {
            message: format!("Quantity must be positive, got {quantity}"),
        });
    }
    Ok(())
}

/// Resolves the walk-in floor for an item: the item's own override, else
/// the global `system_config` value, else [`system_config::DEFAULT_MIN_RESERVATION_STOCK`].
pub async fn resolve_floor<C>(conn: &C, item: &item::Model) -> Result<i32>
where
    C: ConnectionTrait,
{
    if let Some(floor) = item.min_reservation_stock {
        return Ok(floor);
    }
    Ok(system_config::get_min_reservation_stock(conn)
        .await?
        .unwrap_or(system_config::DEFAULT_MIN_RESERVATION_STOCK))
}

fn shortage(counter: &Counter, quantity: i32, floor: Option<i32>) -> Option<Error> {
    let available = counter.stock();
    let item_id = counter.item().id;
    let variant_id = counter.variant_id();
    if quantity > available {
        return Some(Error::InsufficientStock {
            item_id,
            variant_id,
            requested: quantity,
            available,
        });
    }
    match floor {
        Some(floor) if available - quantity < floor => Some(Error::ReservationFloorViolation {
            item_id,
            variant_id,
            requested: quantity,
            available,
            floor,
        }),
        _ => None,
    }
}

/// Decrements a counter that was last seen as `counter`. If another writer
/// moved it in between and the guard refuses, the error is classified
/// against a fresh read.
async fn withdraw<C>(conn: &C, counter: &Counter, quantity: i32, floor: Option<i32>) -> Result<()>
where
    C: ConnectionTrait,
{
    if apply_guarded_delta(conn, counter, -quantity, floor.unwrap_or(0)).await? {
        return Ok(());
    }
    let fresh = load_counter(conn, counter.item().id, counter.variant_id()).await?;
    Err(shortage(&fresh, quantity, floor).unwrap_or_else(|| Error::InsufficientStock {
        item_id: fresh.item().id,
        variant_id: fresh.variant_id(),
        requested: quantity,
        available: fresh.stock(),
    }))
}

/// Takes `line.quantity` units off the counter and records it.
///
/// # Errors
/// - `Validation` if the quantity is not positive
/// - `ItemNotFound` / `VariantNotFound` for unknown ids
/// - `ItemUnavailable` if the item or variant is deactivated
/// - `InsufficientStock` if fewer units are on hand than requested
/// - `ReservationFloorViolation` if a reservation would leave fewer units
///   than the walk-in floor
#[instrument(skip(conn, provenance), fields(reference = %provenance.reference))]
pub async fn reserve<C>(
    conn: &C,
    line: StockLine,
    purpose: Purpose,
    provenance: Provenance,
) -> Result<inventory_transaction::Model>
where
    C: ConnectionTrait,
{
    ensure_positive(line.quantity)?;
    let counter = load_counter(conn, line.item_id, line.variant_id).await?;
    if !counter.is_active() {
        return Err(Error::ItemUnavailable {
            item_id: line.item_id,
        });
    }

    let floor = match purpose {
        Purpose::Reservation => Some(resolve_floor(conn, counter.item()).await?),
        Purpose::Sale => None,
    };
    if let Some(err) = shortage(&counter, line.quantity, floor) {
        return Err(err);
    }

    withdraw(conn, &counter, line.quantity, floor).await?;

    let kind = match purpose {
        Purpose::Reservation => TransactionType::Reservation,
        Purpose::Sale => TransactionType::Sale,
    };
    debug!(item_id = line.item_id, variant_id = ?line.variant_id, quantity = line.quantity, ?kind, "Stock withdrawn");
    append_row(conn, &counter, -line.quantity, kind, provenance).await
}

/// Returns `line.quantity` units to the counter and records it.
///
/// When the provenance names a reservation, a second release of the same
/// reservation line is refused.
///
/// # Errors
/// - `Validation` if the quantity is not positive
/// - `ItemNotFound` / `VariantNotFound` for unknown ids
/// - `AlreadyReleased` if this reservation line was already returned
#[instrument(skip(conn, provenance), fields(reference = %provenance.reference))]
pub async fn release<C>(
    conn: &C,
    line: StockLine,
    provenance: Provenance,
) -> Result<inventory_transaction::Model>
where
    C: ConnectionTrait,
{
    ensure_positive(line.quantity)?;
    let counter = load_counter(conn, line.item_id, line.variant_id).await?;

    if let Some(reservation_id) = provenance.reservation_id {
        let variant_filter = line.variant_id.map_or_else(
            || inventory_transaction::Column::VariantId.is_null(),
            |id| inventory_transaction::Column::VariantId.eq(id),
        );
        let previous = InventoryTransaction::find()
            .filter(inventory_transaction::Column::ReservationId.eq(reservation_id))
            .filter(inventory_transaction::Column::ItemId.eq(line.item_id))
            .filter(variant_filter)
            .filter(inventory_transaction::Column::TransactionType.eq(TransactionType::Release))
            .count(conn)
            .await?;
        if previous > 0 {
            return Err(Error::AlreadyReleased {
                reservation_id,
                item_id: line.item_id,
            });
        }
    }

    apply_guarded_delta(conn, &counter, line.quantity, 0).await?;
    debug!(item_id = line.item_id, variant_id = ?line.variant_id, quantity = line.quantity, "Stock released");
    append_row(conn, &counter, line.quantity, TransactionType::Release, provenance).await
}

/// Applies a staff edit to a counter.
///
/// `Activate` and `Deactivate` also flip the item's (or variant's) active flag.
///
/// # Errors
/// - `ItemNotFound` / `VariantNotFound` for unknown ids
/// - `InsufficientStock` if the edit would take the counter below zero
/// - `Validation` if the delta cannot be applied without overflow
#[instrument(skip(conn, adjustment), fields(item_id = adjustment.item_id, delta = adjustment.delta))]
pub async fn adjust<C>(conn: &C, adjustment: Adjustment) -> Result<inventory_transaction::Model>
where
    C: ConnectionTrait,
{
    let counter = load_counter(conn, adjustment.item_id, adjustment.variant_id).await?;
    if counter.stock().checked_add(adjustment.delta).is_none() {
        return Err(Error::Validation {
            message: format!("Stock change {} is out of range", adjustment.delta),
        });
    }

    if adjustment.delta != 0
        && !apply_guarded_delta(conn, &counter, adjustment.delta, 0).await?
    {
        let fresh = load_counter(conn, adjustment.item_id, adjustment.variant_id).await?;
        return Err(Error::InsufficientStock {
            item_id: adjustment.item_id,
            variant_id: adjustment.variant_id,
            requested: adjustment.delta.saturating_neg(),
            available: fresh.stock(),
        });
    }

    let active = match adjustment.kind {
        TransactionType::Activate => Some(true),
        TransactionType::Deactivate => Some(false),
        _ => None,
    };
    if let Some(active) = active {
        match &counter {
            Counter::Item(item) => {
                let mut model: item::ActiveModel = item.clone().into();
                model.is_active = Set(active);
                model.update(conn).await?;
            }
            Counter::Variant(_, variant) => {
                let mut model: item_variant::ActiveModel = variant.clone().into();
                model.is_active = Set(active);
                model.update(conn).await?;
            }
        }
    }

    append_row(
        conn,
        &counter,
        adjustment.delta,
        adjustment.kind,
        adjustment.provenance,
    )
    .await
}

/// Current units on hand for an item or variant.
pub async fn current_stock<C>(conn: &C, item_id: i64, variant_id: Option<i64>) -> Result<i32>
where
    C: ConnectionTrait,
{
    Ok(load_counter(conn, item_id, variant_id).await?.stock())
}

/// Units a reservation could still take: stock above the walk-in floor.
pub async fn available_for_reservation<C>(
    conn: &C,
    item_id: i64,
    variant_id: Option<i64>,
) -> Result<i32>
where
    C: ConnectionTrait,
{
    let counter = load_counter(conn, item_id, variant_id).await?;
    let floor = resolve_floor(conn, counter.item()).await?;
    Ok((counter.stock() - floor).max(0))
}

/// Ledger rows of an item, newest first.
pub async fn transactions_for_item<C>(
    conn: &C,
    item_id: i64,
) -> Result<Vec<inventory_transaction::Model>>
where
    C: ConnectionTrait,
{
    InventoryTransaction::find()
        .filter(inventory_transaction::Column::ItemId.eq(item_id))
        .order_by_desc(inventory_transaction::Column::Id)
        .all(conn)
        .await
        .map_err(Into::into)
}

/// Ledger rows of a reservation, oldest first.
pub async fn transactions_for_reservation<C>(
    conn: &C,
    reservation_id: i64,
) -> Result<Vec<inventory_transaction::Model>>
where
    C: ConnectionTrait,
{
    InventoryTransaction::find()
        .filter(inventory_transaction::Column::ReservationId.eq(reservation_id))
        .order_by_asc(inventory_transaction::Column::Id)
        .all(conn)
        .await
        .map_err(Into::into)
}

/// Points a reservation's withdrawal rows at the payment that settles them.
pub async fn link_reservation_to_payment<C>(
    conn: &C,
    reservation_id: i64,
    payment_id: i64,
) -> Result<u64>
where
    C: ConnectionTrait,
{
    let result = InventoryTransaction::update_many()
        .col_expr(inventory_transaction::Column::PaymentId, Expr::value(payment_id))
        .filter(inventory_transaction::Column::ReservationId.eq(reservation_id))
        .filter(
            inventory_transaction::Column::TransactionType.eq(TransactionType::Reservation),
        )
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Appends `note` to the reference of every withdrawal row settled by the
/// payment. This is the only mutation ledger rows ever receive.
pub async fn annotate_payment_rows<C>(conn: &C, payment_id: i64, note: &str) -> Result<usize>
where
    C: ConnectionTrait,
{
    let rows = InventoryTransaction::find()
        .filter(inventory_transaction::Column::PaymentId.eq(payment_id))
        .filter(inventory_transaction::Column::QuantityChange.lt(0))
        .all(conn)
        .await?;
    let count = rows.len();
    for row in rows {
        let reference = row
            .reference
            .clone()
            .map_or_else(|| note.to_string(), |r| format!("{r} ({note})"));
        let mut model: inventory_transaction::ActiveModel = row.into();
        model.reference = Set(Some(reference));
        model.update(conn).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::TransactionTrait;

    fn note() -> Provenance {
        Provenance::admin(Utc::now(), None, "test".to_string())
    }

    /// Ledger rows for an item, minus the `Add` row booked at creation.
    async fn movements(
        db: &DatabaseConnection,
        item_id: i64,
    ) -> Result<Vec<inventory_transaction::Model>> {
        Ok(transactions_for_item(db, item_id)
            .await?
            .into_iter()
            .filter(|t| t.transaction_type != TransactionType::Add)
            .collect())
    }

    #[tokio::test]
    async fn test_reserve_rejects_non_positive_quantity() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Ruler", 4).await?;

        let result = reserve(&db, StockLine::item(item.id, 0), Purpose::Reservation, note()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        let result = release(&db, StockLine::item(item.id, -2), note()).await;
        assert!(matches!(result, Err(Error::Validation { .. })));

        assert_eq!(current_stock(&db, item.id, None).await?, 4);
        assert!(movements(&db, item.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reserve_unknown_item() -> Result<()> {
        let db = setup_test_db().await?;

        let result = reserve(&db, StockLine::item(42, 1), Purpose::Reservation, note()).await;
        assert!(matches!(result, Err(Error::ItemNotFound { item_id: 42 })));
        Ok(())
    }

    #[tokio::test]
    async fn test_floor_scenario() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_custom_item(&db, "Mug", 150.0, 5, Some(2)).await?;

        assert_eq!(available_for_reservation(&db, item.id, None).await?, 3);

        reserve(&db, StockLine::item(item.id, 3), Purpose::Reservation, note()).await?;
        assert_eq!(current_stock(&db, item.id, None).await?, 2);

        let result = reserve(&db, StockLine::item(item.id, 1), Purpose::Reservation, note()).await;
        assert!(matches!(
            result,
            Err(Error::ReservationFloorViolation {
                requested: 1,
                available: 2,
                floor: 2,
                ..
            })
        ));
        assert_eq!(current_stock(&db, item.id, None).await?, 2);

        release(&db, StockLine::item(item.id, 3), note()).await?;
        assert_eq!(current_stock(&db, item.id, None).await?, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_reported_not_clamped() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Lanyard", 2).await?;

        let result = reserve(&db, StockLine::item(item.id, 3), Purpose::Sale, note()).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            })
        ));
        assert_eq!(current_stock(&db, item.id, None).await?, 2);
        assert!(movements(&db, item.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_direct_sale_may_deplete_below_floor() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_custom_item(&db, "Pin", 20.0, 3, Some(2)).await?;

        reserve(&db, StockLine::item(item.id, 3), Purpose::Sale, note()).await?;
        assert_eq!(current_stock(&db, item.id, None).await?, 0);

        let rows = transactions_for_item(&db, item.id).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].transaction_type, TransactionType::Sale);
        assert_eq!(rows[0].quantity_change, -3);
        assert_eq!(rows[1].transaction_type, TransactionType::Add);
        Ok(())
    }

    #[tokio::test]
    async fn test_floor_falls_back_to_global_then_default() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Tote Bag", 10).await?;

        // setup_test_db stores a global floor of 0
        assert_eq!(resolve_floor(&db, &item).await?, 0);

        system_config::set_min_reservation_stock(&db, 4).await?;
        assert_eq!(resolve_floor(&db, &item).await?, 4);
        assert_eq!(available_for_reservation(&db, item.id, None).await?, 6);

        let fresh = crate::test_utils::setup_bare_db().await?;
        let other = create_test_item(&fresh, "Tote Bag", 10).await?;
        assert_eq!(
            resolve_floor(&fresh, &other).await?,
            system_config::DEFAULT_MIN_RESERVATION_STOCK
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_conservation_over_mixed_operations() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Cap", 20).await?;

        let reserved = [3, 1, 4, 2];
        let released = [1, 4];
        for q in reserved {
            reserve(&db, StockLine::item(item.id, q), Purpose::Reservation, note()).await?;
        }
        for q in released {
            release(&db, StockLine::item(item.id, q), note()).await?;
        }

        let expected = 20 - reserved.iter().sum::<i32>() + released.iter().sum::<i32>();
        assert_eq!(current_stock(&db, item.id, None).await?, expected);

        // The Add row booked at creation makes the ledger sum the whole count.
        let ledger_sum: i32 = transactions_for_item(&db, item.id)
            .await?
            .iter()
            .map(|t| t.quantity_change)
            .sum();
        assert_eq!(ledger_sum, expected);
        assert_eq!(movements(&db, item.id).await?.len(), reserved.len() + released.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_variant_counter_is_independent() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Hoodie", 7).await?;
        let variant = create_test_variant(&db, item.id, "M", 3).await?;

        reserve(
            &db,
            StockLine::variant(item.id, variant.id, 2),
            Purpose::Reservation,
            note(),
        )
        .await?;
        assert_eq!(current_stock(&db, item.id, Some(variant.id)).await?, 1);
        assert_eq!(current_stock(&db, item.id, None).await?, 7);

        let rows = transactions_for_item(&db, item.id).await?;
        assert_eq!(rows[0].variant_id, Some(variant.id));

        let result = reserve(
            &db,
            StockLine::variant(item.id + 1, variant.id, 1),
            Purpose::Reservation,
            note(),
        )
        .await;
        assert!(matches!(result, Err(Error::ItemNotFound { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_deactivated_item_cannot_be_reserved() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Old Shirt", 5).await?;

        adjust(
            &db,
            Adjustment {
                item_id: item.id,
                variant_id: None,
                delta: 0,
                kind: TransactionType::Deactivate,
                provenance: note(),
            },
        )
        .await?;

        let result = reserve(&db, StockLine::item(item.id, 1), Purpose::Sale, note()).await;
        assert!(matches!(result, Err(Error::ItemUnavailable { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_adjust_cannot_go_negative() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Sticker", 4).await?;

        let restock = adjust(
            &db,
            Adjustment {
                item_id: item.id,
                variant_id: None,
                delta: 6,
                kind: TransactionType::Restock,
                provenance: Provenance::admin(Utc::now(), Some(1), "Delivery".to_string()),
            },
        )
        .await?;
        assert_eq!(restock.admin_id, Some(1));
        assert_eq!(current_stock(&db, item.id, None).await?, 10);

        let result = adjust(
            &db,
            Adjustment {
                item_id: item.id,
                variant_id: None,
                delta: -11,
                kind: TransactionType::Edit,
                provenance: note(),
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InsufficientStock { available: 10, .. })));
        assert_eq!(current_stock(&db, item.id, None).await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_for_reservation_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Keychain", 10).await?;
        let (_, reservation) = create_test_reservation_row(&db, "2024-0001").await?;
        let provenance = || Provenance::reservation(Utc::now(), reservation.id, "r".to_string());

        reserve(&db, StockLine::item(item.id, 2), Purpose::Reservation, provenance()).await?;
        release(&db, StockLine::item(item.id, 2), provenance()).await?;

        let result = release(&db, StockLine::item(item.id, 2), provenance()).await;
        assert!(matches!(result, Err(Error::AlreadyReleased { .. })));
        assert_eq!(current_stock(&db, item.id, None).await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_rolled_back_transaction_leaves_no_trace() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Umbrella", 5).await?;

        {
            let txn = db.begin().await?;
            reserve(&txn, StockLine::item(item.id, 2), Purpose::Reservation, note()).await?;
            assert_eq!(current_stock(&txn, item.id, None).await?, 3);
            txn.rollback().await?;
        }

        assert_eq!(current_stock(&db, item.id, None).await?, 5);
        assert!(movements(&db, item.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_counter_is_classified_against_fresh_stock() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_custom_item(&db, "Water Bottle", 80.0, 6, Some(2)).await?;
        let stale = load_counter(&db, item.id, None).await?;
        assert_eq!(stale.stock(), 6);

        // Another writer takes three units after the counter was read.
        reserve(&db, StockLine::item(item.id, 3), Purpose::Sale, note()).await?;

        // The stale view still allows the withdrawal; the guard does not.
        assert!(shortage(&stale, 3, Some(2)).is_none());
        assert!(!apply_guarded_delta(&db, &stale, -3, 2).await?);

        let result = withdraw(&db, &stale, 3, Some(2)).await;
        assert!(matches!(
            result,
            Err(Error::ReservationFloorViolation {
                requested: 3,
                available: 3,
                floor: 2,
                ..
            })
        ));

        let result = withdraw(&db, &stale, 4, None).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            })
        ));

        assert_eq!(current_stock(&db, item.id, None).await?, 3);
        assert_eq!(movements(&db, item.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_adjust_rejects_out_of_range_delta() -> Result<()> {
        let db = setup_test_db().await?;
        let item = create_test_item(&db, "Badge", 4).await?;

        for delta in [i32::MIN, i32::MAX] {
            let result = adjust(
                &db,
                Adjustment {
                    item_id: item.id,
                    variant_id: None,
                    delta,
                    kind: TransactionType::Edit,
                    provenance: note(),
                },
            )
            .await;
            assert!(matches!(result, Err(Error::Validation { .. })));
        }

        assert_eq!(current_stock(&db, item.id, None).await?, 4);
        assert!(movements(&db, item.id).await?.is_empty());
        Ok(())
    }
}
