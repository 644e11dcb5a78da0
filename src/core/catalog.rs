//! Catalog business logic - Items, their sized variants, and their lifecycle.
//!
//! Initial stock is booked through the ledger as an `Add` row so the counter
//! of every item can be reconstructed from its transactions. Items are never
//! hard-deleted once anything references them; deactivate them instead.

use crate::{
    core::ledger::{self, Adjustment, Provenance},
    entities::{
        InventoryTransaction, Item, ItemVariant, TransactionType, inventory_transaction, item,
        item_variant,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Fields for a new item.
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Display name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Unit price
    pub price: f64,
    /// Units on hand at creation
    pub stock: i32,
    /// Per-item walk-in floor, `None` to use the global value
    pub min_reservation_stock: Option<i32>,
    /// Acting admin
    pub admin_id: Option<i64>,
}

/// Fields for a new variant.
#[derive(Debug, Clone)]
pub struct NewVariant {
    /// Parent item
    pub item_id: i64,
    /// Size label, e.g. "M"
    pub size: String,
    /// Price override
    pub price: Option<f64>,
    /// Units on hand at creation
    pub stock: i32,
    /// Acting admin
    pub admin_id: Option<i64>,
}

fn validate_price(price: f64) -> Result<()> {
    if !price.is_finite() || price < 0.0 {
        return Err(Error::Validation {
            message: format!("Price must be a non-negative number, got {price}"),
        });
    }
    Ok(())
}

fn validate_stock(stock: i32) -> Result<()> {
    if stock < 0 {
        return Err(Error::Validation {
            message: format!("Initial stock cannot be negative, got {stock}"),
        });
    }
    Ok(())
}

/// Creates an item and books its initial stock.
///
/// # Errors
/// Returns an error if:
/// - The name is empty or whitespace-only
/// - The price is negative or not finite
/// - The stock or floor is negative
/// - The database operation fails
#[instrument(skip(db, new), fields(name = %new.name))]
pub async fn create_item(db: &DatabaseConnection, new: NewItem) -> Result<item::Model> {
    if new.name.trim().is_empty() {
        return Err(Error::Validation {
            message: "Item name cannot be empty".to_string(),
        });
    }
    validate_price(new.price)?;
    validate_stock(new.stock)?;
    if new.min_reservation_stock.is_some_and(|f| f < 0) {
        return Err(Error::Validation {
            message: "Minimum reservation stock cannot be negative".to_string(),
        });
    }

    let now = Utc::now();
    let txn = db.begin().await?;
    let item = item::ActiveModel {
        name: Set(new.name.trim().to_string()),
        description: Set(new.description),
        price: Set(new.price),
        stock_quantity: Set(0),
        min_reservation_stock: Set(new.min_reservation_stock),
        is_active: Set(true),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if new.stock > 0 {
        ledger::adjust(
            &txn,
            Adjustment {
                item_id: item.id,
                variant_id: None,
                delta: new.stock,
                kind: TransactionType::Add,
                provenance: Provenance::admin(now, new.admin_id, format!("Added {}", item.name)),
            },
        )
        .await?;
    }

    let item = Item::find_by_id(item.id)
        .one(&txn)
        .await?
        .ok_or(Error::ItemNotFound { item_id: item.id })?;
    txn.commit().await?;

    info!(item_id = item.id, stock = item.stock_quantity, "Created item");
    Ok(item)
}

/// Creates a sized variant of an existing item and books its initial stock.
///
/// # Errors
/// Returns an error if the item does not exist, the size label is empty, the
/// price override or stock is invalid, or the database operation fails.
#[instrument(skip(db, new), fields(item_id = new.item_id, size = %new.size))]
pub async fn create_variant(db: &DatabaseConnection, new: NewVariant) -> Result<item_variant::Model> {
    if new.size.trim().is_empty() {
        return Err(Error::Validation {
            message: "Variant size cannot be empty".to_string(),
        });
    }
    if let Some(price) = new.price {
        validate_price(price)?;
    }
    validate_stock(new.stock)?;

    let now = Utc::now();
    let txn = db.begin().await?;
    let item = Item::find_by_id(new.item_id)
        .one(&txn)
        .await?
        .ok_or(Error::ItemNotFound {
            item_id: new.item_id,
        })?;

    let variant = item_variant::ActiveModel {
        item_id: Set(item.id),
        size: Set(new.size.trim().to_string()),
        price: Set(new.price),
        stock_quantity: Set(0),
        is_active: Set(true),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if new.stock > 0 {
        ledger::adjust(
            &txn,
            Adjustment {
                item_id: item.id,
                variant_id: Some(variant.id),
                delta: new.stock,
                kind: TransactionType::Add,
                provenance: Provenance::admin(
                    now,
                    new.admin_id,
                    format!("Added {} ({})", item.name, variant.size),
                ),
            },
        )
        .await?;
    }

    let variant = ItemVariant::find_by_id(variant.id)
        .one(&txn)
        .await?
        .ok_or(Error::VariantNotFound {
            item_id: item.id,
            variant_id: variant.id,
        })?;
    txn.commit().await?;
    Ok(variant)
}

/// Retrieves an item by id.
///
/// # Errors
/// Returns `ItemNotFound` if no such item exists.
pub async fn get_item<C>(db: &C, item_id: i64) -> Result<item::Model>
where
    C: ConnectionTrait,
{
    Item::find_by_id(item_id)
        .one(db)
        .await?
        .ok_or(Error::ItemNotFound { item_id })
}

/// Variants of an item in creation order.
pub async fn variants_for_item<C>(db: &C, item_id: i64) -> Result<Vec<item_variant::Model>>
where
    C: ConnectionTrait,
{
    ItemVariant::find()
        .filter(item_variant::Column::ItemId.eq(item_id))
        .order_by_asc(item_variant::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// All active items, ordered alphabetically by name.
pub async fn list_active_items<C>(db: &C) -> Result<Vec<item::Model>>
where
    C: ConnectionTrait,
{
    Item::find()
        .filter(item::Column::IsActive.eq(true))
        .order_by_asc(item::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Activates or deactivates an item, logging an `Activate` or `Deactivate` row.
/// Setting the flag it already has is a no-op that logs nothing.
///
/// # Errors
/// Returns `ItemNotFound` if no such item exists.
#[instrument(skip(db))]
pub async fn set_item_active(
    db: &DatabaseConnection,
    item_id: i64,
    active: bool,
    admin_id: Option<i64>,
) -> Result<item::Model> {
    let txn = db.begin().await?;
    let current = get_item(&txn, item_id).await?;
    if current.is_active == active {
        txn.commit().await?;
        return Ok(current);
    }

    let (kind, verb) = if active {
        (TransactionType::Activate, "Activated")
    } else {
        (TransactionType::Deactivate, "Deactivated")
    };
    ledger::adjust(
        &txn,
        Adjustment {
            item_id,
            variant_id: None,
            delta: 0,
            kind,
            provenance: Provenance::admin(Utc::now(), admin_id, format!("{verb} {}", current.name)),
        },
    )
    .await?;

    let updated = get_item(&txn, item_id).await?;
    txn.commit().await?;
    info!(item_id, active, "Changed item availability");
    Ok(updated)
}

/// Hard-deletes an item and its variants.
///
/// # Errors
/// - `ItemNotFound` if no such item exists
/// - `DeleteBlocked` if any inventory transaction references the item
#[instrument(skip(db))]
pub async fn delete_item(db: &DatabaseConnection, item_id: i64) -> Result<()> {
    let txn = db.begin().await?;
    get_item(&txn, item_id).await?;

    let transactions = InventoryTransaction::find()
        .filter(inventory_transaction::Column::ItemId.eq(item_id))
        .count(&txn)
        .await?;
    if transactions > 0 {
        return Err(Error::DeleteBlocked {
            item_id,
            transactions,
        });
    }

    ItemVariant::delete_many()
        .filter(item_variant::Column::ItemId.eq(item_id))
        .exec(&txn)
        .await?;
    Item::delete_by_id(item_id).exec(&txn).await?;
    txn.commit().await?;
    info!(item_id, "Deleted item");
    Ok(())
}
