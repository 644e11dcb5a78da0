//! Item entity - A sellable giftstore product with its own stock counter.
//!
//! Stock is only ever changed through the inventory ledger
//! (`core::ledger`), which keeps `stock_quantity` non-negative and appends an
//! audit row for every change.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Item database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "items")]
pub struct Model {
    /// Unique identifier for the item
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Display name (e.g., "School Hoodie")
    pub name: String,
    /// Optional free-text description
    pub description: Option<String>,
    /// Unit price
    pub price: f64,
    /// Units currently on hand and free to sell or reserve
    pub stock_quantity: i32,
    /// Units withheld from reservations for walk-in buyers. `None` falls back
    /// to the global `min_reservation_stock` setting.
    pub min_reservation_stock: Option<i32>,
    /// Inactive items cannot be sold or reserved
    pub is_active: bool,
    /// When the item was created
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Item and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One item has many variants
    #[sea_orm(has_many = "super::item_variant::Entity")]
    Variants,
    /// One item has many ledger rows
    #[sea_orm(has_many = "super::inventory_transaction::Entity")]
    InventoryTransactions,
}

impl Related<super::item_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variants.def()
    }
}

impl Related<super::inventory_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryTransactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
