//! Inventory transaction entity - The append-only stock ledger.
//!
//! Every stock mutation writes exactly one row. Rows are never deleted and
//! only the `reference` text is touched afterwards, when the linked payment
//! (`payment_id`) is confirmed or rejected.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Why a stock counter changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum TransactionType {
    /// Initial stock of a newly created item
    #[sea_orm(string_value = "Add")]
    Add,
    /// On-site sale
    #[sea_orm(string_value = "Sale")]
    Sale,
    /// Units held for a reservation
    #[sea_orm(string_value = "Reservation")]
    Reservation,
    /// Units returned by a cancellation, rejection or expiry
    #[sea_orm(string_value = "Release")]
    Release,
    /// Delivery of new stock
    #[sea_orm(string_value = "Restock")]
    Restock,
    /// Manual correction by an admin
    #[sea_orm(string_value = "Edit")]
    Edit,
    /// Item re-enabled (zero delta marker)
    #[sea_orm(string_value = "Activate")]
    Activate,
    /// Item disabled (zero delta marker)
    #[sea_orm(string_value = "Deactivate")]
    Deactivate,
    /// Stock written off before deletion
    #[sea_orm(string_value = "Delete")]
    Delete,
}

/// Inventory transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_transactions")]
pub struct Model {
    /// Unique identifier for the ledger row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Item whose counter changed
    pub item_id: i64,
    /// Variant whose counter changed, if the change was variant-scoped
    pub variant_id: Option<i64>,
    /// Signed change applied to the counter
    pub quantity_change: i32,
    /// Kind of movement
    pub transaction_type: TransactionType,
    /// Human-readable reference (e.g., "Reservation RES-8K2Q1ZPA")
    pub reference: Option<String>,
    /// When the change happened
    pub created_at: DateTimeUtc,
    /// Admin who made the change, `None` for student/system actions
    pub admin_id: Option<i64>,
    /// Reservation this movement belongs to
    pub reservation_id: Option<i64>,
    /// Payment this movement is settled by
    pub payment_id: Option<i64>,
}

/// Defines relationships between `InventoryTransaction` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each ledger row belongs to one item
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemId",
        to = "super::item::Column::Id"
    )]
    Item,
    /// Optional owning reservation
    #[sea_orm(
        belongs_to = "super::reservation::Entity",
        from = "Column::ReservationId",
        to = "super::reservation::Column::Id"
    )]
    Reservation,
    /// Optional settling payment
    #[sea_orm(
        belongs_to = "super::payment::Entity",
        from = "Column::PaymentId",
        to = "super::payment::Column::Id"
    )]
    Payment,
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
