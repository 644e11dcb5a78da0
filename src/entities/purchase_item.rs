//! Purchase item entity - One priced line of a purchase.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Purchase line database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_items")]
pub struct Model {
    /// Unique identifier for the line
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning purchase
    pub purchase_id: i64,
    /// Sold item
    pub item_id: i64,
    /// Sold variant, if any
    pub variant_id: Option<i64>,
    /// Units sold
    pub quantity: i32,
    /// Price per unit at the time of sale
    pub unit_price: f64,
}

/// Defines relationships between `PurchaseItem` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each line belongs to one purchase
    #[sea_orm(
        belongs_to = "super::purchase::Entity",
        from = "Column::PurchaseId",
        to = "super::purchase::Column::Id",
        on_delete = "Cascade"
    )]
    Purchase,
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchase.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
