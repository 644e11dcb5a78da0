//! Item variant entity - A sized version of an item with its own stock.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Item variant database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "item_variants")]
pub struct Model {
    /// Unique identifier for the variant
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Parent item
    pub item_id: i64,
    /// Size or option label (e.g., "M", "XL")
    pub size: String,
    /// Price override, `None` uses the parent item's price
    pub price: Option<f64>,
    /// Units of this variant on hand
    pub stock_quantity: i32,
    /// Inactive variants cannot be sold or reserved
    pub is_active: bool,
}

/// Defines relationships between `ItemVariant` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each variant belongs to one item
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemId",
        to = "super::item::Column::Id",
        on_delete = "Cascade"
    )]
    Item,
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
