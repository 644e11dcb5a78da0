//! Purchase entity - A sale, either from a reservation or at the counter.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Where a purchase originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PurchaseType {
    /// Created from an existing reservation
    #[sea_orm(string_value = "Reservation")]
    Reservation,
    /// Point-of-sale checkout
    #[sea_orm(string_value = "Onsite")]
    Onsite,
}

/// Purchase database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchases")]
pub struct Model {
    /// Unique identifier for the purchase
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Source reservation for reservation purchases
    pub reservation_id: Option<i64>,
    /// Origin of the purchase
    pub purchase_type: PurchaseType,
    /// When the purchase was recorded
    pub date_purchased: DateTimeUtc,
    /// Sum of line totals
    pub total_amount: f64,
}

/// Defines relationships between Purchase and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Optional source reservation
    #[sea_orm(
        belongs_to = "super::reservation::Entity",
        from = "Column::ReservationId",
        to = "super::reservation::Column::Id"
    )]
    Reservation,
    /// One purchase has many lines
    #[sea_orm(has_many = "super::purchase_item::Entity")]
    Items,
    /// One purchase has many payments
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservation.def()
    }
}

impl Related<super::purchase_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
