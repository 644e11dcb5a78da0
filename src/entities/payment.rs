//! Payment entity - Settlement of a purchase, confirmed or rejected by staff.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Settlement status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentStatus {
    /// Awaiting staff confirmation
    #[sea_orm(string_value = "Pending")]
    Pending,
    /// Money received
    #[sea_orm(string_value = "Confirmed")]
    Confirmed,
    /// Payment refused, goods returned to stock
    #[sea_orm(string_value = "Rejected")]
    Rejected,
}

/// Payment database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    /// Unique identifier for the payment
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Purchase being paid for
    pub purchase_id: i64,
    /// Human-readable reference (`PAY-XXXXXXXX`)
    pub payment_ref: String,
    /// Amount due / paid
    pub amount_paid: f64,
    /// Settlement status
    pub status: PaymentStatus,
    /// When the payment was opened
    pub payment_date: DateTimeUtc,
}

/// Defines relationships between Payment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each payment belongs to one purchase
    #[sea_orm(
        belongs_to = "super::purchase::Entity",
        from = "Column::PurchaseId",
        to = "super::purchase::Column::Id"
    )]
    Purchase,
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchase.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
