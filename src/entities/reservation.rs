//! Reservation entity - A student's hold on stock, bounded by two deadlines.
//!
//! `cancel_window_expires` ends the self-service cancellation period and
//! `claim_deadline` ends the claim period, after which the reservation is
//! expired by the scheduler. Both are stored as absolute instants.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ReservationStatus {
    /// Stock held, awaiting purchase
    #[sea_orm(string_value = "Pending")]
    Pending,
    /// A purchase with a pending payment exists
    #[sea_orm(string_value = "Approved")]
    Approved,
    /// Paid and handed over
    #[sea_orm(string_value = "Claimed")]
    Claimed,
    /// Claim deadline passed, stock released
    #[sea_orm(string_value = "Expired")]
    Expired,
    /// Canceled by the student, an admin, or a rejected payment
    #[sea_orm(string_value = "Canceled")]
    Canceled,
}

impl ReservationStatus {
    /// Statuses that count toward the one-active-reservation-per-student rule.
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Approved];

    /// Returns true while the reservation still holds stock.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    /// Returns true once no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Stable string form, identical to the stored value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Claimed => "Claimed",
            Self::Expired => "Expired",
            Self::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reservation database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reservations")]
pub struct Model {
    /// Unique identifier for the reservation
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Human-readable code handed to the student (`RES-XXXXXXXX`)
    #[sea_orm(unique)]
    pub code: String,
    /// Owning student
    pub student_id: i64,
    /// Current lifecycle status
    pub status: ReservationStatus,
    /// When the reservation was created
    pub created_at: DateTimeUtc,
    /// End of the self-service cancellation window
    pub cancel_window_expires: DateTimeUtc,
    /// After this instant an unclaimed reservation is expired
    pub claim_deadline: Option<DateTimeUtc>,
    /// When the claim-ready notice was dispatched, `None` if never
    pub claim_notified_at: Option<DateTimeUtc>,
}

/// Defines relationships between Reservation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each reservation belongs to one student
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
    /// One reservation has many item lines
    #[sea_orm(has_many = "super::reservation_item::Entity")]
    Items,
    /// One reservation has at most a few purchases
    #[sea_orm(has_many = "super::purchase::Entity")]
    Purchases,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl Related<super::reservation_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchases.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
