//! System config entity - Stores key-value pairs for store-wide settings.
//! Used for settings staff can change at runtime, such as the global
//! `min_reservation_stock` floor.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// System config database model - stores key-value configuration pairs
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "system_config")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Configuration key (e.g., `"min_reservation_stock"`)
    #[sea_orm(unique)]
    pub key: String,
    /// Configuration value stored as string
    pub value: String,
    /// What the setting controls
    pub description: Option<String>,
    /// When this configuration was last modified
    pub updated_at: DateTimeUtc,
}

/// `SystemConfig` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
