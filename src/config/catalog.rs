//! Catalog seeding from config.toml
//!
//! Items listed under `[[items]]` are created on startup when no item with the
//! same name exists yet. Existing items are left untouched so restarting the
//! service never resets live stock.

use crate::core::catalog::{self, NewItem, NewVariant};
use crate::entities::{Item, ItemColumn};
use crate::errors::Result;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Deserialize;
use tracing::{info, instrument};

/// Configuration for a single catalog item
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogItemConfig {
    /// Name of the item, used as the seeding key
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Unit price
    pub price: f64,
    /// Initial stock
    #[serde(default)]
    pub stock: i32,
    /// Per-item walk-in floor
    #[serde(default)]
    pub min_reservation_stock: Option<i32>,
    /// Sized variants
    #[serde(default)]
    pub variants: Vec<CatalogVariantConfig>,
}

/// Configuration for a single item variant
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogVariantConfig {
    /// Size label
    pub size: String,
    /// Price override
    #[serde(default)]
    pub price: Option<f64>,
    /// Initial stock
    #[serde(default)]
    pub stock: i32,
}

/// Creates every configured item that does not exist yet.
///
/// Returns the number of items created.
#[instrument(skip(db, items), fields(configured = items.len()))]
pub async fn seed_catalog(db: &DatabaseConnection, items: &[CatalogItemConfig]) -> Result<usize> {
    let mut created = 0;
    for cfg in items {
        let existing = Item::find()
            .filter(ItemColumn::Name.eq(cfg.name.trim()))
            .one(db)
            .await?;
        if existing.is_some() {
            continue;
        }

        let item = catalog::create_item(
            db,
            NewItem {
                name: cfg.name.clone(),
                description: cfg.description.clone(),
                price: cfg.price,
                stock: cfg.stock,
                min_reservation_stock: cfg.min_reservation_stock,
                admin_id: None,
            },
        )
        .await?;

        for variant in &cfg.variants {
            catalog::create_variant(
                db,
                NewVariant {
                    item_id: item.id,
                    size: variant.size.clone(),
                    price: variant.price,
                    stock: variant.stock,
                    admin_id: None,
                },
            )
            .await?;
        }

        info!(item = %item.name, variants = cfg.variants.len(), "Seeded catalog item");
        created += 1;
    }
    Ok(created)
}
