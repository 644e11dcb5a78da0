//! Store-wide settings kept in the `system_config` table.
//!
//! The global walk-in floor lives here so staff can change it without a
//! restart. The ledger reads it whenever an item has no override.

use crate::{
    entities::{SystemConfig, system_config},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, prelude::*};
use tracing::info;

/// Key of the global minimum reservation stock setting.
pub const MIN_RESERVATION_STOCK_KEY: &str = "min_reservation_stock";

/// Floor used when neither the item nor `system_config` sets one.
pub const DEFAULT_MIN_RESERVATION_STOCK: i32 = 5;

/// Reads a raw value by key.
pub async fn get_value<C>(db: &C, key: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    let row = SystemConfig::find()
        .filter(system_config::Column::Key.eq(key))
        .one(db)
        .await?;
    Ok(row.map(|r| r.value))
}

/// Inserts or replaces a value by key.
pub async fn set_value<C>(db: &C, key: &str, value: String, description: Option<String>) -> Result<()>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let existing = SystemConfig::find()
        .filter(system_config::Column::Key.eq(key))
        .one(db)
        .await?;

    if let Some(row) = existing {
        let mut active_model: system_config::ActiveModel = row.into();
        active_model.value = Set(value);
        if description.is_some() {
            active_model.description = Set(description);
        }
        active_model.updated_at = Set(now);
        active_model.update(db).await?;
    } else {
        let new_row = system_config::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            description: Set(description),
            updated_at: Set(now),
            ..Default::default()
        };
        new_row.insert(db).await?;
    }
    Ok(())
}

/// Reads the global walk-in floor, `None` if unset.
///
/// # Errors
/// Returns `Error::Config` if the stored value is not a non-negative integer.
pub async fn get_min_reservation_stock<C>(db: &C) -> Result<Option<i32>>
where
    C: ConnectionTrait,
{
    let Some(raw) = get_value(db, MIN_RESERVATION_STOCK_KEY).await? else {
        return Ok(None);
    };
    match raw.trim().parse::<i32>() {
        Ok(floor) if floor >= 0 => Ok(Some(floor)),
        _ => Err(Error::Config {
            message: format!("Invalid {MIN_RESERVATION_STOCK_KEY} value: {raw:?}"),
        }),
    }
}

/// Stores the global walk-in floor.
pub async fn set_min_reservation_stock<C>(db: &C, floor: i32) -> Result<()>
where
    C: ConnectionTrait,
{
    if floor < 0 {
        return Err(Error::Validation {
            message: "Minimum reservation stock cannot be negative".to_string(),
        });
    }
    set_value(
        db,
        MIN_RESERVATION_STOCK_KEY,
        floor.to_string(),
        Some("Units of each item withheld from reservations for walk-in buyers".to_string()),
    )
    .await?;
    info!(floor, "Global minimum reservation stock updated");
    Ok(())
}

/// Writes the configured floor only if none is stored yet, so values changed
/// by staff survive restarts.
pub async fn seed_min_reservation_stock<C>(db: &C, floor: i32) -> Result<bool>
where
    C: ConnectionTrait,
{
    if get_value(db, MIN_RESERVATION_STOCK_KEY).await?.is_some() {
        return Ok(false);
    }
    set_min_reservation_stock(db, floor).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::database::create_tables;
    use sea_orm::Database;

    #[tokio::test]
    async fn test_min_reservation_stock_roundtrip() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        assert_eq!(get_min_reservation_stock(&db).await?, None);
        set_min_reservation_stock(&db, 3).await?;
        assert_eq!(get_min_reservation_stock(&db).await?, Some(3));
        set_min_reservation_stock(&db, 7).await?;
        assert_eq!(get_min_reservation_stock(&db).await?, Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn test_seed_does_not_overwrite() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        assert!(seed_min_reservation_stock(&db, 4).await?);
        assert!(!seed_min_reservation_stock(&db, 9).await?);
        assert_eq!(get_min_reservation_stock(&db).await?, Some(4));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_stored_value_is_reported() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        set_value(&db, MIN_RESERVATION_STOCK_KEY, "lots".to_string(), None).await?;
        let result = get_min_reservation_stock(&db).await;
        assert!(matches!(result, Err(Error::Config { .. })));

        let result = set_min_reservation_stock(&db, -1).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        Ok(())
    }
}
