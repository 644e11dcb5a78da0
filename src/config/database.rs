//! Database configuration module.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with
//! `Schema::create_table_from_entity`, so the schema always matches the Rust structs.
//! Indexes that the entity macros cannot express (the partial unique index that
//! backs the one-active-reservation rule) are created with raw SQL afterwards.

use crate::entities::{
    InventoryTransaction, Item, ItemVariant, Payment, Purchase, PurchaseItem, Reservation,
    ReservationItem, Student, SystemConfig,
};
use crate::errors::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/giftstore.sqlite?mode=rwc";

const INDEX_STATEMENTS: [&str; 3] = [
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_one_active_reservation_per_student
        ON reservations(student_id)
        WHERE status IN ('Pending', 'Approved')",
    "CREATE INDEX IF NOT EXISTS idx_inventory_transactions_item
        ON inventory_transactions(item_id)",
    "CREATE INDEX IF NOT EXISTS idx_inventory_transactions_reservation
        ON inventory_transactions(reservation_id)",
];

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a default local `SQLite` file if not found.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the `SQLite` database at `database_url`.
///
/// The pool holds a single connection: `SQLite` has one writer, and engine
/// transactions read before they write, so a second pooled writer could only
/// fail with `SQLITE_BUSY`. Callers must never use the pool while holding one
/// of its transactions.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!(database_url, "Connecting to database");
    let mut options = ConnectOptions::new(database_url.to_owned());
    options.max_connections(1).sqlx_logging(false);
    Database::connect(options).await.map_err(Into::into)
}

async fn create_table<C, E>(db: &C, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all tables and indexes if they do not exist yet.
///
/// Parents are created before children so foreign keys resolve in order.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    create_table(db, Item).await?;
    create_table(db, ItemVariant).await?;
    create_table(db, Student).await?;
    create_table(db, Reservation).await?;
    create_table(db, ReservationItem).await?;
    create_table(db, Purchase).await?;
    create_table(db, PurchaseItem).await?;
    create_table(db, Payment).await?;
    create_table(db, InventoryTransaction).await?;
    create_table(db, SystemConfig).await?;

    for statement in INDEX_STATEMENTS {
        db.execute_unprepared(statement).await?;
    }

    info!("Database tables ensured");
    Ok(())
}
