//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod inventory_transaction;
pub mod item;
pub mod item_variant;
pub mod payment;
pub mod purchase;
pub mod purchase_item;
pub mod reservation;
pub mod reservation_item;
pub mod student;
pub mod system_config;

// Re-export specific types to avoid conflicts
pub use inventory_transaction::{
    Column as InventoryTransactionColumn, Entity as InventoryTransaction,
    Model as InventoryTransactionModel, TransactionType,
};
pub use item::{Column as ItemColumn, Entity as Item, Model as ItemModel};
pub use item_variant::{Column as ItemVariantColumn, Entity as ItemVariant, Model as ItemVariantModel};
pub use payment::{Column as PaymentColumn, Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use purchase::{Column as PurchaseColumn, Entity as Purchase, Model as PurchaseModel, PurchaseType};
pub use purchase_item::{
    Column as PurchaseItemColumn, Entity as PurchaseItem, Model as PurchaseItemModel,
};
pub use reservation::{
    Column as ReservationColumn, Entity as Reservation, Model as ReservationModel,
    ReservationStatus,
};
pub use reservation_item::{
    Column as ReservationItemColumn, Entity as ReservationItem, Model as ReservationItemModel,
};
pub use student::{Column as StudentColumn, Entity as Student, Model as StudentModel};
pub use system_config::{
    Column as SystemConfigColumn, Entity as SystemConfig, Model as SystemConfigModel,
};
