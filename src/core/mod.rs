/// Reservation catalog: items, variants and their availability
pub mod catalog;

/// Injectable time source
pub mod clock;

/// Shared handles and reservation rules
pub mod context;

/// Stock counters and the append-only inventory transaction log
pub mod ledger;

/// Purchases made from reservations or on-site, and their payments
pub mod purchase;

/// Reservation lifecycle
pub mod reservation;

/// Claim-ready and auto-expire sweeps
pub mod scheduler;

/// Student lookup by school id number
pub mod student;

/// Key/value settings stored in the database
pub mod system_config;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ReservationPolicy, StoreContext};
