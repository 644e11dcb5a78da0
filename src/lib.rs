//! `giftstore-reserve` - Reservation and inventory engine for a school giftstore
//!
//! This crate keeps per-item and per-variant stock counters behind an
//! append-only ledger, lets students reserve items for a timed pickup while
//! holding back stock for walk-in buyers, and runs the background sweeps that
//! announce claimable reservations and expire unclaimed ones.

#![deny(
    unsafe_code,
    unused_must_use,
    unreachable_patterns,
    rustdoc::broken_intra_doc_links,
)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    // Engine code propagates errors; tests opt out per module.
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::dbg_macro,
    clippy::todo,
    // Shared handles (db, clock, notifier) are cloned with Arc::clone.
    clippy::clone_on_ref_ptr,
    // Prices are f64; compare with a tolerance.
    clippy::float_cmp,
    rust_2018_idioms,
)]
#![allow(
    // core::reservation::ReservationDetails and friends read better qualified.
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
)]

/// Request and response shapes for the reservation endpoints
pub mod api;
/// Configuration management for database, settings and catalog seeding
pub mod config;
/// Core business logic - ledger, reservations, purchases and sweeps
pub mod core;
/// SeaORM entity definitions for database tables
pub mod entities;
/// Unified error types and result handling
pub mod errors;
/// Reservation emails
pub mod notify;

#[cfg(test)]
pub mod test_utils;
