//! MetaMind Shared Types and Storage
//!
//! Domain types, the store contracts used by the quota and payment core,
//! and their Postgres and in-memory implementations.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod db;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use db::*;
pub use error::*;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::*;
pub use types::*;
