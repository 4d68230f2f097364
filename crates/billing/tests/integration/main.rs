#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Integration tests for quota reconciliation and premium upgrades
//!
//! Everything runs against the in-memory store, wrapped where a test needs
//! to inject store failures.
//!
//! ## Running Tests
//! ```bash
//! cargo test -p metamind-billing --test integration
//! ```

mod properties;
mod scenarios;
mod support;
