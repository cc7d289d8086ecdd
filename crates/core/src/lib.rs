//! RocketShoes Core - Shared cart domain types.
//!
//! This crate provides the types used by the storefront cart:
//! - [`Product`] and [`StockInfo`] as reported by the catalog service
//! - [`CartEntry`] and [`Cart`], the ordered list of line items
//! - [`Price`] and [`Locale`] for decimal prices and currency display
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no storage. This keeps the cart rules testable in isolation and
//! lets the storefront own every side effect.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
