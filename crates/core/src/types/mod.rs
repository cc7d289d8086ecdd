//! Core types for the RocketShoes cart.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod cart;
pub mod id;
pub mod price;
pub mod product;

pub use cart::{Cart, CartEntry, CartModelError};
pub use id::*;
pub use price::{Locale, Price, UnknownLocale};
pub use product::{Product, StockInfo};
