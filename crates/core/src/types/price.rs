//! Type-safe price representation using decimal arithmetic.
//!
//! Prices arrive from the catalog service as JSON numbers (`"price": 139.9`)
//! and are stored back the same way, so [`Price`] serializes through
//! `rust_decimal::serde::float` while all arithmetic stays in [`Decimal`].

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::cart::CartModelError;

/// A non-negative unit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price(Decimal);

impl Price {
    /// Zero price.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new price.
    ///
    /// # Errors
    ///
    /// Returns `CartModelError::NegativePrice` if `amount` is below zero.
    pub fn new(amount: Decimal) -> Result<Self, CartModelError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(CartModelError::NegativePrice(amount));
        }
        Ok(Self(amount))
    }

    /// The decimal amount in the currency's standard unit.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Price of `quantity` units, `None` if it does not fit in a `Decimal`.
    #[must_use]
    pub fn times(&self, quantity: u32) -> Option<Decimal> {
        self.0.checked_mul(Decimal::from(quantity))
    }
}

impl TryFrom<Decimal> for Price {
    type Error = CartModelError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::float::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amount = rust_decimal::serde::float::deserialize(deserializer)?;
        Self::new(amount).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Locale
// =============================================================================

/// Display locale for currency amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    /// Brazilian Portuguese, Brazilian real: `R$ 1.234,56`.
    #[default]
    PtBr,
    /// US English, US dollar: `$1,234.56`.
    EnUs,
}

/// Error returned when parsing an unsupported locale tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported locale: {0} (expected pt-BR or en-US)")]
pub struct UnknownLocale(pub String);

impl Locale {
    /// BCP 47 tag for this locale.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::PtBr => "pt-BR",
            Self::EnUs => "en-US",
        }
    }

    /// ISO 4217 code of the currency displayed in this locale.
    #[must_use]
    pub const fn currency_code(self) -> &'static str {
        match self {
            Self::PtBr => "BRL",
            Self::EnUs => "USD",
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            // Intl.NumberFormat separates the real symbol with a no-break space
            Self::PtBr => "R$\u{a0}",
            Self::EnUs => "$",
        }
    }

    const fn separators(self) -> (char, char) {
        match self {
            Self::PtBr => ('.', ','),
            Self::EnUs => (',', '.'),
        }
    }

    /// Format an amount as currency with two fixed decimals and digit grouping.
    #[must_use]
    pub fn format(self, amount: Decimal) -> String {
        let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let negative = rounded.is_sign_negative() && !rounded.is_zero();
        let fixed = format!("{:.2}", rounded.abs());
        let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

        let (group_sep, decimal_sep) = self.separators();
        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, digit) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push(group_sep);
            }
            grouped.push(digit);
        }

        format!(
            "{sign}{symbol}{grouped}{decimal_sep}{fraction}",
            sign = if negative { "-" } else { "" },
            symbol = self.symbol(),
        )
    }

    /// Format a price.
    #[must_use]
    pub fn format_price(self, price: Price) -> String {
        self.format(price.amount())
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Locale {
    type Err = UnknownLocale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "pt-br" | "pt" => Ok(Self::PtBr),
            "en-us" | "en" => Ok(Self::EnUs),
            _ => Err(UnknownLocale(s.to_string())),
        }
    }
}
