//! Type-safe price representation using decimal arithmetic.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Errors that can occur when constructing a [`Price`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The amount is zero or negative.
    #[error("price must be greater than zero (got {0})")]
    NotPositive(Decimal),
    /// The input could not be read as a decimal number.
    #[error("invalid price: {0}")]
    Invalid(String),
}

/// A strictly positive monetary amount.
///
/// Sale prices, cart line totals and transaction amounts all share this
/// type, so a zero or negative price cannot be stored anywhere.
///
/// ## Examples
///
/// ```
/// use marketplace_core::Price;
/// use rust_decimal::Decimal;
///
/// let unit = Price::parse(Decimal::new(100, 1)).unwrap(); // 10.0
/// assert_eq!(unit.times(3).unwrap().amount(), Decimal::new(300, 1));
///
/// assert!(Price::parse(Decimal::ZERO).is_err());
/// assert!("-1".parse::<Price>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// Validate a decimal amount as a price.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::NotPositive` if the amount is zero or negative.
    pub fn parse(amount: Decimal) -> Result<Self, PriceError> {
        if amount <= Decimal::ZERO {
            return Err(PriceError::NotPositive(amount));
        }
        Ok(Self(amount))
    }

    /// Returns the decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Line total for `quantity` units at this price.
    ///
    /// A zero quantity is treated as one so the result is still a valid
    /// price. Returns `None` if the total does not fit in a `Decimal`.
    #[must_use]
    pub fn times(&self, quantity: u32) -> Option<Self> {
        self.0
            .checked_mul(Decimal::from(quantity.max(1)))
            .map(Self)
    }

    /// Sum of two prices, or `None` on overflow.
    #[must_use]
    pub fn plus(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl std::str::FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount = s
            .trim()
            .parse::<Decimal>()
            .map_err(|e| PriceError::Invalid(e.to_string()))?;
        Self::parse(amount)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = PriceError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Self::parse(amount)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Price {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Decimal as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <Decimal as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Price {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let amount = <Decimal as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(amount)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Price {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <Decimal as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}
