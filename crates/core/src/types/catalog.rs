//! Closed enumerations for accounts and the product catalog.
//!
//! Every enum here has one canonical text form used on the wire, in the
//! database and on the command line. `FromStr` accepts that form
//! case-insensitively; [`Category`] also accepts its digit.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when a string does not name a known variant.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

// =============================================================================
// Role
// =============================================================================

/// The kind of account a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "market.account_role", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Browses, fills a cart, checks out and leaves feedback.
    Buyer,
    /// Lists products and manages their price and stock.
    Seller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buyer => write!(f, "buyer"),
            Self::Seller => write!(f, "seller"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

// =============================================================================
// Category
// =============================================================================

/// Product category.
///
/// The catalog has exactly ten categories, named `ZERO` through `NINE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "market.category", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    #[serde(alias = "0")]
    Zero,
    #[serde(alias = "1")]
    One,
    #[serde(alias = "2")]
    Two,
    #[serde(alias = "3")]
    Three,
    #[serde(alias = "4")]
    Four,
    #[serde(alias = "5")]
    Five,
    #[serde(alias = "6")]
    Six,
    #[serde(alias = "7")]
    Seven,
    #[serde(alias = "8")]
    Eight,
    #[serde(alias = "9")]
    Nine,
}

impl Category {
    /// All categories in numeric order.
    pub const ALL: [Self; 10] = [
        Self::Zero,
        Self::One,
        Self::Two,
        Self::Three,
        Self::Four,
        Self::Five,
        Self::Six,
        Self::Seven,
        Self::Eight,
        Self::Nine,
    ];

    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "ZERO",
            Self::One => "ONE",
            Self::Two => "TWO",
            Self::Three => "THREE",
            Self::Four => "FOUR",
            Self::Five => "FIVE",
            Self::Six => "SIX",
            Self::Seven => "SEVEN",
            Self::Eight => "EIGHT",
            Self::Nine => "NINE",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(digit) = trimmed.parse::<usize>() {
            return Self::ALL
                .get(digit)
                .copied()
                .ok_or_else(|| ParseEnumError::new("category", s));
        }
        Self::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(trimmed))
            .copied()
            .ok_or_else(|| ParseEnumError::new("category", s))
    }
}

// =============================================================================
// Condition
// =============================================================================

/// Physical condition of a listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "market.item_condition", rename_all = "SCREAMING_SNAKE_CASE")
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    #[default]
    New,
    Used,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Used => write!(f, "USED"),
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(Self::New),
            "USED" => Ok(Self::Used),
            _ => Err(ParseEnumError::new("condition", s)),
        }
    }
}

// =============================================================================
// Rating
// =============================================================================

/// Thumbs-up / thumbs-down counters.
///
/// The same pair is kept on a product and on the seller who owns it; each
/// piece of feedback moves one counter on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Rating {
    pub thumbs_up: u32,
    pub thumbs_down: u32,
}

impl Rating {
    /// Create a rating pair.
    #[must_use]
    pub const fn new(thumbs_up: u32, thumbs_down: u32) -> Self {
        Self {
            thumbs_up,
            thumbs_down,
        }
    }

    /// The pair after one more piece of feedback.
    #[must_use]
    pub const fn with_feedback(self, liked: bool) -> Self {
        if liked {
            Self::new(self.thumbs_up.saturating_add(1), self.thumbs_down)
        } else {
            Self::new(self.thumbs_up, self.thumbs_down.saturating_add(1))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::Buyer, Role::Seller] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_category_parse_name_and_digit() {
        assert_eq!("ZERO".parse::<Category>().unwrap(), Category::Zero);
        assert_eq!("seven".parse::<Category>().unwrap(), Category::Seven);
        assert_eq!("9".parse::<Category>().unwrap(), Category::Nine);
        assert!("10".parse::<Category>().is_err());
        assert!("ELEVEN".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde() {
        assert_eq!(serde_json::to_string(&Category::Three).unwrap(), "\"THREE\"");
        let parsed: Category = serde_json::from_str("\"3\"").unwrap();
        assert_eq!(parsed, Category::Three);
    }

    #[test]
    fn test_condition_parse() {
        assert_eq!("used".parse::<Condition>().unwrap(), Condition::Used);
        assert_eq!(Condition::New.to_string(), "NEW");
        assert!("broken".parse::<Condition>().is_err());
    }

    #[test]
    fn test_rating_feedback() {
        let rating = Rating::default().with_feedback(true).with_feedback(false);
        assert_eq!(rating, Rating::new(1, 1));
    }

    #[test]
    fn test_parse_error_message() {
        let err = "purple".parse::<Condition>().unwrap_err();
        assert_eq!(err.to_string(), "invalid condition: purple");
    }
}
