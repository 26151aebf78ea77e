//! Product keyword list.

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing [`Keywords`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeywordsError {
    /// More keywords than a product may carry.
    #[error("at most {max} keywords are allowed (got {got})")]
    TooMany {
        /// Maximum allowed count.
        max: usize,
        /// Count supplied.
        got: usize,
    },
    /// A keyword is empty after trimming.
    #[error("keywords cannot be empty")]
    Empty,
    /// A keyword is longer than allowed.
    #[error("keyword '{keyword}' must be at most {max} characters")]
    TooLong {
        /// The offending keyword.
        keyword: String,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Search keywords attached to a product.
///
/// ## Constraints
///
/// - At most 5 keywords
/// - Each keyword 1-8 characters after trimming surrounding whitespace
///
/// ## Examples
///
/// ```
/// use marketplace_core::Keywords;
///
/// assert!(Keywords::parse(["mug", "ceramic"]).is_ok());
/// assert!(Keywords::parse(["a", "b", "c", "d", "e", "f"]).is_err()); // too many
/// assert!(Keywords::parse(["earthenware"]).is_err());                 // too long
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Keywords(Vec<String>);

impl Keywords {
    /// Maximum number of keywords per product.
    pub const MAX_COUNT: usize = 5;
    /// Maximum length of a single keyword, in characters.
    pub const MAX_LENGTH: usize = 8;

    /// Parse keywords from any list of strings.
    ///
    /// # Errors
    ///
    /// Returns an error if there are more than 5 keywords, or any keyword is
    /// empty or longer than 8 characters.
    pub fn parse<I, S>(keywords: I) -> Result<Self, KeywordsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_owned())
            .collect();

        if keywords.len() > Self::MAX_COUNT {
            return Err(KeywordsError::TooMany {
                max: Self::MAX_COUNT,
                got: keywords.len(),
            });
        }

        for keyword in &keywords {
            if keyword.is_empty() {
                return Err(KeywordsError::Empty);
            }
            if keyword.chars().count() > Self::MAX_LENGTH {
                return Err(KeywordsError::TooLong {
                    keyword: keyword.clone(),
                    max: Self::MAX_LENGTH,
                });
            }
        }

        Ok(Self(keywords))
    }

    /// Returns the keywords as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// True if no keywords are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if any keyword appears in both lists.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.0.iter().any(|k| other.0.contains(k))
    }

    /// Consumes the `Keywords` and returns the inner list.
    #[must_use]
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl TryFrom<Vec<String>> for Keywords {
    type Error = KeywordsError;

    fn try_from(keywords: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(keywords)
    }
}

impl From<Keywords> for Vec<String> {
    fn from(keywords: Keywords) -> Self {
        keywords.0
    }
}
