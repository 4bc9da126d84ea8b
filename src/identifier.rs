//! Identifier normalization and deduplication
//!
//! Handles arrive from callers in whatever shape they were typed. Before a batch
//! starts, every handle is trimmed and lowercased, empty entries are dropped and
//! duplicates are collapsed, so each account is fetched at most once.

use std::collections::BTreeSet;
use std::fmt;

/// A normalized account identifier
///
/// Always trimmed, lowercase and non-empty.
///
/// # Examples
///
/// ```
/// use batch_fetch::identifier::Identifier;
///
/// let id = Identifier::parse("  Alice ").unwrap();
/// assert_eq!(id.as_str(), "alice");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Normalize a raw handle
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is empty after trimming.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(IdentifierError::Empty);
        }
        Ok(Self(normalized))
    }

    /// Borrow the normalized form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the normalized string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize, drop empties and deduplicate a list of raw handles
///
/// The returned list is sorted, which is also the order reports use.
///
/// # Errors
///
/// Returns [`IdentifierError::NoIdentifiers`] when nothing usable remains.
pub fn normalize_ids<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Identifier>, IdentifierError> {
    let unique: BTreeSet<Identifier> = raw
        .iter()
        .filter_map(|s| Identifier::parse(s.as_ref()).ok())
        .collect();

    if unique.is_empty() {
        return Err(IdentifierError::NoIdentifiers { supplied: raw.len() });
    }

    Ok(unique.into_iter().collect())
}

/// Errors that can occur during identifier normalization
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// A single handle was blank
    #[error("identifier cannot be empty")]
    Empty,

    /// No usable handle remained after normalization
    #[error("no usable identifiers after normalization ({supplied} supplied)")]
    NoIdentifiers {
        /// How many raw entries were supplied
        supplied: usize,
    },
}
