//! Directory entry names and their sibling ordering
//!
//! Siblings are kept in a binary tree whose order other compound file
//! implementations rely on when they look entries up, so the comparison has
//! to match what Office writes:
//!
//! 1. **Shorter names first** (length in UTF-16 code units)
//! 2. Names equal ignoring case are the same name
//! 3. `_VBA_PROJECT` sorts after every other name of its length
//! 4. Names starting with `__` sort after the remaining names of their length
//! 5. Otherwise compare the uppercased names
//!
//! Uppercasing is per character and only applies when a character has a
//! single-character uppercase form, so it never changes a name's length.

use crate::consts::MAX_NAME_LENGTH;
use crate::error::{CfbError, Result};
use std::cmp::Ordering;
use std::fmt;

const VBA_PROJECT: &str = "_VBA_PROJECT";

/// A validated directory entry name with its precomputed sort key
#[derive(Debug, Clone)]
pub struct EntryName {
    name: String,
    utf16_len: usize,
    rank: u8,
    folded: Box<[char]>,
}

/// Uppercase a character when it has a single-character uppercase form
fn simple_uppercase(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}

fn fold(name: &str) -> Box<[char]> {
    name.chars().map(simple_uppercase).collect()
}

fn rank_of(folded: &[char]) -> u8 {
    if folded.iter().copied().eq(VBA_PROJECT.chars()) {
        2
    } else if folded.starts_with(&['_', '_']) {
        1
    } else {
        0
    }
}

impl EntryName {
    /// Validate a name supplied by a caller.
    ///
    /// Names must be 1 to 31 UTF-16 code units long and may not contain
    /// `/`, `\`, `:` or `!`.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(CfbError::InvalidArgument(
                "Entry names cannot be empty".to_string(),
            ));
        }
        if let Some(c) = name.chars().find(|c| matches!(c, '/' | '\\' | ':' | '!')) {
            return Err(CfbError::InvalidArgument(format!(
                "Entry name '{}' contains illegal character '{}'",
                name, c
            )));
        }
        let name = Self::from_disk(name);
        if name.utf16_len > MAX_NAME_LENGTH {
            return Err(CfbError::InvalidArgument(format!(
                "Entry name '{}' is {} UTF-16 units long, limit is {}",
                name.name, name.utf16_len, MAX_NAME_LENGTH
            )));
        }
        Ok(name)
    }

    /// Wrap a name decoded from a directory record without content checks.
    ///
    /// The record decoder already bounds the length.
    pub(crate) fn from_disk(name: &str) -> Self {
        let folded = fold(name);
        Self {
            name: name.to_string(),
            utf16_len: name.encode_utf16().count(),
            rank: rank_of(&folded),
            folded,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Length in UTF-16 code units, without terminator
    pub fn utf16_len(&self) -> usize {
        self.utf16_len
    }
}

impl PartialEq for EntryName {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EntryName {}

impl PartialOrd for EntryName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntryName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.utf16_len
            .cmp(&other.utf16_len)
            .then_with(|| {
                if self.folded == other.folded {
                    Ordering::Equal
                } else {
                    self.rank
                        .cmp(&other.rank)
                        .then_with(|| self.folded.cmp(&other.folded))
                }
            })
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Compare two sibling names using the on-disk tree order
pub fn compare_names(a: &str, b: &str) -> Ordering {
    EntryName::from_disk(a).cmp(&EntryName::from_disk(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_length_first() {
        assert_eq!(compare_names("Z", "AA"), Ordering::Less);
        assert_eq!(compare_names("Workbook", "Book"), Ordering::Greater);
    }

    #[test]
    fn test_case_insensitive_equality() {
        assert_eq!(compare_names("WordDocument", "worddocument"), Ordering::Equal);
        assert_eq!(compare_names("abc", "ABD"), Ordering::Less);
    }

    #[test]
    fn test_vba_project_last() {
        // Same length as _VBA_PROJECT
        assert_eq!(compare_names("_VBA_PROJECT", "zzzzzzzzzzzz"), Ordering::Greater);
        assert_eq!(compare_names("__zzzzzzzzzz", "_VBA_PROJECT"), Ordering::Less);
        assert_eq!(compare_names("_vba_project", "_VBA_PROJECT"), Ordering::Equal);
    }

    #[test]
    fn test_double_underscore_after_plain() {
        assert_eq!(compare_names("__SRP_0", "ZZZZZZZ"), Ordering::Greater);
        assert_eq!(compare_names("__SRP_0", "__SRP_1"), Ordering::Less);
    }

    #[test]
    fn test_utf16_length() {
        // One supplementary character is two UTF-16 units
        let name = EntryName::new("\u{1F600}").unwrap();
        assert_eq!(name.utf16_len(), 2);
        assert_eq!(compare_names("\u{1F600}", "A"), Ordering::Greater);
        assert_eq!(compare_names("\u{1F600}", "ABC"), Ordering::Less);
    }

    #[test]
    fn test_validation() {
        assert!(EntryName::new("Workbook").is_ok());
        assert!(EntryName::new(&"x".repeat(31)).is_ok());
        assert!(matches!(
            EntryName::new(&"x".repeat(32)),
            Err(CfbError::InvalidArgument(_))
        ));
        assert!(EntryName::new("").is_err());
        assert!(EntryName::new("a/b").is_err());
        assert!(EntryName::new("a:b").is_err());
        assert!(EntryName::new("\u{1}CompObj").is_ok());
    }

    fn name_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z_]{1,6}",
            Just("_VBA_PROJECT".to_string()),
            Just("_vba_project".to_string()),
            "__[a-z]{0,4}",
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_order_is_total(a in name_strategy(), b in name_strategy(), c in name_strategy()) {
            let ab = compare_names(&a, &b);
            prop_assert_eq!(ab, compare_names(&b, &a).reverse());

            let bc = compare_names(&b, &c);
            if ab != Ordering::Greater && bc != Ordering::Greater {
                prop_assert_ne!(compare_names(&a, &c), Ordering::Greater);
            }
        }

        #[test]
        fn prop_equal_ignoring_case(a in "[a-zA-Z]{1,10}") {
            prop_assert_eq!(compare_names(&a, &a.to_lowercase()), Ordering::Equal);
        }
    }
}
