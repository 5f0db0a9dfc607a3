use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Exact decimal chapter number such as `12` or `12.5`.
///
/// Stored as the integer part plus the fractional digits with trailing zeros
/// removed, so comparing `(whole, fraction)` lexicographically is numeric order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChapterNumber {
    whole: u64,
    fraction: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChapterError {
    input: String,
    reason: &'static str,
}

impl fmt::Display for ParseChapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid chapter key {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseChapterError {}

impl ChapterNumber {
    pub fn zero() -> Self {
        Self {
            whole: 0,
            fraction: String::new(),
        }
    }

    /// Canonical key used in documents (`"012.50"` becomes `"12.5"`).
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl FromStr for ChapterNumber {
    type Err = ParseChapterError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseChapterError {
            input: raw.to_owned(),
            reason,
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(err("empty"));
        }

        let (whole_part, fraction_part) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (trimmed, None),
        };

        if whole_part.is_empty() || !whole_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err("integer part must be ascii digits"));
        }
        let whole = whole_part
            .trim_start_matches('0')
            .parse::<u64>()
            .or_else(|_| {
                if whole_part.bytes().all(|b| b == b'0') {
                    Ok(0)
                } else {
                    Err(err("integer part out of range"))
                }
            })?;

        let fraction = match fraction_part {
            Some(fraction) => {
                if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(err("fraction must be ascii digits"));
                }
                fraction.trim_end_matches('0').to_owned()
            }
            None => String::new(),
        };

        Ok(Self { whole, fraction })
    }
}

impl TryFrom<String> for ChapterNumber {
    type Error = ParseChapterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChapterNumber> for String {
    fn from(value: ChapterNumber) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fraction.is_empty() {
            write!(f, "{}", self.whole)
        } else {
            write!(f, "{}.{}", self.whole, self.fraction)
        }
    }
}

impl Ord for ChapterNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.whole
            .cmp(&other.whole)
            .then_with(|| self.fraction.cmp(&other.fraction))
    }
}

impl PartialOrd for ChapterNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Range of chapter numbers with independent lower and upper bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: Bound<ChapterNumber>,
    pub end: Bound<ChapterNumber>,
}

impl ChapterRange {
    pub fn inclusive(start: ChapterNumber, end: ChapterNumber) -> Self {
        Self {
            start: Bound::Included(start),
            end: Bound::Included(end),
        }
    }

    pub fn from_options(start: Option<ChapterNumber>, end: Option<ChapterNumber>) -> Self {
        Self {
            start: start.map_or(Bound::Unbounded, Bound::Included),
            end: end.map_or(Bound::Unbounded, Bound::Included),
        }
    }

    pub fn after(latest: ChapterNumber) -> Self {
        Self {
            start: Bound::Excluded(latest),
            end: Bound::Unbounded,
        }
    }

    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    pub fn contains(&self, number: &ChapterNumber) -> bool {
        let above = match &self.start {
            Bound::Included(start) => number >= start,
            Bound::Excluded(start) => number > start,
            Bound::Unbounded => true,
        };
        let below = match &self.end {
            Bound::Included(end) => number <= end,
            Bound::Excluded(end) => number < end,
            Bound::Unbounded => true,
        };
        above && below
    }
}

impl fmt::Display for ChapterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            Bound::Included(start) => write!(f, "[{start}")?,
            Bound::Excluded(start) => write!(f, "({start}")?,
            Bound::Unbounded => write!(f, "(-inf")?,
        }
        match &self.end {
            Bound::Included(end) => write!(f, ", {end}]"),
            Bound::Excluded(end) => write!(f, ", {end})"),
            Bound::Unbounded => write!(f, ", +inf)"),
        }
    }
}

/// Highest chapter number among document keys. Keys that do not parse are
/// skipped with a warning.
pub fn latest_chapter<'a>(keys: impl IntoIterator<Item = &'a String>) -> Option<ChapterNumber> {
    keys.into_iter()
        .filter_map(|key| match key.parse::<ChapterNumber>() {
            Ok(number) => Some(number),
            Err(err) => {
                tracing::warn!(%err, "ignoring unparsable chapter key");
                None
            }
        })
        .max()
}
