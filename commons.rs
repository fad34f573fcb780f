//! Small utilities shared by the front end and the middle end.

use serde::{Deserialize, Serialize};

/// A witness that a value passed its validation checks.  Constructed only by
/// the respective `validate` functions (or by `skip_validation` in tests).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Valid<T>(pub T);

/// Wrap a value without validating it.  Tests use this when they construct
/// programs that are valid by construction.
pub fn skip_validation<T>(x: T) -> Valid<T> {
    Valid(x)
}

/// A byte range in the source text.  Used by parse errors, debug info, and
/// the slicing API.
#[derive(
    Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
}

impl SourceRange {
    pub fn new(start: usize, end: usize) -> Self {
        SourceRange { start, end }
    }

    // the smallest range covering both self and other.
    pub fn merge(self, other: SourceRange) -> SourceRange {
        SourceRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn text(self, code: &str) -> &str {
        &code[self.start..self.end]
    }
}

impl std::fmt::Display for SourceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
