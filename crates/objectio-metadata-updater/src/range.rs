//! Page ranges touched by metadata writes

use std::fmt;

/// Half-open interval of metadata pages `[offset, offset + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRange {
    /// First page index
    pub offset: u64,
    /// Number of pages
    pub count: u32,
}

impl PageRange {
    /// Create a new page range
    pub const fn new(offset: u64, count: u32) -> Self {
        Self { offset, count }
    }

    /// One past the last page
    ///
    /// Widened so a range reaching page `u64::MAX` keeps its true end.
    pub const fn end(&self) -> u128 {
        self.offset as u128 + self.count as u128
    }

    /// Whether the range covers no pages
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether `page` falls inside the range
    pub const fn contains_page(&self, page: u64) -> bool {
        page >= self.offset && (page as u128) < self.end()
    }

    /// Whether the two ranges share at least one page
    ///
    /// Ranges that only touch at an endpoint do not overlap, and an empty
    /// range overlaps nothing.
    pub const fn overlaps(&self, other: &Self) -> bool {
        (self.offset as u128) < other.end() && (other.offset as u128) < self.end()
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}
