//! Range planning for vectored reads.

use std::fmt;

/// Inclusive byte interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Range covering `len > 0` bytes from `offset`.
    pub fn from_len(offset: u64, len: u64) -> Option<Self> {
        (len > 0).then(|| Self::new(offset, offset.saturating_add(len - 1)))
    }

    /// Number of bytes covered; never zero.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn overlaps(&self, other: &ByteRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Sort and coalesce ranges whose gap is at most `window` bytes.
///
/// Overlapping and adjacent ranges always merge.
///
/// # Examples
///
/// ```
/// use strata_io::{ByteRange, merge_ranges};
///
/// let merged = merge_ranges(
///     &[ByteRange::new(100, 199), ByteRange::new(0, 9), ByteRange::new(15, 20)],
///     10,
/// );
/// assert_eq!(merged, [ByteRange::new(0, 20), ByteRange::new(100, 199)]);
/// ```
pub fn merge_ranges(ranges: &[ByteRange], window: u64) -> Vec<ByteRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_unstable();

    let mut merged: Vec<ByteRange> = Vec::with_capacity(sorted.len());
    for r in sorted {
        match merged.last_mut() {
            Some(last) if r.start <= last.end.saturating_add(window).saturating_add(1) => {
                last.end = last.end.max(r.end);
            }
            _ => merged.push(r),
        }
    }
    merged
}

/// Ranges sent together in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBatch {
    pub ranges: Vec<ByteRange>,
    /// Full `Range` header value, `bytes=a-b,c-d,...`.
    pub header: String,
}

const BYTES_PREFIX: &str = "bytes=";

/// `Range` header value for a single range.
pub fn range_header(range: ByteRange) -> String {
    format!("{BYTES_PREFIX}{range}")
}

/// Pack ranges, in order, into `Range` headers no longer than `budget` bytes.
///
/// A range that does not fit an empty header gets a batch of its own.
pub fn pack_range_headers(ranges: &[ByteRange], budget: usize) -> Vec<RangeBatch> {
    let mut batches = Vec::new();
    let mut current = RangeBatch {
        ranges: Vec::new(),
        header: BYTES_PREFIX.to_string(),
    };

    for &r in ranges {
        let piece = r.to_string();
        let extra = piece.len() + usize::from(!current.ranges.is_empty());
        if !current.ranges.is_empty() && current.header.len() + extra > budget {
            batches.push(std::mem::replace(
                &mut current,
                RangeBatch {
                    ranges: Vec::new(),
                    header: BYTES_PREFIX.to_string(),
                },
            ));
        }
        if !current.ranges.is_empty() {
            current.header.push(',');
        }
        current.header.push_str(&piece);
        current.ranges.push(r);
    }
    if !current.ranges.is_empty() {
        batches.push(current);
    }
    batches
}
