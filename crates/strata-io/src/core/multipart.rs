//! Header-level pieces of `multipart/byteranges` parsing.

use super::ranges::ByteRange;

/// Longest boundary accepted from a server.
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Blank lines tolerated while looking for a part boundary.
pub const MAX_BLANK_LINES: usize = 100;

/// Boundary token of a `multipart/byteranges` content type.
///
/// ```
/// use strata_io::extract_boundary;
///
/// assert_eq!(
///     extract_boundary(r#"multipart/byteranges; boundary="abc"; charset=x"#).as_deref(),
///     Some("abc")
/// );
/// assert_eq!(extract_boundary("multipart/byteranges"), None);
/// ```
pub fn extract_boundary(content_type: &str) -> Option<String> {
    const FIELD: &str = "boundary=";
    let pos = content_type.find(FIELD)?;
    let value = content_type[pos + FIELD.len()..]
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    let token = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    (!token.is_empty() && token.len() <= MAX_BOUNDARY_LEN).then(|| token.to_string())
}

/// Parsed `Content-Range: bytes <start>-<end>/<total>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub range: ByteRange,
    /// `None` when the server sent `*`.
    pub total: Option<u64>,
}

/// Parse a `Content-Range` value.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange {
        range: ByteRange::new(start, end),
        total,
    })
}

/// What a line read between parts means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryLine {
    Blank,
    /// `--boundary`: a part starts.
    Part,
    /// `--boundary--`: the body ends.
    End,
    Other,
}

/// Classify a line, trailing CR/LF ignored.
pub fn classify_line(line: &[u8], boundary: &str) -> BoundaryLine {
    let line = trim_eol(line);
    if line.is_empty() {
        return BoundaryLine::Blank;
    }
    let Some(rest) = line.strip_prefix(b"--") else {
        return BoundaryLine::Other;
    };
    let Some(tail) = rest.strip_prefix(boundary.as_bytes()) else {
        return BoundaryLine::Other;
    };
    match tail {
        b"" => BoundaryLine::Part,
        b"--" => BoundaryLine::End,
        _ => BoundaryLine::Other,
    }
}

/// A part header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartHeader {
    /// Empty line: the payload follows.
    EndOfHeaders,
    ContentRange(ContentRange),
    /// Any other well-formed header.
    Ignored,
}

/// Parse one header line of a part. `None` when it is not a valid header,
/// or a `Content-Range` that cannot be read.
pub fn parse_part_header(line: &[u8]) -> Option<PartHeader> {
    let line = trim_eol(line);
    if line.is_empty() {
        return Some(PartHeader::EndOfHeaders);
    }
    let line = std::str::from_utf8(line).ok()?;
    let (name, value) = line.split_once(':')?;
    if name.trim().eq_ignore_ascii_case("content-range") {
        parse_content_range(value).map(PartHeader::ContentRange)
    } else {
        Some(PartHeader::Ignored)
    }
}

fn trim_eol(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n'] = line {
        line = rest;
    }
    line
}
