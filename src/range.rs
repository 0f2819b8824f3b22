//! Parsing of single `Range: bytes=<start>-<end>` request headers.
//!
//! Only one range per request is served. Suffix ranges (`bytes=-N`) and
//! multi-range requests are rejected so the caller answers `416`.

use thiserror::Error;

/// Inclusive byte interval within a blob, already clamped to its length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("range unit must be bytes")]
    Unit,
    #[error("multiple ranges are not supported")]
    MultipleRanges,
    #[error("suffix ranges are not supported")]
    Suffix,
    #[error("malformed range bound {0:?}")]
    Malformed(String),
    #[error("range starts at or beyond end of file")]
    StartOutOfBounds,
    #[error("range start {start} is after end {end}")]
    Inverted { start: u64, end: u64 },
}

/// Resolves `header` against a blob of `file_size` bytes.
///
/// An end past the last byte is clamped; a start past it is an error.
pub fn parse(header: &str, file_size: u64) -> Result<ByteRange, RangeError> {
    let (unit, set) = header.trim().split_once('=').ok_or(RangeError::Unit)?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Err(RangeError::Unit);
    }
    if set.contains(',') {
        return Err(RangeError::MultipleRanges);
    }

    let (start, end) = set
        .split_once('-')
        .ok_or_else(|| RangeError::Malformed(set.to_string()))?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() && !end.is_empty() {
        return Err(RangeError::Suffix);
    }

    let start = if start.is_empty() { 0 } else { parse_bound(start)? };
    let end = if end.is_empty() { None } else { Some(parse_bound(end)?) };

    if start >= file_size {
        return Err(RangeError::StartOutOfBounds);
    }
    let last = file_size - 1;
    match end {
        Some(end) if start > end => Err(RangeError::Inverted { start, end }),
        Some(end) => Ok(ByteRange {
            start,
            end: end.min(last),
        }),
        None => Ok(ByteRange { start, end: last }),
    }
}

fn parse_bound(raw: &str) -> Result<u64, RangeError> {
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed(raw.to_string()));
    }
    raw.parse()
        .map_err(|_| RangeError::Malformed(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_range_within_file() {
        let range = parse("bytes=200-299", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 200, end: 299 });
        assert_eq!(range.len(), 100);
        assert_eq!(range.content_range(1000), "bytes 200-299/1000");
    }

    #[test]
    fn open_ended_range_runs_to_last_byte() {
        assert_eq!(parse("bytes=900-", 1000).unwrap(), ByteRange { start: 900, end: 999 });
        assert_eq!(parse("bytes=0-", 1).unwrap(), ByteRange { start: 0, end: 0 });
    }

    #[test]
    fn empty_bounds_cover_whole_file() {
        assert_eq!(parse("bytes=-", 10).unwrap(), ByteRange { start: 0, end: 9 });
    }

    #[test]
    fn overlong_end_is_clamped() {
        let range = parse("bytes=900-2000", 1000).unwrap();
        assert_eq!(range, ByteRange { start: 900, end: 999 });
        assert_eq!(range.len(), 100);
    }

    #[test]
    fn start_past_end_of_file_is_rejected() {
        assert_eq!(parse("bytes=1000-1001", 1000), Err(RangeError::StartOutOfBounds));
        assert_eq!(parse("bytes=5000-", 1000), Err(RangeError::StartOutOfBounds));
        assert_eq!(parse("bytes=0-0", 0), Err(RangeError::StartOutOfBounds));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert_eq!(
            parse("bytes=300-200", 1000),
            Err(RangeError::Inverted { start: 300, end: 200 })
        );
    }

    #[test]
    fn unsupported_forms_are_rejected() {
        assert_eq!(parse("bytes=-500", 1000), Err(RangeError::Suffix));
        assert_eq!(parse("bytes=0-99,200-299", 1000), Err(RangeError::MultipleRanges));
        assert_eq!(parse("items=0-10", 1000), Err(RangeError::Unit));
        assert_eq!(parse("0-10", 1000), Err(RangeError::Unit));
    }

    #[test]
    fn garbage_bounds_are_malformed() {
        assert!(matches!(parse("bytes=abc-10", 1000), Err(RangeError::Malformed(_))));
        assert!(matches!(parse("bytes=+5-10", 1000), Err(RangeError::Malformed(_))));
        assert!(matches!(parse("bytes=5", 1000), Err(RangeError::Malformed(_))));
        assert!(matches!(
            parse("bytes=0-99999999999999999999999", 1000),
            Err(RangeError::Malformed(_))
        ));
        assert!(matches!(parse("bytes=--5", 1000), Err(RangeError::Suffix)));
    }

    #[test]
    fn unit_and_whitespace_are_lenient() {
        assert_eq!(parse(" Bytes = 1 - 2 ", 10).unwrap(), ByteRange { start: 1, end: 2 });
    }
}
