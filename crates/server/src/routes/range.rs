//! Single `Range: bytes=...` header parsing.

/// Outcome of matching a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Inclusive byte bounds.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// `None` means the header should be ignored and the whole file served:
/// malformed values, other units, and multi-range requests.
pub fn parse_range(header: &str, size: u64) -> Option<ByteRange> {
    let ranges = header.trim().strip_prefix("bytes=")?;
    if ranges.contains(',') {
        return None;
    }
    let (first, last) = ranges.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        // suffix form: last n bytes
        let n: u64 = last.parse().ok()?;
        if n == 0 || size == 0 {
            return Some(ByteRange::Unsatisfiable);
        }
        let start = size.saturating_sub(n);
        return Some(ByteRange::Partial { start, end: size - 1 });
    }

    let start: u64 = first.parse().ok()?;
    let end = if last.is_empty() {
        size.saturating_sub(1)
    } else {
        let end: u64 = last.parse().ok()?;
        if end < start {
            return None;
        }
        end.min(size.saturating_sub(1))
    };
    if start >= size {
        return Some(ByteRange::Unsatisfiable);
    }
    Some(ByteRange::Partial { start, end })
}
