//! Redaction of protected segments from content streams.

/// Placeholder substituted for protected regions.
pub const REDACTION_PLACEHOLDER: &str = "[REDACTED: Security Protected]";

/// Sort and coalesce overlapping or touching byte ranges.
#[must_use]
pub fn merge_ranges(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    ranges.sort_by_key(|r| r.0);

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        if end <= start {
            continue;
        }
        match merged.last_mut() {
            Some(last) if start <= last.1 => {
                last.1 = last.1.max(end);
            },
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Replace the given byte ranges with the redaction placeholder.
///
/// Ranges are merged first, then replaced from the end toward the
/// start so earlier offsets stay valid. Each replacement keeps one
/// newline per newline in the original span, so line numbering of the
/// surrounding content is unchanged and the total line count never
/// shrinks.
#[must_use]
pub fn redact(content: &str, ranges: &[(usize, usize)]) -> String {
    let mut result = content.to_owned();

    for &(start, end) in merge_ranges(ranges.to_vec()).iter().rev() {
        let end = end.min(result.len());
        if start >= end {
            continue;
        }
        let Some(span) = result.get(start..end) else {
            // Not on character boundaries; the range cannot have come
            // from the scanners, which only emit valid offsets.
            continue;
        };
        let newlines = span.matches('\n').count();
        let mut replacement = String::from(REDACTION_PLACEHOLDER);
        replacement.extend(std::iter::repeat_n('\n', newlines));
        result.replace_range(start..end, &replacement);
    }

    result
}
