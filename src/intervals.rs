use crate::model::*;

// ── Interval algebra used by slot generation ─────────────────────

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Sort then merge. Convenience for unsorted inputs.
pub fn normalize(spans: &[Span]) -> Vec<Span> {
    let mut sorted = spans.to_vec();
    sorted.sort_by_key(|s| s.start);
    merge_overlapping(&sorted)
}

/// `base` minus `to_remove`. Both must be sorted by start; `to_remove` must be disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}

/// Cut `span` into back-to-back pieces of exactly `len`, starting at `span.start`.
/// A trailing remainder shorter than `len` is dropped.
pub fn chop(span: &Span, len: Ms) -> Vec<Span> {
    if len <= 0 {
        return Vec::new();
    }
    let mut pieces = Vec::new();
    let mut t = span.start;
    while t + len <= span.end {
        pieces.push(Span::new(t, t + len));
        t += len;
    }
    pieces
}

/// Intersection of `span` with `window`, if non-empty.
pub fn clamp(span: &Span, window: &Span) -> Option<Span> {
    let start = span.start.max(window.start);
    let end = span.end.min(window.end);
    (start < end).then(|| Span::new(start, end))
}
