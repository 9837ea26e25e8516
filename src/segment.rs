//! Overlapping-window text segmenter.
//!
//! Splits extracted document text into chunks of roughly `target_size`
//! characters, with `overlap` characters shared between neighbours so that
//! no statement is stranded at a cut point. Cut points prefer structural
//! section banners (`===`), then sentence-terminating punctuation, falling
//! back to a hard cut at the window edge.
//!
//! The segmenter is stateless: the same input always yields the same
//! chunks, and positions are counted in characters (never bytes) so
//! multi-byte text cannot be split inside a code point.

/// Structural section banner emitted by the extractors.
const SECTION_MARKER: [char; 3] = ['=', '=', '='];

/// How far back from the window edge the sentence scan may reach.
const SENTENCE_SCAN_WINDOW: usize = 200;

/// Split `text` into overlapping chunks.
///
/// Requires `0 < overlap < target_size`. Empty input yields an empty
/// vector, and input no longer than `target_size` yields exactly one
/// chunk (whitespace-trimmed).
///
/// # Algorithm
///
/// Scanning forward from position 0, each window ends at
/// `start + target_size` by default. If a section banner begins within
/// 1.5× `target_size` of the window start, the cut snaps to just before
/// the banner. Otherwise the scan walks backward from the window edge
/// (at most [`SENTENCE_SCAN_WINDOW`] characters) looking for `.`, `!`,
/// `?`, or a newline, and cuts just after it. The next window starts
/// `overlap` characters before the cut.
pub fn segment(text: &str, target_size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(
        overlap > 0 && overlap < target_size,
        "segment requires 0 < overlap < target_size"
    );

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        // May exceed `len`; the slice below clamps, but the advance uses
        // the unclamped value so the scan always makes progress.
        let mut end = start + target_size;

        if end < len {
            if let Some(snap) = snap_end(&chars, start, end, target_size) {
                if snap > start + overlap {
                    end = snap;
                }
            }
        }

        let piece: String = chars[start..end.min(len)].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        start = end - overlap;
    }

    chunks
}

/// Find a better cut point than the default window edge, if one exists.
fn snap_end(chars: &[char], start: usize, default_end: usize, target_size: usize) -> Option<usize> {
    if let Some(marker) = find_section_marker(chars, start, start + target_size * 3 / 2) {
        return Some(marker);
    }

    let floor = start.max((start + target_size).saturating_sub(SENTENCE_SCAN_WINDOW));
    for i in (floor + 1..=default_end).rev() {
        if matches!(chars[i], '.' | '!' | '?' | '\n') {
            return Some(i + 1);
        }
    }

    None
}

/// First position after `start` where a section banner begins, bounded by
/// `limit`. Returns the index of the banner's first character so the cut
/// lands just before it.
fn find_section_marker(chars: &[char], start: usize, limit: usize) -> Option<usize> {
    let hi = limit.min(chars.len());
    if hi <= start + 1 + SECTION_MARKER.len() {
        return None;
    }
    (start + 1..hi - SECTION_MARKER.len())
        .find(|&p| chars[p..p + SECTION_MARKER.len()] == SECTION_MARKER)
}
