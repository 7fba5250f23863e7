//! Boundary-aware sliding-window text chunker.
//!
//! Splits document body text into overlapping fragments that respect a
//! configurable `max_tokens` limit. Windows are cut at natural boundaries
//! where possible — a sentence end, a paragraph break, or a whitespace run
//! found within the final 20% of the window — so chunks rarely split a
//! sentence or word in half.
//!
//! The chunker is purely functional and deterministic: no I/O, no ids.
//! Re-chunking a fragment that already fits the limit returns it unchanged,
//! which makes multi-stage chunking (coarse pass plus a stricter pass under
//! an absolute hard cap) safe to compose.

/// Approximate chars-per-token ratio used for size estimation.
pub const CHARS_PER_TOKEN: usize = 4;

/// Split text into overlapping chunks of at most `max_tokens` estimated
/// tokens, with `overlap_tokens` of trailing context carried into the next
/// chunk. Returns fragments in original-text order with no empty entries;
/// whitespace-only input yields an empty vec.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN).max(1);
    let overlap_chars = overlap_tokens.saturating_mul(CHARS_PER_TOKEN);

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    // Work in char indices so window arithmetic never lands inside a
    // multi-byte UTF-8 sequence.
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= max_chars {
        return vec![trimmed.to_string()];
    }

    let total = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < total {
        let raw_end = (start + max_chars).min(total);
        let end = if raw_end < total {
            find_cut_point(&chars, start, raw_end)
        } else {
            raw_end
        };

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if end >= total {
            break;
        }

        // The +1 floor guarantees forward progress even when the overlap
        // is as large as the window itself.
        start = (start + 1).max(end.saturating_sub(overlap_chars));
    }

    chunks
}

/// Coarse pass at `max_tokens`, then a stricter re-chunk of any fragment
/// still exceeding `hard_cap_tokens`. Fragments already under the cap pass
/// through untouched.
pub fn chunk_with_hard_cap(
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
    hard_cap_tokens: usize,
) -> Vec<String> {
    let hard_cap_chars = hard_cap_tokens.saturating_mul(CHARS_PER_TOKEN).max(1);

    chunk_text(text, max_tokens, overlap_tokens)
        .into_iter()
        .flat_map(|fragment| {
            if fragment.chars().count() <= hard_cap_chars {
                vec![fragment]
            } else {
                chunk_text(&fragment, hard_cap_tokens, overlap_tokens.min(hard_cap_tokens / 2))
            }
        })
        .collect()
}

/// Search the final 20% of the window for the best natural boundary,
/// in priority order: sentence terminator followed by whitespace, blank
/// line, whitespace run. Falls back to the raw window edge.
fn find_cut_point(chars: &[char], start: usize, end: usize) -> usize {
    let window = end - start;
    let floor = end - (window / 5).max(1);

    // Only called with end < chars.len(), so chars[i + 1] is in bounds.
    // Sentence terminator followed by whitespace; cut after the terminator.
    for i in (floor..end).rev() {
        if matches!(chars[i], '.' | '!' | '?') && chars[i + 1].is_whitespace() {
            return i + 1;
        }
    }

    // Paragraph break.
    for i in (floor..end).rev() {
        if chars[i] == '\n' && chars[i + 1] == '\n' {
            return i;
        }
    }

    // Any whitespace run; cut after it so the next window starts on a word.
    for i in (floor..end).rev() {
        if chars[i].is_whitespace() {
            return i + 1;
        }
    }

    end
}
