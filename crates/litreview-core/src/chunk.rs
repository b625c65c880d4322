//! Overlapping boundary-aware text chunker.
//!
//! Splits an item's full text into [`Passage`]s of at most `chunk_size`
//! characters, where each passage repeats the last `chunk_overlap`
//! characters of its predecessor.
//!
//! # Algorithm
//!
//! 1. Work on `char`s so multi-byte text never splits inside a code point.
//! 2. For each window `[start, start + chunk_size)`, look for a cut point
//!    in the back half of the window, preferring in order: a blank line,
//!    a line break, the end of a sentence, any whitespace.
//! 3. Without any boundary, cut hard at `chunk_size`.
//! 4. The next window starts `chunk_overlap` characters before the cut.
//!
//! Identical `(text, chunk_size, chunk_overlap)` input always yields
//! identical passages. Every passage is an exact substring of the input,
//! so the original text is recovered by dropping the first
//! `chunk_overlap` characters of every passage after the first.
//!
//! # Example
//!
//! ```rust
//! use litreview_core::chunk::chunk_text;
//!
//! let passages = chunk_text("First paragraph.\n\nSecond paragraph.", 1024, 256);
//! assert_eq!(passages.len(), 1);
//! assert_eq!(passages[0].index, 0);
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Passage;

/// Split text into overlapping passages.
///
/// Empty input (or `chunk_size == 0`) yields no passages. An overlap that
/// is not smaller than `chunk_size` is clamped to `chunk_size - 1`.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Passage> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let overlap = chunk_overlap.min(chunk_size - 1);
    let mut passages = Vec::new();
    let mut start = 0;

    loop {
        let window_end = (start + chunk_size).min(chars.len());
        let end = if window_end == chars.len() {
            window_end
        } else {
            let earliest = (start + overlap + 1).max(start + chunk_size / 2);
            find_cut(&chars, earliest, window_end)
        };

        passages.push(Passage {
            index: passages.len(),
            start,
            end,
            text: chars[start..end].iter().collect(),
        });

        if end >= chars.len() {
            break;
        }
        // end > start + overlap, so start always advances.
        start = end - overlap;
    }

    passages
}

/// Boundary strength of cutting *before* `chars[pos]`.
fn boundary_rank(chars: &[char], pos: usize) -> u8 {
    let prev = chars[pos - 1];
    if prev == '\n' {
        if pos >= 2 && chars[pos - 2] == '\n' {
            return 4;
        }
        return 3;
    }
    if prev.is_whitespace() {
        if pos >= 2 && matches!(chars[pos - 2], '.' | '?' | '!') {
            return 2;
        }
        return 1;
    }
    0
}

/// Pick the strongest boundary in `[earliest, latest]`, rightmost on ties.
fn find_cut(chars: &[char], earliest: usize, latest: usize) -> usize {
    let mut best = latest;
    let mut best_rank = 0;
    for pos in (earliest.max(1)..=latest).rev() {
        let rank = boundary_rank(chars, pos);
        if rank > best_rank {
            best = pos;
            best_rank = rank;
            if rank == 4 {
                break;
            }
        }
    }
    best
}

fn references_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t#]*(?:\d+\.?[ \t]*)?(?:references|bibliography|literature cited|works cited)[ \t]*:?[ \t]*$",
        )
        .expect("static regex")
    })
}

/// Drop the trailing reference list from a full text.
///
/// Cuts at the last line that consists only of a references heading
/// (`References`, `REFERENCES`, `7. Bibliography`, ...). Text without such
/// a heading is returned unchanged.
pub fn strip_references(text: &str) -> &str {
    match references_heading().find_iter(text).last() {
        Some(m) => text[..m.start()].trim_end(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(passages: &[Passage], overlap: usize) -> String {
        let mut out = String::new();
        for (i, p) in passages.iter().enumerate() {
            if i == 0 {
                out.push_str(&p.text);
            } else {
                out.extend(p.text.chars().skip(overlap));
            }
        }
        out
    }

    fn sample_text() -> String {
        let mut text = String::new();
        for i in 0..40 {
            text.push_str(&format!(
                "Sentence number {i} talks about systematic reviews. It has a second clause here! "
            ));
            if i % 5 == 4 {
                text.push_str("\n\n");
            }
        }
        text
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 100, 10).is_empty());
    }

    #[test]
    fn test_zero_chunk_size() {
        assert!(chunk_text("abc", 0, 0).is_empty());
    }

    #[test]
    fn test_short_text_single_passage() {
        let passages = chunk_text("Hello, world!", 1024, 256);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].text, "Hello, world!");
        assert_eq!(passages[0].start, 0);
        assert_eq!(passages[0].end, 13);
    }

    #[test]
    fn test_length_bound_and_dense_indices() {
        let text = sample_text();
        let passages = chunk_text(&text, 200, 50);
        assert!(passages.len() > 5);
        for (i, p) in passages.iter().enumerate() {
            assert_eq!(p.index, i);
            assert!(p.text.chars().count() <= 200);
        }
    }

    #[test]
    fn test_reassembly_reconstructs_text() {
        let text = sample_text();
        for (size, overlap) in [(200, 50), (97, 0), (64, 63), (1024, 256)] {
            let passages = chunk_text(&text, size, overlap);
            assert_eq!(reassemble(&passages, overlap), text, "size={size} overlap={overlap}");
        }
    }

    #[test]
    fn test_consecutive_passages_overlap() {
        let text = sample_text();
        let passages = chunk_text(&text, 180, 40);
        for pair in passages.windows(2) {
            let tail: String = pair[0].text.chars().rev().take(40).collect::<Vec<_>>().into_iter().rev().collect();
            let head: String = pair[1].text.chars().take(40).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(70), "b ".repeat(60));
        let passages = chunk_text(&text, 100, 0);
        assert_eq!(passages[0].text, format!("{}\n\n", "a".repeat(70)));
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "x".repeat(250);
        let passages = chunk_text(&text, 100, 10);
        assert_eq!(passages[0].text.len(), 100);
        assert_eq!(passages[1].start, 90);
        assert_eq!(reassemble(&passages, 10), text);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Übersicht über Literatur – Ökologie, Ästhetik. ".repeat(30);
        let passages = chunk_text(&text, 64, 16);
        assert_eq!(reassemble(&passages, 16), text);
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text();
        assert_eq!(chunk_text(&text, 150, 30), chunk_text(&text, 150, 30));
    }

    #[test]
    fn test_overlap_clamped() {
        let passages = chunk_text("abcdefghij", 4, 10);
        assert_eq!(reassemble(&passages, 3), "abcdefghij");
    }

    #[test]
    fn test_strip_references() {
        let text = "Intro text.\n\nReferences\n[1] Smith, J. (2020).";
        assert_eq!(strip_references(text), "Intro text.");
    }

    #[test]
    fn test_strip_references_uses_last_heading() {
        let text = "We cite REFERENCES inline.\nREFERENCES\nbody mentioning things\n\n7. References\n[1] A.";
        assert_eq!(
            strip_references(text),
            "We cite REFERENCES inline.\nREFERENCES\nbody mentioning things"
        );
    }

    #[test]
    fn test_strip_references_without_heading() {
        let text = "No bibliography section in this one.";
        assert_eq!(strip_references(text), text);
    }
}
