//! Paragraph-aware text chunking
//!
//! Paragraphs (separated by blank lines) are packed greedily into chunks of
//! about `max_chars` characters. A paragraph that would overflow the chunk
//! but still fits within `max_chars * (1 + tolerance)` is kept and closes
//! the chunk; otherwise it starts the next one. Paragraphs are never split,
//! so one oversized paragraph becomes its own chunk.

/// Default allowance over `max_chars` before a paragraph moves to the next chunk.
pub const DEFAULT_TOLERANCE: f64 = 0.10;

/// Separator placed between paragraphs that share a chunk.
const PARAGRAPH_BREAK: &str = "\n\n";

/// Split `text` into paragraphs: runs of non-blank lines, trimmed.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n").trim().to_string());
    }
    out
}

/// Chunk `text` by paragraphs. Lengths are counted in characters.
pub fn split_by_paragraphs(text: &str, max_chars: usize, tolerance: f64) -> Vec<String> {
    let max_allowed = max_chars as f64 * (1.0 + tolerance);
    let separator_len = PARAGRAPH_BREAK.chars().count();

    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    for para in paragraphs(text) {
        let para_len = para.chars().count();

        if current.is_empty() {
            current.push(para);
            current_len = para_len;
            continue;
        }

        let new_len = current_len + separator_len + para_len;
        if current_len < max_chars && new_len <= max_chars {
            current.push(para);
            current_len = new_len;
        } else if current_len < max_chars && new_len as f64 <= max_allowed {
            current.push(para);
            chunks.push(current.join(PARAGRAPH_BREAK));
            current.clear();
            current_len = 0;
        } else {
            chunks.push(current.join(PARAGRAPH_BREAK));
            current = vec![para];
            current_len = para_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(PARAGRAPH_BREAK));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn para(c: char, n: usize) -> String {
        std::iter::repeat_n(c, n).collect()
    }

    #[test]
    fn empty_and_blank_text_yield_no_chunks() {
        assert!(split_by_paragraphs("", 100, DEFAULT_TOLERANCE).is_empty());
        assert!(split_by_paragraphs("\n  \n\t\n", 100, DEFAULT_TOLERANCE).is_empty());
    }

    #[test]
    fn small_paragraphs_share_a_chunk() {
        let text = "First paragraph.\n\nSecond one.\n\n\n  Third.  ";
        let chunks = split_by_paragraphs(text, 100, DEFAULT_TOLERANCE);
        assert_eq!(chunks, vec!["First paragraph.\n\nSecond one.\n\nThird."]);
    }

    #[test]
    fn lines_within_a_paragraph_stay_together() {
        let text = "line one\nline two\n\nnext";
        let chunks = split_by_paragraphs(text, 10, DEFAULT_TOLERANCE);
        assert_eq!(chunks, vec!["line one\nline two", "next"]);
    }

    #[test]
    fn overflow_within_tolerance_closes_chunk() {
        // 50 + 2 + 50 = 102 <= 110
        let text = format!("{}\n\n{}\n\n{}", para('a', 50), para('b', 50), para('c', 10));
        let chunks = split_by_paragraphs(&text, 100, DEFAULT_TOLERANCE);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{}\n\n{}", para('a', 50), para('b', 50)));
        assert_eq!(chunks[1], para('c', 10));
    }

    #[test]
    fn overflow_beyond_tolerance_starts_new_chunk() {
        // 50 + 2 + 60 = 112 > 110
        let text = format!("{}\n\n{}", para('a', 50), para('b', 60));
        let chunks = split_by_paragraphs(&text, 100, DEFAULT_TOLERANCE);
        assert_eq!(chunks, vec![para('a', 50), para('b', 60)]);
    }

    #[test]
    fn oversized_paragraph_is_its_own_chunk() {
        let text = format!("{}\n\n{}\n\n{}", para('a', 10), para('b', 500), para('c', 10));
        let chunks = split_by_paragraphs(&text, 100, DEFAULT_TOLERANCE);
        assert_eq!(chunks, vec![para('a', 10), para('b', 500), para('c', 10)]);
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        // 40 Cyrillic chars are 80 bytes; two of them plus the break fit in 90 chars
        let text = format!("{}\n\n{}", para('ж', 40), para('щ', 40));
        let chunks = split_by_paragraphs(&text, 90, 0.0);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn crlf_input_is_handled() {
        let chunks = split_by_paragraphs("one\r\n\r\ntwo\r\n", 5, 0.0);
        assert_eq!(chunks, vec!["one", "two"]);
    }
}
