//! Splits document text into ordered, overlapping chunks for embedding.
//!
//! Semantic-first: sentences are greedily packed up to the chunk budget,
//! with the tail of each chunk (whole sentences, up to the overlap budget)
//! seeding the next. Oversized sentences fall back to a word-level split
//! with the same rule.

use regex::Regex;
use std::sync::OnceLock;

use crate::services::tokens;

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
/// Trailing buffers below this many tokens are dropped.
pub const MIN_CHUNK_TOKENS: usize = 50;

/// Threshold below which unpunctuated text is kept whole instead of being
/// re-split by paragraph or line.
const FALLBACK_SPLIT_MIN_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub token_count: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub page_number: Option<i32>,
}

/// Split document text into chunks.
///
/// When `pages` is supplied each page is chunked independently, preserving
/// the running character offset across pages (the two-character page
/// separator counts), and every chunk carries its page number.
pub fn chunk_document(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    pages: Option<&[String]>,
) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if let Some(pages) = pages {
        if !pages.is_empty() {
            return chunk_with_pages(pages, chunk_size, overlap);
        }
    }

    chunk_text(text, chunk_size, overlap, 0)
}

fn chunk_with_pages(pages: &[String], chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut offset = 0usize;

    for (page_idx, page_text) in pages.iter().enumerate() {
        if page_text.trim().is_empty() {
            offset += page_text.len() + 2;
            continue;
        }

        let mut page_chunks = chunk_text(page_text, chunk_size, overlap, offset);
        for chunk in &mut page_chunks {
            chunk.page_number = Some(page_idx as i32 + 1);
        }
        chunks.extend(page_chunks);

        // Account for the page separator.
        offset += page_text.len() + 2;
    }

    chunks
}

fn chunk_text(text: &str, chunk_size: usize, overlap: usize, start_offset: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let text = text.trim();
    if text.is_empty() {
        return chunks;
    }

    let sentences = split_into_sentences(text);

    let mut current: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;
    let mut current_start = start_offset;

    for sentence in sentences {
        let sentence_tokens = tokens::count_tokens(&sentence);

        // A single sentence over the budget is word-split on its own.
        if sentence_tokens > chunk_size {
            if !current.is_empty() {
                let content = current.join(" ");
                chunks.push(make_chunk(content, current_tokens, current_start));
            }

            chunks.extend(split_large_text(
                &sentence,
                chunk_size,
                overlap,
                start_offset,
            ));

            let sentence_end = text
                .find(sentence.as_str())
                .map(|pos| pos + sentence.len())
                .unwrap_or(0);
            current = Vec::new();
            current_tokens = 0;
            current_start = start_offset + sentence_end;
            continue;
        }

        if current_tokens + sentence_tokens > chunk_size && !current.is_empty() {
            let content = current.join(" ");
            let content_len = content.len();
            chunks.push(make_chunk(content, current_tokens, current_start));

            // Seed the next buffer with trailing whole sentences that fit
            // inside the overlap budget.
            let mut overlap_sentences: Vec<String> = Vec::new();
            let mut overlap_tokens = 0usize;
            for s in current.iter().rev() {
                let s_tokens = tokens::count_tokens(s);
                if overlap_tokens + s_tokens <= overlap {
                    overlap_sentences.insert(0, s.clone());
                    overlap_tokens += s_tokens;
                } else {
                    break;
                }
            }

            let overlap_len = overlap_sentences.join(" ").len();
            current = overlap_sentences;
            current_tokens = overlap_tokens;
            current_start += content_len.saturating_sub(overlap_len);
        }

        current.push(sentence);
        current_tokens += sentence_tokens;
    }

    if !current.is_empty() {
        let content = current.join(" ");
        if tokens::count_tokens(&content) >= MIN_CHUNK_TOKENS {
            chunks.push(make_chunk(content, current_tokens, current_start));
        }
    }

    chunks
}

fn make_chunk(content: String, token_count: usize, start_char: usize) -> Chunk {
    let end_char = start_char + content.len();
    Chunk {
        content,
        token_count,
        start_char,
        end_char,
        page_number: None,
    }
}

/// Word-level greedy split for sentences larger than the chunk budget.
fn split_large_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    start_offset: usize,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let words: Vec<&str> = text.split_whitespace().collect();

    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;
    let mut current_start = start_offset;

    for word in words {
        let word_tokens = tokens::count_tokens(&format!("{} ", word));

        if current_tokens + word_tokens > chunk_size && !current.is_empty() {
            let content = current.join(" ");
            let content_len = content.len();
            chunks.push(make_chunk(content, current_tokens, current_start));

            let mut overlap_words: Vec<&str> = Vec::new();
            let mut overlap_tokens = 0usize;
            for w in current.iter().rev() {
                let w_tokens = tokens::count_tokens(&format!("{} ", w));
                if overlap_tokens + w_tokens <= overlap {
                    overlap_words.insert(0, w);
                    overlap_tokens += w_tokens;
                } else {
                    break;
                }
            }

            let overlap_len = overlap_words.join(" ").len();
            current = overlap_words;
            current_tokens = overlap_tokens;
            current_start += content_len.saturating_sub(overlap_len);
        }

        current.push(word);
        current_tokens += word_tokens;
    }

    if !current.is_empty() {
        let content = current.join(" ");
        chunks.push(make_chunk(content, current_tokens, current_start));
    }

    chunks
}

/// Split text into sentences at terminator-whitespace-capital boundaries.
///
/// Unpunctuated input of ≥ 500 chars falls back to paragraph, then line
/// splitting so the greedy packer still has units to work with.
fn split_into_sentences(text: &str) -> Vec<String> {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| Regex::new(r"[.!?]\s+[A-Z]").expect("sentence pattern"));

    let mut sentences = Vec::new();
    let mut start = 0usize;
    for m in boundary.find_iter(text) {
        // Keep the terminator with the left sentence; the capital opens
        // the next one.
        let split_at = m.start() + 1;
        let piece = text[start..split_at].trim();
        if !piece.is_empty() {
            sentences.push(piece.to_string());
        }
        let capital_offset = text[m.start()..m.end()]
            .char_indices()
            .last()
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        start = m.start() + capital_offset;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    if sentences.len() <= 1 && text.len() > FALLBACK_SPLIT_MIN_CHARS {
        let paragraphs: Vec<String> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        if paragraphs.len() > 1 {
            return paragraphs;
        }

        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        if lines.len() > 1 {
            return lines;
        }
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(chunk_document("", 512, 50, None).is_empty());
        assert!(chunk_document("   \n ", 512, 50, None).is_empty());
    }

    #[test]
    fn test_short_text_below_minimum_is_dropped() {
        let chunks = chunk_document("The capital of France is Paris.", 512, 50, None);
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_single_chunk_document() {
        // ~100 words of prose comfortably clears the minimum and fits one chunk.
        let text = format!("{}.", words(100));
        let chunks = chunk_document(&text, 512, 50, None);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].token_count >= MIN_CHUNK_TOKENS);
        assert_eq!(chunks[0].start_char, 0);
    }

    #[test]
    fn test_chunks_are_ordered_and_bounded() {
        let sentence = "This is a reasonably sized sentence with several words in it. ";
        let text = sentence.repeat(200);
        let chunk_size = 128;
        let overlap = 20;
        let chunks = chunk_document(&text, chunk_size, overlap, None);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[0].start_char <= pair[1].start_char);
        }
        for chunk in &chunks {
            assert!(chunk.token_count > 0);
            assert!(
                chunk.token_count <= chunk_size + overlap,
                "chunk of {} tokens exceeds budget",
                chunk.token_count
            );
        }
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let text: String = (0..100)
            .map(|i| format!("Numbered sentence {} sits in the middle of the document. ", i))
            .collect();
        let chunks = chunk_document(&text, 100, 30, None);
        assert!(chunks.len() > 1);

        // The seed of chunk N+1 is the tail of chunk N, so the second
        // chunk's opening sentence already appeared in the first chunk.
        let first = &chunks[0].content;
        let second = &chunks[1].content;
        let boundary = second.find(". ").expect("second chunk has sentences");
        let opening = &second[..boundary + 1];
        assert!(
            first.contains(opening),
            "first chunk does not contain the overlap seed: {:?}",
            opening
        );
    }

    #[test]
    fn test_oversized_sentence_is_word_split() {
        // One giant "sentence" with no terminators, longer than the budget.
        let text = words(2000);
        let chunks = chunk_document(&text, 100, 10, None);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 110);
        }
    }

    #[test]
    fn test_paragraph_fallback_for_unpunctuated_text() {
        let para = words(80);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        let chunks = chunk_document(&text, 512, 50, None);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_pages_carry_page_numbers_and_offsets() {
        let page = format!("{}.", words(120));
        let pages = vec![page.clone(), page.clone()];
        let full_text = pages.join("\n\n");
        let chunks = chunk_document(&full_text, 512, 50, Some(&pages));

        assert!(!chunks.is_empty());
        assert_eq!(chunks.first().unwrap().page_number, Some(1));
        assert_eq!(chunks.last().unwrap().page_number, Some(2));

        // Page-2 chunks start after page 1 plus the separator.
        let page2_start = chunks
            .iter()
            .find(|c| c.page_number == Some(2))
            .unwrap()
            .start_char;
        assert_eq!(page2_start, page.len() + 2);
    }

    #[test]
    fn test_empty_pages_are_skipped_but_advance_offset() {
        let page = format!("{}.", words(120));
        let pages = vec![String::new(), page.clone()];
        let chunks = chunk_document(&page, 512, 50, Some(&pages));
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.page_number == Some(2)));
        assert_eq!(chunks[0].start_char, 2);
    }

    #[test]
    fn test_sentence_split_keeps_terminators() {
        let text = "First sentence here. Second one follows! Third asks? Fourth ends.";
        let sentences = split_into_sentences(text);
        assert_eq!(sentences.len(), 4);
        assert_eq!(sentences[0], "First sentence here.");
        assert_eq!(sentences[2], "Third asks?");
    }
}
