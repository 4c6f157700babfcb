//! Invariant sweep over the document chunker.

use fireside::services::chunker::{MIN_CHUNK_TOKENS, chunk_document};

fn prose(sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "Sentence number {} talks about something moderately interesting in the corpus. ",
                i
            )
        })
        .collect()
}

#[test]
fn test_token_budget_holds_across_sizes() {
    let text = prose(300);
    for (chunk_size, overlap) in [(512usize, 50usize), (128, 20), (64, 10)] {
        let chunks = chunk_document(&text, chunk_size, overlap, None);
        assert!(!chunks.is_empty(), "no chunks at size {}", chunk_size);
        for chunk in &chunks {
            assert!(chunk.token_count > 0);
            assert!(
                chunk.token_count <= chunk_size + overlap,
                "size {} overlap {}: chunk has {} tokens",
                chunk_size,
                overlap,
                chunk.token_count
            );
        }
    }
}

#[test]
fn test_chunks_preserve_document_order() {
    let text = prose(300);
    let chunks = chunk_document(&text, 128, 20, None);
    assert!(chunks.len() > 2);

    for pair in chunks.windows(2) {
        assert!(
            pair[0].start_char <= pair[1].start_char,
            "offsets went backwards: {} then {}",
            pair[0].start_char,
            pair[1].start_char
        );
    }
}

#[test]
fn test_chunk_content_appears_in_source() {
    // Modulo whitespace normalization, every chunk's words come from the
    // source text in order.
    let text = prose(120);
    let normalized_source = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let chunks = chunk_document(&text, 128, 20, None);
    assert!(!chunks.is_empty());

    for chunk in &chunks {
        let normalized_chunk = chunk
            .content
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        assert!(
            normalized_source.contains(&normalized_chunk),
            "chunk not found in source: {:.60}…",
            normalized_chunk
        );
    }
}

#[test]
fn test_no_token_gaps_between_chunks() {
    // The concatenation covers the input with no interior gaps. Only the
    // trailing sub-minimum runt may be dropped, so every word up to the
    // midpoint must appear in some chunk.
    let text = prose(200);
    let chunks = chunk_document(&text, 128, 20, None);
    let combined: String = chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    for word in text[..text.len() / 2].split_whitespace() {
        assert!(combined.contains(word), "word lost: {}", word);
    }
}

#[test]
fn test_trailing_runt_is_dropped() {
    let tiny = "Too short to keep.";
    assert!(chunk_document(tiny, 512, 50, None).is_empty());

    let text = prose(100);
    for chunk in chunk_document(&text, 512, 50, None) {
        assert!(chunk.token_count >= MIN_CHUNK_TOKENS);
    }
}

#[test]
fn test_paged_chunking_tags_every_chunk() {
    let page = prose(40);
    let pages: Vec<String> = vec![page.clone(), page.clone(), page];
    let text = pages.join("\n\n");
    let chunks = chunk_document(&text, 128, 20, Some(&pages));

    assert!(!chunks.is_empty());
    for chunk in &chunks {
        let page = chunk.page_number.expect("paged chunk without page number");
        assert!((1..=3).contains(&page));
    }
}
