//! Batch ID Chunking (C9): splits a caller-supplied ID list into
//! fixed-size chunks, deduplicating while preserving first-occurrence
//! order, and dispatches one request per chunk with progress reporting
//! (spec §4.6).

use crate::client::Client;
use crate::error::Result;
use crate::request::RequestDescriptor;

/// Emitted after each chunk's request completes.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    pub completed_batches: usize,
    pub total_batches: usize,
    pub current_batch_size: usize,
}

/// Deduplicates `ids` (first occurrence wins) and splits the result into
/// chunks of at most `chunk_size` (spec §4.6 example:
/// `["a","b","a","c","b","d","e"]` with `chunk_size = 2` produces
/// `[["a","b"], ["c","d"], ["e"]]`).
pub fn chunk_ids(ids: &[String], chunk_size: usize) -> Vec<Vec<String>> {
    assert!(chunk_size > 0, "chunk_size must be greater than zero");

    let mut seen = std::collections::HashSet::new();
    let deduped: Vec<String> = ids
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect();

    deduped
        .chunks(chunk_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Dispatches `build_request` once per chunk of `ids`, in order, failing
/// fast on the first chunk that errors (spec §4.6: partial progress is not
/// rolled back, but no further chunks are attempted after a failure).
/// `on_progress` is called after every chunk, including the failing one.
pub async fn run_batch<T>(
    client: &Client,
    ids: &[String],
    chunk_size: usize,
    build_request: impl Fn(&[String]) -> RequestDescriptor,
    decode: impl Fn(bytes::Bytes) -> Result<Vec<T>>,
    mut on_progress: impl FnMut(BatchProgress),
) -> Result<Vec<T>> {
    let chunks = chunk_ids(ids, chunk_size);
    let total_batches = chunks.len();
    let mut results = Vec::with_capacity(ids.len());

    for (completed_batches, chunk) in chunks.iter().enumerate() {
        let descriptor = build_request(chunk);
        let outcome = client.request(descriptor).await.and_then(&decode);

        on_progress(BatchProgress {
            completed_batches: completed_batches + 1,
            total_batches,
            current_batch_size: chunk.len(),
        });

        results.extend(outcome?);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dedups_first_occurrence_and_chunks() {
        let input = ids(&["a", "b", "a", "c", "b", "d", "e"]);
        let chunks = chunk_ids(&input, 2);
        assert_eq!(
            chunks,
            vec![
                ids(&["a", "b"]),
                ids(&["c", "d"]),
                ids(&["e"]),
            ]
        );
    }

    #[test]
    fn single_chunk_when_chunk_size_exceeds_input() {
        let input = ids(&["a", "b"]);
        assert_eq!(chunk_ids(&input, 50), vec![ids(&["a", "b"])]);
    }

    #[test]
    fn empty_input_produces_no_chunks() {
        let input: Vec<String> = Vec::new();
        assert!(chunk_ids(&input, 2).is_empty());
    }
}
