use std::sync::OnceLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use conductor_core::types::{BlockId, ContextSegment, SegmentKind};

/// Get or initialize the tokenizer for cl100k_base.
fn tokenizer() -> &'static CoreBPE {
    static TOKENIZER: OnceLock<CoreBPE> = OnceLock::new();
    TOKENIZER.get_or_init(|| {
        tiktoken_rs::cl100k_base().expect("Failed to load cl100k_base tokenizer")
    })
}

/// Token count using BPE tokenization (cl100k_base).
pub fn estimate_tokens(text: &str) -> usize {
    tokenizer().encode_ordinary(text).len()
}

/// Token estimate for one segment, with 4 tokens of framing overhead.
pub fn estimate_segment_tokens(segment: &ContextSegment) -> usize {
    estimate_tokens(&segment.content) + 4
}

/// The running log of the current node.
///
/// Append-only during normal execution; the oldest segments are dropped
/// when a ceiling is exceeded, but the newest `keep` segments never are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPayload {
    segments: Vec<ContextSegment>,
    next_seq: u64,
}

impl ExecutionPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a payload from segments carried over from a parent node.
    pub fn seeded(segments: Vec<ContextSegment>) -> Self {
        let next_seq = segments
            .iter()
            .filter_map(|s| s.id.strip_prefix("seg-")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            .max(segments.len() as u64);
        Self { segments, next_seq }
    }

    /// Append a segment and return it.
    pub fn push(
        &mut self,
        kind: SegmentKind,
        content: impl Into<String>,
        block_id: Option<&str>,
    ) -> &ContextSegment {
        self.next_seq += 1;
        self.segments.push(ContextSegment {
            id: format!("seg-{}", self.next_seq),
            kind,
            content: content.into(),
            block_id: block_id.map(str::to_string),
            timestamp: Utc::now(),
        });
        &self.segments[self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[ContextSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&ContextSegment> {
        self.segments.last()
    }

    /// The last `n` segments, oldest first.
    pub fn trailing(&self, n: usize) -> &[ContextSegment] {
        let start = self.segments.len().saturating_sub(n);
        &self.segments[start..]
    }

    /// Most recent OUTPUT segment recorded.
    pub fn last_output(&self) -> Option<&ContextSegment> {
        self.segments
            .iter()
            .rev()
            .find(|s| s.kind == SegmentKind::Output)
    }

    /// Remove the most recent OUTPUT segment produced by `block_id`, leaving
    /// everything else in place.
    pub fn remove_last_output_for(&mut self, block_id: &BlockId) -> Option<ContextSegment> {
        let idx = self.segments.iter().rposition(|s| {
            s.kind == SegmentKind::Output && s.block_id.as_ref() == Some(block_id)
        })?;
        Some(self.segments.remove(idx))
    }

    pub fn total_tokens(&self) -> usize {
        self.segments.iter().map(estimate_segment_tokens).sum()
    }

    /// Drop the oldest segments while over `max_segments` or `max_tokens`
    /// (`0` = no token ceiling). The newest `keep` segments (at least 1) are
    /// never removed. Returns the number of segments removed.
    pub fn prune(&mut self, max_segments: usize, max_tokens: usize, keep: usize) -> usize {
        let keep = keep.max(1);
        let mut removed = 0;

        loop {
            let len = self.segments.len();
            if len <= keep {
                break;
            }
            let over_count = len > max_segments;
            let over_tokens = max_tokens > 0 && self.total_tokens() > max_tokens;
            if !over_count && !over_tokens {
                break;
            }
            self.segments.remove(0);
            removed += 1;
        }

        removed
    }
}
