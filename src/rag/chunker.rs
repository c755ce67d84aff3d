//! Clause segmentation.
//!
//! The default [`ClauseSegmenter`] runs two deterministic passes:
//! - Structural: split wherever a line starts with a numbered heading
//!   (`12. Confidentiality`). Used whenever it yields more than one clause.
//! - Paragraph packing: split on blank lines and greedily pack paragraphs
//!   into chunks of at most `max_tokens` cl100k tokens. A single paragraph
//!   larger than the budget becomes its own chunk.
//!
//! Packed chunks are slices of the source text, so paragraph separators
//! survive and re-splitting a returned chunk yields it unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::debug;

use super::types::Clause;

pub const DEFAULT_MAX_TOKENS: usize = 512;

static CLAUSE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\d+\.\s[A-Z]").unwrap());

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

static TOKENIZER: Lazy<CoreBPE> =
    Lazy::new(|| cl100k_base().expect("cl100k_base vocabulary is bundled with tiktoken-rs"));

/// Strategy for turning document text into ordered clause strings.
///
/// Implementations must return non-empty, trimmed strings in source order.
pub trait Segmenter: Send + Sync {
    fn split(&self, text: &str) -> Vec<String>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationPass {
    Numbered,
    Paragraphs,
}

pub struct ClauseSegmenter {
    max_tokens: usize,
}

impl Default for ClauseSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl ClauseSegmenter {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Split `text` and report which pass produced the result.
    pub fn split_with_pass(&self, text: &str) -> (Vec<String>, SegmentationPass) {
        let numbered = split_numbered(text);
        if numbered.len() > 1 {
            return (
                numbered.into_iter().map(str::to_string).collect(),
                SegmentationPass::Numbered,
            );
        }

        (self.pack_paragraphs(text), SegmentationPass::Paragraphs)
    }

    fn pack_paragraphs(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Option<(usize, usize)> = None;
        let mut current_tokens = 0;

        for (start, end) in paragraph_spans(text) {
            let tokens = count_tokens(&text[start..end]);
            match current {
                Some((chunk_start, _)) if current_tokens + tokens <= self.max_tokens => {
                    current = Some((chunk_start, end));
                    current_tokens += tokens;
                }
                Some((chunk_start, chunk_end)) => {
                    chunks.push(text[chunk_start..chunk_end].to_string());
                    current = Some((start, end));
                    current_tokens = tokens;
                }
                None => {
                    current = Some((start, end));
                    current_tokens = tokens;
                }
            }
        }

        if let Some((chunk_start, chunk_end)) = current {
            chunks.push(text[chunk_start..chunk_end].to_string());
        }

        chunks
    }
}

impl Segmenter for ClauseSegmenter {
    fn split(&self, text: &str) -> Vec<String> {
        self.split_with_pass(text).0
    }

    fn name(&self) -> &'static str {
        "numbered-clauses"
    }
}

/// Turns document text into positioned [`Clause`]s using a pluggable [`Segmenter`].
#[derive(Clone)]
pub struct Chunker {
    segmenter: Arc<dyn Segmenter>,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(Arc::new(ClauseSegmenter::default()))
    }
}

impl Chunker {
    pub fn new(segmenter: Arc<dyn Segmenter>) -> Self {
        Self { segmenter }
    }

    pub fn from_tokens(max_tokens: usize) -> Self {
        Self::new(Arc::new(ClauseSegmenter::new(max_tokens)))
    }

    pub fn chunk(&self, text: &str) -> Vec<Clause> {
        let clauses: Vec<Clause> = self
            .segmenter
            .split(text)
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(position, text)| Clause { position, text })
            .collect();

        debug!(
            segmenter = self.segmenter.name(),
            clauses = clauses.len(),
            "document segmented"
        );
        clauses
    }
}

/// Number of cl100k BPE tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    TOKENIZER.encode_ordinary(text).len()
}

fn split_numbered(text: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = CLAUSE_START.find_iter(text).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            text[start..end].trim()
        })
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Byte spans of the trimmed, non-empty paragraphs of `text`.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;

    for m in PARAGRAPH_BREAK.find_iter(text) {
        push_trimmed(text, start, m.start(), &mut spans);
        start = m.end();
    }
    push_trimmed(text, start, text.len(), &mut spans);

    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = slice.len() - slice.trim_start().len();
    spans.push((start + lead, start + lead + trimmed.len()));
}
