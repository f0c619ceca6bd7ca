//! Fuzzy Patch Locator
//!
//! Finds the span of a document that a modification point's excerpt refers
//! to, resolves conflicts between spans of the same document and applies the
//! surviving patches.
//!
//! Location runs in three passes, stopping at the first hit:
//!
//! 1. exact substring match (confidence 1.0)
//! 2. exact match after collapsing whitespace runs (confidence 1.0)
//! 3. windowed edit-distance search over the whitespace-collapsed text
//!
//! The fuzzy pass scores windows of `excerpt_len × (1 ± tolerance)`
//! characters with normalized Levenshtein similarity
//! `1 - distance / max(window_len, excerpt_len)`. Start positions are first
//! sampled with a stride of `max(1, excerpt_len / 20)`, then every start
//! within one stride of the best coarse hit is scored. Ties keep the
//! earliest span, so results are deterministic.
//!
//! The fuzzy pass is CPU-bound and can run for seconds on large documents.
//! A locator built with [`PatchLocator::with_cancellation`] checks its token
//! before every start position and gives up once it is cancelled.

use concord_utils::error::EngineError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{PatchCandidate, SupersededPatch};

/// A located span: byte offsets into the document, on char boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct PatchLocator {
    threshold: f64,
    tolerance: f64,
    cancel: Option<CancellationToken>,
}

/// Whitespace-collapsed view of a text, remembering where each char came
/// from. A collapsed space covers the whole whitespace run it replaced.
struct View {
    chars: Vec<char>,
    spans: Vec<(usize, usize)>,
}

impl View {
    fn new(text: &str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut spans = Vec::with_capacity(text.len());
        let mut pending_ws: Option<(usize, usize)> = None;

        for (idx, c) in text.char_indices() {
            let end = idx + c.len_utf8();
            if c.is_whitespace() {
                pending_ws = Some(pending_ws.map_or((idx, end), |(s, _)| (s, end)));
                continue;
            }
            if let Some(ws) = pending_ws.take()
                && !chars.is_empty()
            {
                chars.push(' ');
                spans.push(ws);
            }
            chars.push(c);
            spans.push((idx, end));
        }

        Self { chars, spans }
    }

    fn byte_range(&self, start: usize, len: usize) -> (usize, usize) {
        (self.spans[start].0, self.spans[start + len - 1].1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    start: usize,
    len: usize,
    score: f64,
}

impl Hit {
    fn beats(&self, other: &Hit) -> bool {
        self.score > other.score || (self.score == other.score && self.start < other.start)
    }
}

impl PatchLocator {
    #[must_use]
    pub fn new(threshold: f64, tolerance: f64) -> Self {
        Self {
            threshold,
            tolerance,
            cancel: None,
        }
    }

    /// Stop the fuzzy pass as soon as `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Locate `excerpt` in `full_text`.
    ///
    /// # Errors
    ///
    /// `EngineError::PatchUnresolved` with the best similarity seen when no
    /// span reaches the threshold, or with a score of zero when the locator
    /// was cancelled during the fuzzy pass.
    pub fn locate(&self, full_text: &str, excerpt: &str) -> Result<Location, EngineError> {
        let unresolved = |best_score: f64| EngineError::PatchUnresolved {
            best_score,
            threshold: self.threshold,
        };

        if excerpt.trim().is_empty() {
            return Err(unresolved(0.0));
        }

        if let Some(start) = full_text.find(excerpt) {
            return Ok(Location {
                start,
                end: start + excerpt.len(),
                confidence: 1.0,
            });
        }

        let view = View::new(full_text);
        let needle = View::new(excerpt).chars;

        if let Some(start) = view
            .chars
            .windows(needle.len())
            .position(|w| w == needle.as_slice())
        {
            let (start, end) = view.byte_range(start, needle.len());
            debug!(start, end, "Excerpt matched after whitespace normalization");
            return Ok(Location {
                start,
                end,
                confidence: 1.0,
            });
        }

        let Some(hit) = self.best_window(&view.chars, &needle) else {
            return Err(unresolved(0.0));
        };
        if hit.score < self.threshold {
            debug!(
                best_score = hit.score,
                threshold = self.threshold,
                "No span reached the match threshold"
            );
            return Err(unresolved(hit.score));
        }

        let (start, len) = trim_window(&view.chars, hit.start, hit.len);
        let (start, end) = view.byte_range(start, len);
        debug!(start, end, confidence = hit.score, "Excerpt matched fuzzily");
        Ok(Location {
            start,
            end,
            confidence: hit.score,
        })
    }

    fn best_window(&self, text: &[char], needle: &[char]) -> Option<Hit> {
        let n = text.len();
        let m = needle.len();
        if n == 0 || m == 0 {
            return None;
        }

        let min_len = ((m as f64 * (1.0 - self.tolerance)).floor() as usize).clamp(1, n);
        let max_len = ((m as f64 * (1.0 + self.tolerance)).ceil() as usize).clamp(min_len, n);
        let stride = (m / 20).max(1);
        let last_start = n - min_len;

        let mut best: Option<Hit> = None;
        // false once cancelled
        let consider = |start: usize, best: &mut Option<Hit>| {
            if self.is_cancelled() {
                return false;
            }
            if let Some(hit) = score_from(text, needle, start, min_len, max_len)
                && best.is_none_or(|b| hit.beats(&b))
            {
                *best = Some(hit);
            }
            true
        };

        let mut start = 0;
        while start <= last_start {
            if !consider(start, &mut best) {
                debug!(start, "Fuzzy search cancelled");
                return None;
            }
            start += stride;
        }
        if last_start % stride != 0 && !consider(last_start, &mut best) {
            return None;
        }

        if stride > 1
            && let Some(coarse) = best
        {
            let lo = coarse.start.saturating_sub(stride - 1);
            let hi = (coarse.start + stride - 1).min(last_start);
            for start in lo..=hi {
                if !consider(start, &mut best) {
                    return None;
                }
            }
        }

        best
    }
}

/// Best window length for windows starting at `start`.
fn score_from(
    text: &[char],
    needle: &[char],
    start: usize,
    min_len: usize,
    max_len: usize,
) -> Option<Hit> {
    let max_len = max_len.min(text.len() - start);
    if max_len < min_len {
        return None;
    }

    let m = needle.len();
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut cur = vec![0usize; m + 1];
    let mut best: Option<Hit> = None;

    for j in 1..=max_len {
        let c = text[start + j - 1];
        cur[0] = j;
        for i in 1..=m {
            let substitution = prev[i - 1] + usize::from(needle[i - 1] != c);
            cur[i] = substitution.min(prev[i] + 1).min(cur[i - 1] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);

        if j >= min_len {
            let score = 1.0 - prev[m] as f64 / j.max(m) as f64;
            if best.is_none_or(|b| score > b.score) {
                best = Some(Hit {
                    start,
                    len: j,
                    score,
                });
            }
        }
    }

    best
}

/// Drop collapsed whitespace at either edge of a window.
fn trim_window(text: &[char], mut start: usize, mut len: usize) -> (usize, usize) {
    while len > 1 && text[start] == ' ' {
        start += 1;
        len -= 1;
    }
    while len > 1 && text[start + len - 1] == ' ' {
        len -= 1;
    }
    (start, len)
}

/// Split candidates into non-conflicting accepted patches (sorted by start)
/// and superseded ones.
///
/// Candidates are considered by confidence, highest first; equal confidence
/// favors the earlier span, then the lower point index. A candidate that
/// intersects or touches an already accepted patch is superseded by it.
#[must_use]
pub fn resolve_overlaps(
    mut candidates: Vec<PatchCandidate>,
) -> (Vec<PatchCandidate>, Vec<SupersededPatch>) {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.start.cmp(&b.start))
            .then(a.point_index.cmp(&b.point_index))
    });

    let mut accepted: Vec<PatchCandidate> = Vec::with_capacity(candidates.len());
    let mut superseded = Vec::new();
    for candidate in candidates {
        match accepted.iter().find(|a| a.conflicts_with(&candidate)) {
            Some(winner) => {
                debug!(
                    point_index = candidate.point_index,
                    superseded_by = winner.point_index,
                    "Patch superseded by an overlapping patch"
                );
                superseded.push(SupersededPatch {
                    superseded_by: winner.point_index,
                    patch: candidate,
                });
            }
            None => accepted.push(candidate),
        }
    }

    accepted.sort_by_key(|p| p.start);
    superseded.sort_by_key(|s| s.patch.point_index);
    (accepted, superseded)
}

/// Replace each accepted span of `original`. Text outside the spans is
/// copied unchanged.
///
/// Offsets always refer to `original`, so applying the same patches to the
/// same original is deterministic. Patches that overlap an earlier one or do
/// not fit `original` are skipped.
#[must_use]
pub fn apply_patches(original: &str, accepted: &[PatchCandidate]) -> String {
    let mut sorted: Vec<&PatchCandidate> = accepted.iter().collect();
    sorted.sort_by_key(|p| p.start);

    let mut out = String::with_capacity(original.len());
    let mut cursor = 0;
    for patch in sorted {
        let Some(kept) = original.get(cursor..patch.start) else {
            warn!(
                point_index = patch.point_index,
                start = patch.start,
                "Skipping patch that overlaps an earlier patch or is out of bounds"
            );
            continue;
        };
        if original.get(patch.start..patch.end).is_none() {
            warn!(
                point_index = patch.point_index,
                start = patch.start,
                end = patch.end,
                "Skipping patch with an invalid span"
            );
            continue;
        }
        out.push_str(kept);
        out.push_str(&patch.replacement);
        cursor = patch.end;
    }
    out.push_str(&original[cursor..]);
    out
}

/// Cut `text` to at most `budget` chars on a char boundary. Returns whether
/// anything was cut.
#[must_use]
pub fn truncate_to_budget(text: &str, budget: usize) -> (&str, bool) {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}
