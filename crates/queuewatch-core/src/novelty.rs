//! Message novelty tracking.
//!
//! A [`NoveltyTracker`] keeps a single watermark: the highest message id
//! already processed in the current surveillance session. A candidate is new
//! iff its id is strictly greater than the watermark, and every poll advances
//! the watermark to `max(current, max id in batch)`. The watermark never
//! moves backwards, so a message is reported at most once per session no
//! matter how often the host re-renders it.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::message_id::{DEFAULT_ID_PREFIX, MessageId};

/// A message container enumerated from the host, before novelty filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<P> {
    /// Identifier string as provided by the host platform.
    pub external_id: String,
    /// Opaque payload carried through to the caller.
    pub payload: P,
}

impl<P> Candidate<P> {
    #[must_use]
    pub fn new(external_id: impl Into<String>, payload: P) -> Self {
        Self {
            external_id: external_id.into(),
            payload,
        }
    }
}

/// A candidate that passed the watermark check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage<P> {
    /// Parsed identifier.
    pub id: MessageId,
    /// Identifier string as provided by the host platform.
    pub external_id: String,
    /// Payload from the originating candidate.
    pub payload: P,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoveltyStats {
    /// Number of `poll` calls.
    pub polls: u64,
    /// Messages returned as new across all polls.
    pub emitted: u64,
    /// Candidates whose id could not be parsed.
    pub skipped_malformed: u64,
}

/// Watermark-based novelty filter for one surveillance session.
#[derive(Debug, Clone)]
pub struct NoveltyTracker {
    id_prefix: String,
    watermark: Option<MessageId>,
    stats: NoveltyStats,
}

impl Default for NoveltyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ID_PREFIX)
    }
}

impl NoveltyTracker {
    /// Create a tracker that strips `id_prefix` from external ids.
    #[must_use]
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            watermark: None,
            stats: NoveltyStats::default(),
        }
    }

    /// Current watermark, `None` before anything has been seen.
    #[must_use]
    pub fn watermark(&self) -> Option<&MessageId> {
        self.watermark.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> NoveltyStats {
        self.stats
    }

    /// Seed the watermark from messages already on screen without emitting
    /// any of them. Returns how many candidates carried a valid id.
    pub fn initialize<'a, I>(&mut self, external_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut marked = 0;
        let mut batch_max: Option<MessageId> = None;
        for external_id in external_ids {
            let Some(id) = MessageId::parse_external(external_id, &self.id_prefix) else {
                self.stats.skipped_malformed += 1;
                continue;
            };
            marked += 1;
            if batch_max.as_ref().is_none_or(|max| id > *max) {
                batch_max = Some(id);
            }
        }
        self.advance(batch_max);
        marked
    }

    /// Return the candidates newer than the watermark, ordered by id, and
    /// advance the watermark past everything in this batch.
    pub fn poll<P, I>(&mut self, candidates: I) -> Vec<NewMessage<P>>
    where
        I: IntoIterator<Item = Candidate<P>>,
    {
        self.stats.polls += 1;
        let mut fresh = Vec::new();
        let mut batch_max: Option<MessageId> = None;

        for candidate in candidates {
            let Some(id) = MessageId::parse_external(&candidate.external_id, &self.id_prefix)
            else {
                trace!(external_id = %candidate.external_id, "Skipping unparseable message id");
                self.stats.skipped_malformed += 1;
                continue;
            };

            if batch_max.as_ref().is_none_or(|max| id > *max) {
                batch_max = Some(id.clone());
            }

            if self.watermark.as_ref().is_none_or(|mark| id > *mark) {
                fresh.push(NewMessage {
                    id,
                    external_id: candidate.external_id,
                    payload: candidate.payload,
                });
            }
        }

        // The host can render the same container twice in one snapshot.
        fresh.sort_by(|a, b| a.id.cmp(&b.id));
        fresh.dedup_by(|a, b| a.id == b.id);

        self.advance(batch_max);
        self.stats.emitted += fresh.len() as u64;
        fresh
    }

    fn advance(&mut self, batch_max: Option<MessageId>) {
        if let Some(candidate) = batch_max {
            if self.watermark.as_ref().is_none_or(|mark| candidate > *mark) {
                self.watermark = Some(candidate);
            }
        }
    }
}
