//! Message sources: read-only snapshots of the messages currently visible.
//!
//! A source enumerates every message container it can see on each call;
//! novelty filtering happens downstream in [`crate::novelty`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::debug;

use crate::Result;
use crate::error::SourceError;
use crate::novelty::Candidate;

/// Text extracted from one message (one entry per embed or text block).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContent {
    pub texts: Vec<String>,
}

impl MessageContent {
    #[must_use]
    pub fn new(texts: Vec<String>) -> Self {
        Self { texts }
    }

    #[must_use]
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            texts: vec![text.into()],
        }
    }
}

/// Something that can enumerate the messages currently on screen.
pub trait MessageSource: Send + Sync {
    fn enumerate(&self) -> Result<Vec<Candidate<MessageContent>>>;
}

/// In-memory snapshot, replaceable from another handle.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    messages: Arc<Mutex<Vec<Candidate<MessageContent>>>>,
}

impl StaticSource {
    #[must_use]
    pub fn new(messages: Vec<Candidate<MessageContent>>) -> Self {
        Self {
            messages: Arc::new(Mutex::new(messages)),
        }
    }

    /// Replace the whole snapshot.
    pub fn replace(&self, messages: Vec<Candidate<MessageContent>>) {
        *self.messages.lock().unwrap_or_else(|e| e.into_inner()) = messages;
    }

    /// Append one message with a single text segment.
    pub fn push(&self, external_id: impl Into<String>, text: impl Into<String>) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Candidate::new(external_id, MessageContent::single(text)));
    }
}

impl MessageSource for StaticSource {
    fn enumerate(&self) -> Result<Vec<Candidate<MessageContent>>> {
        Ok(self
            .messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedId {
    Text(String),
    Number(u64),
}

#[derive(Debug, Deserialize)]
struct FeedRecord {
    id: FeedId,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    texts: Vec<String>,
}

impl FeedRecord {
    fn into_candidate(self) -> Candidate<MessageContent> {
        let external_id = match self.id {
            FeedId::Text(id) => id,
            FeedId::Number(id) => id.to_string(),
        };
        let mut texts = self.texts;
        if let Some(text) = self.text {
            texts.insert(0, text);
        }
        Candidate::new(external_id, MessageContent::new(texts))
    }
}

/// JSON-lines feed file, re-read on every enumeration.
///
/// Each line is `{"id": "...", "text": "..."}` or
/// `{"id": 123, "texts": ["...", "..."]}`. Blank and malformed lines are
/// skipped.
#[derive(Debug, Clone)]
pub struct JsonlFeedSource {
    path: PathBuf,
}

impl JsonlFeedSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse feed content, skipping lines that are not valid records.
#[must_use]
pub fn parse_feed(content: &str) -> Vec<Candidate<MessageContent>> {
    let mut candidates = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FeedRecord>(line) {
            Ok(record) => candidates.push(record.into_candidate()),
            Err(err) => debug!(line = line_no + 1, error = %err, "Skipping malformed feed line"),
        }
    }
    candidates
}

impl MessageSource for JsonlFeedSource {
    fn enumerate(&self) -> Result<Vec<Candidate<MessageContent>>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| SourceError::Unreadable {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(parse_feed(&content))
    }
}
