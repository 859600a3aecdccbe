//! Journal entry record and the boundary where entries enter the engine.
//!
//! Entries arrive as JSON lines from the ingestion pipeline. The serialized
//! field names (`entry`, `emotions`) follow the journal export format; every
//! other field in a line is ignored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{JournalError, Result};

/// A single journal entry written by one user.
///
/// Immutable once placed in an index; the engine never rewrites content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub user_id: String,
    #[serde(rename = "entry")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Emotion labels from the external tagger. Set semantics: first
    /// occurrence order is kept, duplicates are dropped by [`Entry::validated`].
    #[serde(rename = "emotions", default)]
    pub emotion_tags: Vec<String>,
}

impl Entry {
    /// Create an undated, untagged entry with a fresh id.
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            text: text.into(),
            date: None,
            emotion_tags: Vec::new(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.emotion_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Check the entry and normalise its tag set.
    ///
    /// Rejects a blank `user_id` or blank `text`. Tags are trimmed, empty tags
    /// dropped, and repeated tags collapsed onto their first occurrence.
    pub fn validated(mut self) -> Result<Self> {
        if self.user_id.trim().is_empty() {
            return Err(JournalError::InvalidEntry(format!(
                "entry {} has no user_id",
                self.id
            )));
        }
        if self.text.trim().is_empty() {
            return Err(JournalError::InvalidEntry(format!(
                "entry {} has no text",
                self.id
            )));
        }

        let mut tags: Vec<String> = Vec::with_capacity(self.emotion_tags.len());
        for tag in self.emotion_tags.drain(..) {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        self.emotion_tags = tags;
        Ok(self)
    }
}

/// Entries read from a journal file plus the number of lines rejected.
#[derive(Debug, Clone, Default)]
pub struct JournalLoad {
    pub entries: Vec<Entry>,
    /// Non-blank lines that failed to parse or validate.
    pub skipped: usize,
}

/// Read a JSONL journal export.
///
/// Malformed or invalid lines are skipped and counted rather than aborting the
/// load. Blank lines are ignored. A missing or unreadable file is an error.
pub fn load_journal(path: &Path) -> Result<JournalLoad> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut load = JournalLoad::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed = serde_json::from_str::<Entry>(&line)
            .map_err(JournalError::from)
            .and_then(Entry::validated);

        match parsed {
            Ok(entry) => load.entries.push(entry),
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping journal line");
                load.skipped += 1;
            }
        }
    }

    debug!(
        path = %path.display(),
        entries = load.entries.len(),
        skipped = load.skipped,
        "Journal loaded"
    );
    Ok(load)
}

/// Entries belonging to `user_id` dated within the last `days` days.
///
/// The window counts `today` as its first day, so `days = 7` keeps dates
/// strictly after `today - 7`. Undated entries never fall in a window. Input
/// order is preserved.
pub fn recent_for_user<'a>(
    entries: &'a [Entry],
    user_id: &str,
    days: u32,
    today: NaiveDate,
) -> Vec<&'a Entry> {
    let cutoff = today - Duration::days(i64::from(days));
    entries
        .iter()
        .filter(|e| e.user_id == user_id)
        .filter(|e| e.date.is_some_and(|d| d > cutoff))
        .collect()
}
