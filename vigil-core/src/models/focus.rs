//! Focus session model.
//!
//! A `FocusSession` is one contiguous period of attention on a topic.
//! Its `time_spent` segments are ordered and non-overlapping; across a
//! user's whole history at most one segment is open (`end = None`) at
//! any instant, and only on the most recently updated session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One `{start, end}` interval within a session. `end = None` marks the
/// currently live interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSegment {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusSession {
    pub id: Uuid,
    pub user_id: String,
    /// Short (1-3 word) human-readable label for the topic.
    pub item: String,
    /// Most-recently-detected keyword first, no duplicates.
    pub keywords: Vec<String>,
    pub time_spent: Vec<TimeSegment>,
    /// Timestamp of the last transition; doubles as the next window
    /// start for this user's subsequent evaluation.
    pub last_updated: DateTime<Utc>,
    /// Classifier configuration that produced/maintained this session.
    pub model_used: String,
    pub trace_id: Option<String>,
}

impl FocusSession {
    /// The open segment, if this session is live.
    pub fn open_segment(&self) -> Option<&TimeSegment> {
        self.time_spent.last().filter(|s| s.end.is_none())
    }

    pub fn is_open(&self) -> bool {
        self.open_segment().is_some()
    }

    /// Close the open segment at `now`. No-op if already closed.
    pub fn close_open_segment(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.time_spent.last_mut() {
            if last.end.is_none() {
                last.end = Some(now);
            }
        }
    }

    /// The `{item, keywords}` pair handed to drift detection.
    pub fn topic_context(&self) -> TopicContext {
        TopicContext {
            item: self.item.clone(),
            keywords: self.keywords.clone(),
        }
    }

    pub fn snapshot(&self) -> FocusSnapshot {
        FocusSnapshot {
            id: self.id,
            user_id: self.user_id.clone(),
            item: self.item.clone(),
            keywords: self.keywords.clone(),
            time_spent: self.time_spent.clone(),
            last_updated: self.last_updated,
        }
    }
}

/// The previous topic as seen by drift detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicContext {
    pub item: String,
    pub keywords: Vec<String>,
}

/// Serializable view of a session carried by change events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusSnapshot {
    pub id: Uuid,
    pub user_id: String,
    pub item: String,
    pub keywords: Vec<String>,
    pub time_spent: Vec<TimeSegment>,
    pub last_updated: DateTime<Utc>,
}

/// Merge a newly detected keyword into an existing keyword list.
///
/// The new keyword always takes the front position; duplicates are
/// removed preserving first-occurrence order of the rest. Pure function
/// used by the session state machine and its tests.
pub fn merge_keywords(existing: &[String], newest: &str) -> Vec<String> {
    let mut merged = Vec::with_capacity(existing.len() + 1);
    merged.push(newest.to_string());
    for kw in existing {
        if !merged.contains(kw) {
            merged.push(kw.clone());
        }
    }
    merged
}
