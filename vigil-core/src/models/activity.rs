//! Activity record types and the per-window aggregate bundle.
//!
//! Records of all five kinds are fetched by user + time range and fused
//! into an `ActivityWindowBundle`, the ephemeral input to one
//! evaluation. Bundles are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebsiteVisit {
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
    pub active_seconds: i32,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TextAttention {
    pub url: String,
    pub text: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImageAttention {
    pub title: String,
    pub caption: Option<String>,
    pub viewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoAttention {
    pub title: String,
    pub channel: Option<String>,
    pub caption: Option<String>,
    pub watched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AudioAttention {
    pub title: String,
    pub summary: Option<String>,
    pub listened_at: DateTime<Utc>,
}

/// Text-attention records for one URL, joined in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGroup {
    pub url: String,
    pub text: String,
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Everything a user did in `[window_start, window_end]`, normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityWindowBundle {
    pub visits: Vec<WebsiteVisit>,
    pub text_groups: Vec<TextGroup>,
    pub images: Vec<ImageAttention>,
    pub videos: Vec<VideoAttention>,
    pub audio: Vec<AudioAttention>,
}

impl ActivityWindowBundle {
    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
            && self.text_groups.is_empty()
            && self.images.is_empty()
            && self.videos.is_empty()
            && self.audio.is_empty()
    }

    /// Minimum timestamp across every activity kind present. Used to
    /// back-date a new session's start to when the behavior actually
    /// began, not when detection ran.
    pub fn earliest_timestamp(&self) -> Option<DateTime<Utc>> {
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut consider = |ts: DateTime<Utc>| {
            earliest = Some(match earliest {
                Some(e) if e <= ts => e,
                _ => ts,
            });
        };

        for v in &self.visits {
            consider(v.opened_at);
        }
        for g in &self.text_groups {
            for ts in &g.timestamps {
                consider(*ts);
            }
        }
        for i in &self.images {
            consider(i.viewed_at);
        }
        for v in &self.videos {
            consider(v.watched_at);
        }
        for a in &self.audio {
            consider(a.listened_at);
        }

        earliest
    }

    /// Render the bundle as the normalized text content handed to the
    /// classifier.
    pub fn render_content(&self) -> String {
        let mut out = String::new();

        if !self.visits.is_empty() {
            out.push_str("Pages visited:\n");
            for v in &self.visits {
                out.push_str(&format!("- {} ({})", v.title, v.url));
                if let Some(summary) = &v.summary {
                    out.push_str(&format!(": {}", summary));
                }
                out.push('\n');
            }
        }

        if !self.text_groups.is_empty() {
            out.push_str("\nText read:\n");
            for g in &self.text_groups {
                out.push_str(&format!("[{}]\n{}\n", g.url, g.text));
            }
        }

        if !self.images.is_empty() {
            out.push_str("\nImages viewed:\n");
            for i in &self.images {
                out.push_str(&format!("- {}", i.title));
                if let Some(caption) = &i.caption {
                    out.push_str(&format!(": {}", caption));
                }
                out.push('\n');
            }
        }

        if !self.videos.is_empty() {
            out.push_str("\nVideos watched:\n");
            for v in &self.videos {
                out.push_str(&format!("- {}", v.title));
                if let Some(channel) = &v.channel {
                    out.push_str(&format!(" ({})", channel));
                }
                if let Some(caption) = &v.caption {
                    out.push_str(&format!(": {}", caption));
                }
                out.push('\n');
            }
        }

        if !self.audio.is_empty() {
            out.push_str("\nAudio listened:\n");
            for a in &self.audio {
                out.push_str(&format!("- {}", a.title));
                if let Some(summary) = &a.summary {
                    out.push_str(&format!(": {}", summary));
                }
                out.push('\n');
            }
        }

        out
    }
}
