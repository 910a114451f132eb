//! Activity window aggregation.
//!
//! Fetches every activity kind for one user in `[start, end]` and fuses
//! the records into an `ActivityWindowBundle`. Pure read, no side
//! effects. Text-attention records are grouped by URL and joined
//! chronologically with a paragraph separator; a large time gap between
//! reads of the same URL does NOT split the group (intentionally
//! permissive, matching the reference concatenation policy).
//!
//! A fetch failure in one kind is tolerated (warn + empty kind) as long
//! as at least one kind fetched; if every kind failed the whole fetch
//! is a retryable error for the scheduler to isolate to this user.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::activity::ActivitySource;
use vigil_core::config::AggregatorConfig;
use vigil_core::models::{ActivityWindowBundle, TextAttention, TextGroup};

/// Paragraph separator between concatenated text-attention records.
const TEXT_SEPARATOR: &str = "\n\n";

pub async fn fetch_window(
    source: &dyn ActivitySource,
    config: &AggregatorConfig,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<ActivityWindowBundle> {
    let mut failures = 0usize;

    let visits = match source.visits(user_id, start, end).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(user = user_id, error = %e, "Visit fetch failed");
            failures += 1;
            Vec::new()
        }
    };

    let texts = match source.texts(user_id, start, end).await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(user = user_id, error = %e, "Text-attention fetch failed");
            failures += 1;
            Vec::new()
        }
    };

    let mut images = match source.images(user_id, start, end).await {
        Ok(i) => i,
        Err(e) => {
            tracing::warn!(user = user_id, error = %e, "Image-attention fetch failed");
            failures += 1;
            Vec::new()
        }
    };

    let mut videos = match source.videos(user_id, start, end).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(user = user_id, error = %e, "Video-attention fetch failed");
            failures += 1;
            Vec::new()
        }
    };

    let mut audio = match source.audio(user_id, start, end).await {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(user = user_id, error = %e, "Audio-attention fetch failed");
            failures += 1;
            Vec::new()
        }
    };

    if failures == 5 {
        return Err(anyhow!("all activity fetches failed for user {}", user_id));
    }

    // Expensive kinds: keep only the most recent N
    cap_most_recent(&mut images, config.max_images, |i| i.viewed_at);
    cap_most_recent(&mut videos, config.max_videos, |v| v.watched_at);
    cap_most_recent(&mut audio, config.max_audio, |a| a.listened_at);

    Ok(ActivityWindowBundle {
        visits,
        text_groups: group_texts(texts),
        images,
        videos,
        audio,
    })
}

/// Group text-attention records by source URL, join chronologically.
/// First-seen URL order is kept stable for deterministic output.
pub fn group_texts(mut texts: Vec<TextAttention>) -> Vec<TextGroup> {
    texts.sort_by_key(|t| t.read_at);

    let mut order: Vec<String> = Vec::new();
    let mut by_url: HashMap<String, Vec<TextAttention>> = HashMap::new();
    for record in texts {
        if !by_url.contains_key(&record.url) {
            order.push(record.url.clone());
        }
        by_url.entry(record.url.clone()).or_default().push(record);
    }

    order
        .into_iter()
        .map(|url| {
            let records = by_url.remove(&url).unwrap_or_default();
            let timestamps = records.iter().map(|r| r.read_at).collect();
            let text = records
                .iter()
                .map(|r| r.text.as_str())
                .collect::<Vec<_>>()
                .join(TEXT_SEPARATOR);
            TextGroup {
                url,
                text,
                timestamps,
            }
        })
        .collect()
}

/// Truncate to the `max` most recent items, keeping chronological order.
fn cap_most_recent<T, F>(items: &mut Vec<T>, max: usize, ts: F)
where
    F: Fn(&T) -> DateTime<Utc>,
{
    if items.len() > max {
        items.sort_by_key(|i| ts(i));
        let excess = items.len() - max;
        items.drain(..excess);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vigil_core::models::{
        AudioAttention, ImageAttention, VideoAttention, WebsiteVisit,
    };

    fn text(url: &str, body: &str, minutes_ago: i64) -> TextAttention {
        TextAttention {
            url: url.to_string(),
            text: body.to_string(),
            read_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_group_texts_joins_same_url_chronologically() {
        let groups = group_texts(vec![
            text("https://a.com", "second", 5),
            text("https://a.com", "first", 10),
        ]);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].url, "https://a.com");
        assert_eq!(groups[0].text, "first\n\nsecond");
        assert_eq!(groups[0].timestamps.len(), 2);
        assert!(groups[0].timestamps[0] < groups[0].timestamps[1]);
    }

    #[test]
    fn test_group_texts_separate_urls_stay_separate() {
        let groups = group_texts(vec![
            text("https://a.com", "alpha", 10),
            text("https://b.com", "beta", 5),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].url, "https://a.com");
        assert_eq!(groups[1].url, "https://b.com");
    }

    #[test]
    fn test_group_texts_never_splits_on_large_gap() {
        // Two reads of the same page a full day apart still join
        let groups = group_texts(vec![
            text("https://a.com", "yesterday", 24 * 60),
            text("https://a.com", "today", 1),
        ]);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].text, "yesterday\n\ntoday");
    }

    #[test]
    fn test_cap_most_recent_keeps_newest() {
        let mut items = vec![
            text("u", "oldest", 30),
            text("u", "newest", 1),
            text("u", "middle", 10),
        ];
        cap_most_recent(&mut items, 2, |t| t.read_at);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "middle");
        assert_eq!(items[1].text, "newest");
    }

    // ------------------------------------------------------------------
    // Mock activity sources (no DB)
    // ------------------------------------------------------------------

    /// Scripted source: fixed records, with optional per-kind failures.
    #[derive(Default)]
    struct MockSource {
        visits: Vec<WebsiteVisit>,
        texts: Vec<TextAttention>,
        images: Vec<ImageAttention>,
        fail_visits: bool,
        fail_all: bool,
    }

    #[async_trait]
    impl ActivitySource for MockSource {
        async fn active_users(&self, _since: DateTime<Utc>) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn visits(
            &self,
            _user: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<WebsiteVisit>> {
            if self.fail_visits || self.fail_all {
                return Err(anyhow!("visits unreachable"));
            }
            Ok(self.visits.clone())
        }

        async fn texts(
            &self,
            _user: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<TextAttention>> {
            if self.fail_all {
                return Err(anyhow!("texts unreachable"));
            }
            Ok(self.texts.clone())
        }

        async fn images(
            &self,
            _user: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<ImageAttention>> {
            if self.fail_all {
                return Err(anyhow!("images unreachable"));
            }
            Ok(self.images.clone())
        }

        async fn videos(
            &self,
            _user: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<VideoAttention>> {
            if self.fail_all {
                return Err(anyhow!("videos unreachable"));
            }
            Ok(Vec::new())
        }

        async fn audio(
            &self,
            _user: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<AudioAttention>> {
            if self.fail_all {
                return Err(anyhow!("audio unreachable"));
            }
            Ok(Vec::new())
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let end = Utc::now();
        (end - chrono::Duration::minutes(10), end)
    }

    #[tokio::test]
    async fn test_fetch_window_builds_bundle() {
        let source = MockSource {
            texts: vec![
                text("https://a.com", "reading about Rust", 5),
                text("https://a.com", "more Rust", 3),
            ],
            images: vec![ImageAttention {
                title: "diagram".to_string(),
                caption: None,
                viewed_at: Utc::now(),
            }],
            ..Default::default()
        };

        let (start, end) = window();
        let bundle = fetch_window(&source, &AggregatorConfig::default(), "u1", start, end)
            .await
            .expect("fetch_window failed");

        assert_eq!(bundle.text_groups.len(), 1);
        assert_eq!(bundle.images.len(), 1);
        assert!(!bundle.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_window_tolerates_partial_failure() {
        let source = MockSource {
            texts: vec![text("https://a.com", "still fetched", 2)],
            fail_visits: true,
            ..Default::default()
        };

        let (start, end) = window();
        let bundle = fetch_window(&source, &AggregatorConfig::default(), "u1", start, end)
            .await
            .expect("partial failure should not abort the window");

        assert!(bundle.visits.is_empty());
        assert_eq!(bundle.text_groups.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_window_total_failure_is_error() {
        let source = MockSource {
            fail_all: true,
            ..Default::default()
        };

        let (start, end) = window();
        let result = fetch_window(&source, &AggregatorConfig::default(), "u1", start, end).await;
        assert!(result.is_err(), "total fetch failure must propagate");
    }

    #[tokio::test]
    async fn test_fetch_window_caps_images() {
        let now = Utc::now();
        let images = (0..15)
            .map(|i| ImageAttention {
                title: format!("img-{}", i),
                caption: None,
                viewed_at: now - chrono::Duration::minutes(i),
            })
            .collect();
        let source = MockSource {
            images,
            ..Default::default()
        };

        let (start, end) = window();
        let config = AggregatorConfig::default();
        let bundle = fetch_window(&source, &config, "u1", start, end)
            .await
            .expect("fetch_window failed");

        assert_eq!(bundle.images.len(), config.max_images);
        // Most recent survive: img-0 is the newest
        assert_eq!(bundle.images.last().unwrap().title, "img-0");
    }
}
