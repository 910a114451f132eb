//! Read-only activity source boundary.
//!
//! Five record kinds, each queried by user + inclusive time range, plus
//! a coarse candidate-discovery query across all kinds. The trait keeps
//! the aggregator and scheduler testable against scripted sources.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use vigil_core::models::{
    AudioAttention, ImageAttention, TextAttention, VideoAttention, WebsiteVisit,
};

#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Users with any activity record since `since`. Cheap candidate
    /// filter, not the per-user evaluation window.
    async fn active_users(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    async fn visits(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WebsiteVisit>>;

    async fn texts(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TextAttention>>;

    async fn images(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ImageAttention>>;

    async fn videos(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VideoAttention>>;

    async fn audio(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AudioAttention>>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PgActivitySource {
    pool: PgPool,
}

impl PgActivitySource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivitySource for PgActivitySource {
    async fn active_users(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT user_id FROM (
                SELECT user_id FROM website_visits    WHERE opened_at   >= $1
                UNION ALL
                SELECT user_id FROM text_attention    WHERE read_at     >= $1
                UNION ALL
                SELECT user_id FROM image_attention   WHERE viewed_at   >= $1
                UNION ALL
                SELECT user_id FROM video_attention   WHERE watched_at  >= $1
                UNION ALL
                SELECT user_id FROM audio_attention   WHERE listened_at >= $1
            ) AS recent
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    async fn visits(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WebsiteVisit>> {
        let rows = sqlx::query_as::<_, WebsiteVisit>(
            r#"
            SELECT url, title, summary, active_seconds, opened_at
            FROM website_visits
            WHERE user_id = $1 AND opened_at >= $2 AND opened_at <= $3
            ORDER BY opened_at
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn texts(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TextAttention>> {
        let rows = sqlx::query_as::<_, TextAttention>(
            r#"
            SELECT url, text, read_at
            FROM text_attention
            WHERE user_id = $1 AND read_at >= $2 AND read_at <= $3
            ORDER BY read_at
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn images(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ImageAttention>> {
        let rows = sqlx::query_as::<_, ImageAttention>(
            r#"
            SELECT title, caption, viewed_at
            FROM image_attention
            WHERE user_id = $1 AND viewed_at >= $2 AND viewed_at <= $3
            ORDER BY viewed_at
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn videos(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VideoAttention>> {
        let rows = sqlx::query_as::<_, VideoAttention>(
            r#"
            SELECT title, channel, caption, watched_at
            FROM video_attention
            WHERE user_id = $1 AND watched_at >= $2 AND watched_at <= $3
            ORDER BY watched_at
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn audio(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AudioAttention>> {
        let rows = sqlx::query_as::<_, AudioAttention>(
            r#"
            SELECT title, summary, listened_at
            FROM audio_attention
            WHERE user_id = $1 AND listened_at >= $2 AND listened_at <= $3
            ORDER BY listened_at
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
