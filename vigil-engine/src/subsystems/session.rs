//! Session state machine.
//!
//! Applies classifier output to a user's stored session and decides:
//! no-op, create, update (merge), or drift-close. Drift closes the
//! previous session without opening the new topic in the same
//! evaluation; the new topic is picked up as a fresh `Created` on the
//! next tick. An absent topic signal always short-circuits to
//! `NoActivity`, even when a drift answer was already obtained.

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::SessionStore;
use vigil_core::classifier::FocusClassifier;
use vigil_core::models::focus::merge_keywords;
use vigil_core::models::{ActivityWindowBundle, FocusSession, TimeSegment};

/// Outcome of one per-user evaluation.
#[derive(Debug, Clone)]
pub enum Decision {
    NoActivity,
    Created(FocusSession),
    Updated(FocusSession),
    Closed(FocusSession),
}

/// Decide the transition for one user's window.
///
/// `previous` is the user's most recent session regardless of open
/// state; a closed previous session behaves like no session at all
/// (the post-drift tick creates a fresh one).
pub async fn evaluate(
    classifier: &dyn FocusClassifier,
    user_id: &str,
    previous: Option<FocusSession>,
    bundle: &ActivityWindowBundle,
    now: DateTime<Utc>,
    trace_id: &str,
) -> Decision {
    // An engine must not manufacture an "idle" session from time passing
    if bundle.is_empty() {
        return Decision::NoActivity;
    }

    let previous_open = previous.filter(|s| s.is_open());
    let content = bundle.render_content();

    let drifted = match &previous_open {
        Some(session) => {
            classifier
                .detect_drift(&session.topic_context(), &content)
                .await
        }
        None => false,
    };

    // Absent/ambiguous signal takes precedence over a stale drift answer
    let topic = match classifier.detect_topic(&content).await {
        Some(t) => t,
        None => return Decision::NoActivity,
    };

    match previous_open {
        Some(mut session) if drifted => {
            session.close_open_segment(now);
            session.last_updated = now;
            tracing::info!(
                user = user_id,
                item = %session.item,
                "Drift detected — closing focus session"
            );
            Decision::Closed(session)
        }
        Some(mut session) => {
            session.keywords = merge_keywords(&session.keywords, &topic);
            session.item = classifier.summarize(&session.keywords).await;
            session.last_updated = now;
            tracing::debug!(
                user = user_id,
                item = %session.item,
                keyword = %topic,
                "Focus session merged"
            );
            Decision::Updated(session)
        }
        None => {
            // Back-date the segment start to when the behavior began
            let start = bundle.earliest_timestamp().unwrap_or(now);
            let session = FocusSession {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                item: topic.clone(),
                keywords: vec![topic],
                time_spent: vec![TimeSegment { start, end: None }],
                last_updated: now,
                model_used: classifier.model_name().to_string(),
                trace_id: Some(trace_id.to_string()),
            };
            tracing::info!(user = user_id, item = %session.item, "Focus session created");
            Decision::Created(session)
        }
    }
}

/// Persist a decision. `NoActivity` touches nothing.
pub async fn apply(store: &dyn SessionStore, decision: &Decision) -> Result<()> {
    match decision {
        Decision::NoActivity => Ok(()),
        Decision::Created(session) => store.create(session).await,
        Decision::Updated(session) | Decision::Closed(session) => store.update(session).await,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use vigil_core::models::TopicContext;

    // ------------------------------------------------------------------
    // Mocks (no DB, no HTTP)
    // ------------------------------------------------------------------

    /// Classifier returning scripted answers.
    struct MockClassifier {
        drift: bool,
        topic: Option<String>,
        summary: Option<String>,
    }

    impl MockClassifier {
        fn topic(topic: &str) -> Self {
            Self {
                drift: false,
                topic: Some(topic.to_string()),
                summary: None,
            }
        }

        fn drifting() -> Self {
            Self {
                drift: true,
                topic: Some("unrelated".to_string()),
                summary: None,
            }
        }

        fn idle() -> Self {
            Self {
                drift: false,
                topic: None,
                summary: None,
            }
        }
    }

    #[async_trait]
    impl FocusClassifier for MockClassifier {
        async fn detect_drift(&self, _previous: &TopicContext, _content: &str) -> bool {
            self.drift
        }

        async fn detect_topic(&self, _content: &str) -> Option<String> {
            self.topic.clone()
        }

        async fn summarize(&self, keywords: &[String]) -> String {
            self.summary
                .clone()
                .or_else(|| keywords.first().cloned())
                .unwrap_or_default()
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    /// In-memory store recording every write.
    #[derive(Default)]
    pub struct MemoryStore {
        pub sessions: Mutex<HashMap<Uuid, FocusSession>>,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn find_latest(&self, user_id: &str) -> Result<Option<FocusSession>> {
            let sessions = self.sessions.lock().unwrap();
            Ok(sessions
                .values()
                .filter(|s| s.user_id == user_id)
                .max_by_key(|s| s.last_updated)
                .cloned())
        }

        async fn create(&self, session: &FocusSession) -> Result<()> {
            self.sessions
                .lock()
                .unwrap()
                .insert(session.id, session.clone());
            Ok(())
        }

        async fn update(&self, session: &FocusSession) -> Result<()> {
            self.sessions
                .lock()
                .unwrap()
                .insert(session.id, session.clone());
            Ok(())
        }
    }

    fn bundle_about(text: &str, minutes_ago: i64) -> ActivityWindowBundle {
        ActivityWindowBundle {
            text_groups: vec![vigil_core::models::TextGroup {
                url: "https://example.com".to_string(),
                text: text.to_string(),
                timestamps: vec![Utc::now() - chrono::Duration::minutes(minutes_ago)],
            }],
            ..Default::default()
        }
    }

    fn open_session(user: &str, item: &str, keywords: &[&str]) -> FocusSession {
        let now = Utc::now();
        FocusSession {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            item: item.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            time_spent: vec![TimeSegment {
                start: now - chrono::Duration::minutes(20),
                end: None,
            }],
            last_updated: now - chrono::Duration::minutes(5),
            model_used: "mock".to_string(),
            trace_id: None,
        }
    }

    // ------------------------------------------------------------------
    // Invariants and end-to-end scenarios
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_empty_bundle_is_no_activity() {
        let classifier = MockClassifier::topic("Rust");
        let previous = Some(open_session("u1", "Rust", &["Rust"]));

        let decision = evaluate(
            &classifier,
            "u1",
            previous,
            &ActivityWindowBundle::default(),
            Utc::now(),
            "trace",
        )
        .await;

        assert!(matches!(decision, Decision::NoActivity));
    }

    #[tokio::test]
    async fn test_no_topic_is_no_activity_even_with_activity() {
        let classifier = MockClassifier::idle();
        let decision = evaluate(
            &classifier,
            "u1",
            None,
            &bundle_about("window churn", 1),
            Utc::now(),
            "trace",
        )
        .await;

        assert!(matches!(decision, Decision::NoActivity));
    }

    #[tokio::test]
    async fn test_first_session_created_backdated() {
        // Scenario 1: no sessions, text about the Rust borrow checker
        let classifier = MockClassifier::topic("Rust");
        let bundle = bundle_about("Rust borrow checker", 7);
        let earliest = bundle.earliest_timestamp().unwrap();

        let decision = evaluate(&classifier, "u1", None, &bundle, Utc::now(), "trace").await;

        let session = match decision {
            Decision::Created(s) => s,
            other => panic!("expected Created, got {:?}", other),
        };
        assert_eq!(session.item, "Rust");
        assert_eq!(session.keywords, vec!["Rust".to_string()]);
        assert_eq!(session.time_spent.len(), 1);
        assert_eq!(session.time_spent[0].start, earliest);
        assert!(session.time_spent[0].end.is_none());
        assert_eq!(session.model_used, "mock");
        assert_eq!(session.trace_id.as_deref(), Some("trace"));
    }

    #[tokio::test]
    async fn test_no_drift_merges_keywords_and_resummarizes() {
        // Scenario 2: next tick about lifetimes, same subject
        let classifier = MockClassifier {
            drift: false,
            topic: Some("lifetimes".to_string()),
            summary: Some("Rust".to_string()),
        };
        let previous = Some(open_session("u1", "Rust", &["Rust"]));

        let decision = evaluate(
            &classifier,
            "u1",
            previous,
            &bundle_about("Rust lifetimes", 2),
            Utc::now(),
            "trace",
        )
        .await;

        let session = match decision {
            Decision::Updated(s) => s,
            other => panic!("expected Updated, got {:?}", other),
        };
        assert_eq!(
            session.keywords,
            vec!["lifetimes".to_string(), "Rust".to_string()]
        );
        assert_eq!(session.item, "Rust");
        assert!(session.is_open(), "merge must keep the segment open");
    }

    #[tokio::test]
    async fn test_merge_dedups_with_priority() {
        // [a, b] + b => [b, a]
        let classifier = MockClassifier::topic("b");
        let previous = Some(open_session("u1", "a", &["a", "b"]));

        let decision = evaluate(
            &classifier,
            "u1",
            previous,
            &bundle_about("more b", 1),
            Utc::now(),
            "trace",
        )
        .await;

        let session = match decision {
            Decision::Updated(s) => s,
            other => panic!("expected Updated, got {:?}", other),
        };
        assert_eq!(session.keywords, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_drift_closes_without_merging() {
        // Scenario 3: bundle entirely about pasta recipes
        let classifier = MockClassifier::drifting();
        let previous = open_session("u1", "Rust", &["lifetimes", "Rust"]);
        let original_keywords = previous.keywords.clone();
        let now = Utc::now();

        let decision = evaluate(
            &classifier,
            "u1",
            Some(previous),
            &bundle_about("pasta recipes", 1),
            now,
            "trace",
        )
        .await;

        let session = match decision {
            Decision::Closed(s) => s,
            other => panic!("expected Closed, got {:?}", other),
        };
        assert_eq!(session.time_spent.last().unwrap().end, Some(now));
        assert_eq!(session.keywords, original_keywords, "drift must not merge");
        assert_eq!(session.item, "Rust");
        assert_eq!(session.last_updated, now);
    }

    #[tokio::test]
    async fn test_closed_previous_session_creates_fresh() {
        // Scenario 4: tick after a drift-close, still about pasta
        let classifier = MockClassifier::topic("cooking");
        let mut previous = open_session("u1", "Rust", &["Rust"]);
        previous.close_open_segment(Utc::now());

        let decision = evaluate(
            &classifier,
            "u1",
            Some(previous),
            &bundle_about("pasta again", 3),
            Utc::now(),
            "trace",
        )
        .await;

        let session = match decision {
            Decision::Created(s) => s,
            other => panic!("expected Created, got {:?}", other),
        };
        assert_eq!(session.item, "cooking");
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_apply_no_activity_touches_nothing() {
        let store = MemoryStore::default();
        apply(&store, &Decision::NoActivity)
            .await
            .expect("apply failed");
        assert!(store.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_created_and_closed_keep_single_open_segment() {
        let store = MemoryStore::default();
        let classifier = MockClassifier::topic("Rust");
        let now = Utc::now();

        // Create
        let decision = evaluate(
            &classifier,
            "u1",
            None,
            &bundle_about("Rust", 5),
            now,
            "trace",
        )
        .await;
        apply(&store, &decision).await.expect("apply failed");

        // Drift-close on the next tick
        let previous = store.find_latest("u1").await.unwrap();
        let drift = MockClassifier::drifting();
        let later = now + chrono::Duration::seconds(5);
        let decision = evaluate(
            &drift,
            "u1",
            previous,
            &bundle_about("pasta", 1),
            later,
            "trace",
        )
        .await;
        apply(&store, &decision).await.expect("apply failed");

        // No open segment anywhere in this user's history
        let sessions = store.sessions.lock().unwrap();
        let open_count = sessions
            .values()
            .flat_map(|s| &s.time_spent)
            .filter(|seg| seg.end.is_none())
            .count();
        assert_eq!(open_count, 0);
    }
}
