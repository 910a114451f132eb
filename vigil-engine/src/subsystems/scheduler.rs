//! Detection scheduler.
//!
//! A recurring driver that, on each tick, discovers users with recent
//! activity and fans out one aggregation + evaluation per user. Ticks
//! are guarded by a single process-wide flag: a slow tick causes the
//! next tick to be skipped entirely, never queued. One user's failure
//! never cancels or affects a sibling evaluation in the same tick.
//!
//! The scheduler holds no durable state. Its in-memory per-user
//! last-tick map is only a fallback window start; the authoritative
//! source is always the persisted session's `last_updated`.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::activity::ActivitySource;
use crate::events::{ChangePublisher, ChangeType, FocusChange};
use crate::store::SessionStore;
use crate::subsystems::{aggregator, session};
use crate::subsystems::session::Decision;
use vigil_core::classifier::FocusClassifier;
use vigil_core::config::{AggregatorConfig, SchedulerConfig};

// ============================================================================
// PUBLIC API
// ============================================================================

/// Per-tick outcome counts for observability.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub candidates: usize,
    pub created: usize,
    pub updated: usize,
    pub closed: usize,
    pub no_activity: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

impl TickReport {
    fn is_quiet(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.closed == 0 && self.failed == 0
    }
}

/// Operator-facing status, per the scheduler control surface.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub interval_ms: u64,
    pub is_running: bool,
}

/// Fallback per-user window starts. Injected so tests get a fresh
/// instance per run; never the authoritative window source.
#[derive(Clone, Default)]
pub struct LastTickMap {
    inner: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl LastTickMap {
    pub fn get(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap().get(user_id).copied()
    }

    pub fn set(&self, user_id: &str, ts: DateTime<Utc>) {
        self.inner.lock().unwrap().insert(user_id.to_string(), ts);
    }
}

#[derive(Clone)]
pub struct FocusScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn SessionStore>,
    source: Arc<dyn ActivitySource>,
    classifier: Arc<dyn FocusClassifier>,
    publisher: ChangePublisher,
    config: SchedulerConfig,
    aggregator_config: AggregatorConfig,
    last_tick: LastTickMap,
    tick_in_flight: AtomicBool,
    running: AtomicBool,
    ticks_skipped: AtomicU64,
    stop_tx: Mutex<Option<broadcast::Sender<()>>>,
}

impl FocusScheduler {
    pub fn new(
        store: Arc<dyn SessionStore>,
        source: Arc<dyn ActivitySource>,
        classifier: Arc<dyn FocusClassifier>,
        publisher: ChangePublisher,
        config: SchedulerConfig,
        aggregator_config: AggregatorConfig,
        last_tick: LastTickMap,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                source,
                classifier,
                publisher,
                config,
                aggregator_config,
                last_tick,
                tick_in_flight: AtomicBool::new(false),
                running: AtomicBool::new(false),
                ticks_skipped: AtomicU64::new(0),
                stop_tx: Mutex::new(None),
            }),
        }
    }

    /// Start the recurring tick loop. No-op if already running.
    pub fn start(&self) {
        let mut stop_tx = self.inner.stop_tx.lock().unwrap();
        if stop_tx.is_some() {
            tracing::debug!("Scheduler already running");
            return;
        }

        let (tx, rx) = broadcast::channel(1);
        *stop_tx = Some(tx);

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_loop(rx).await;
        });
    }

    /// Stop the tick loop. In-flight per-user evaluations complete or
    /// are abandoned; the next consistent decision is re-derived on a
    /// later start.
    pub fn stop(&self) {
        if let Some(tx) = self.inner.stop_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            interval_ms: self.inner.config.interval_seconds * 1000,
            is_running: self.is_running(),
        }
    }

    /// Ticks dropped by the re-entrancy guard since startup.
    pub fn ticks_skipped(&self) -> u64 {
        self.inner.ticks_skipped.load(Ordering::SeqCst)
    }

    /// Subscribe to focus change events.
    pub fn subscribe(&self) -> broadcast::Receiver<FocusChange> {
        self.inner.publisher.subscribe()
    }

    async fn run_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let interval = tokio::time::Duration::from_secs(self.inner.config.interval_seconds);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.inner.running.store(true, Ordering::SeqCst);
        tracing::info!(
            interval_s = self.inner.config.interval_seconds,
            "Focus detection scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(Some(report)) if report.is_quiet() => {
                            tracing::debug!(?report, "Tick complete");
                        }
                        Ok(Some(report)) => {
                            tracing::info!(
                                candidates = report.candidates,
                                created = report.created,
                                updated = report.updated,
                                closed = report.closed,
                                no_activity = report.no_activity,
                                failed = report.failed,
                                elapsed_ms = report.elapsed_ms,
                                "Tick complete"
                            );
                        }
                        Ok(None) => {}
                        Err(e) => tracing::error!(error = %e, "Tick aborted"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Focus detection scheduler shutting down");
                    break;
                }
            }
        }

        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// One evaluation pass across all candidate users. Returns
    /// `Ok(None)` when skipped because a previous tick is still in
    /// flight. A discovery failure aborts the whole tick; the next
    /// scheduled tick retries.
    pub async fn tick(&self) -> Result<Option<TickReport>> {
        if self.inner.tick_in_flight.swap(true, Ordering::SeqCst) {
            self.inner.ticks_skipped.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Tick skipped: previous tick still in flight");
            return Ok(None);
        }

        let result = self.run_tick().await;
        self.inner.tick_in_flight.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    async fn run_tick(&self) -> Result<TickReport> {
        let start = std::time::Instant::now();
        let now = Utc::now();
        let trace_id = Uuid::new_v4().to_string();
        let mut report = TickReport::default();

        let since = now - Duration::minutes(self.inner.config.candidate_lookback_minutes);
        let candidates = self.inner.source.active_users(since).await?;
        report.candidates = candidates.len();

        let mut tasks: JoinSet<(String, Result<Decision>)> = JoinSet::new();
        for user_id in candidates {
            let inner = self.inner.clone();
            let trace_id = trace_id.clone();
            tasks.spawn(async move {
                let result = evaluate_user(&inner, &user_id, now, &trace_id).await;
                (user_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (user_id, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "Per-user evaluation task panicked");
                    report.failed += 1;
                    continue;
                }
            };

            match result {
                Ok(decision) => {
                    // Advance the fallback window start regardless of the
                    // decision's type, so stale windows never grow unbounded
                    self.inner.last_tick.set(&user_id, now);
                    self.record(&decision, &mut report);
                }
                Err(e) => {
                    tracing::warn!(user = %user_id, error = %e, "Evaluation failed");
                    report.failed += 1;
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    fn record(&self, decision: &Decision, report: &mut TickReport) {
        let (change_type, session) = match decision {
            Decision::NoActivity => {
                report.no_activity += 1;
                return;
            }
            Decision::Created(s) => {
                report.created += 1;
                (ChangeType::Created, s)
            }
            Decision::Updated(s) => {
                report.updated += 1;
                (ChangeType::Updated, s)
            }
            Decision::Closed(s) => {
                report.closed += 1;
                (ChangeType::Ended, s)
            }
        };

        self.inner.publisher.publish(FocusChange {
            change_type,
            focus: Some(session.snapshot()),
        });
    }
}

// ============================================================================
// INTERNAL HELPERS
// ============================================================================

/// One user's full evaluation: resolve the window, aggregate, classify,
/// persist. Any error here is isolated to this user for this tick; the
/// window start does not advance, so the next tick naturally retries.
async fn evaluate_user(
    inner: &SchedulerInner,
    user_id: &str,
    now: DateTime<Utc>,
    trace_id: &str,
) -> Result<Decision> {
    let previous = inner.store.find_latest(user_id).await?;

    let window_start = previous
        .as_ref()
        .map(|s| s.last_updated)
        .or_else(|| inner.last_tick.get(user_id))
        .unwrap_or_else(|| now - Duration::minutes(inner.config.first_run_lookback_minutes));

    let bundle = aggregator::fetch_window(
        inner.source.as_ref(),
        &inner.aggregator_config,
        user_id,
        window_start,
        now,
    )
    .await?;

    let decision = session::evaluate(
        inner.classifier.as_ref(),
        user_id,
        previous,
        &bundle,
        now,
        trace_id,
    )
    .await;

    session::apply(inner.store.as_ref(), &decision).await?;

    Ok(decision)
}

// ============================================================================
// TESTS
// ============================================================================
