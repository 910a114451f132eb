//! Classifier boundary for Vigil — drift/topic/summary over an LLM
//!
//! Provides a `FocusClassifier` trait with three stateless operations:
//! - **detect_drift** — has attention moved to a different general subject?
//! - **detect_topic** — dominant current topic keyword, if any
//! - **summarize** — single best common label for a keyword set
//!
//! The trait is the *safe* contract the engine sees: implementations
//! never surface provider errors. `GeminiClassifier` exposes raw
//! fallible calls; `FailSafeClassifier` wraps it and converts every
//! failure into the documented defaults (drift=false, topic=None,
//! summary=first keyword).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::models::TopicContext;

// ============================================================================
// FocusClassifier trait
// ============================================================================

/// Abstraction over classifier providers. Swapping providers must not
/// change the session state machine, so the contract is deliberately
/// narrow and infallible.
#[async_trait]
pub trait FocusClassifier: Send + Sync {
    /// Whether current activity belongs to a different general subject
    /// than `previous`. Biased toward `false` (still focused) when
    /// ambiguous, and `false` on any provider error.
    async fn detect_drift(&self, previous: &TopicContext, content: &str) -> bool;

    /// Short keyword/phrase for the dominant current topic, or `None`
    /// if there is no attention signal (or on provider error).
    async fn detect_topic(&self, content: &str) -> Option<String>;

    /// Single best common label for a set of keywords. Falls back to
    /// the first keyword on provider error or empty result.
    async fn summarize(&self, keywords: &[String]) -> String;

    /// Identifier of the classifier configuration, recorded on sessions
    /// for auditability.
    fn model_name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Classifier provider errors. Confined to this module: the fail-safe
/// wrapper converts them to safe defaults before the engine sees them.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing text in model response")]
    MissingText,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

// ============================================================================
// Config
// ============================================================================

/// Gemini classifier configuration
#[derive(Debug, Clone)]
pub struct GeminiClassifierConfig {
    pub api_key: String,
    pub model: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GeminiClassifierConfig {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiClassifier
// ============================================================================

/// Gemini-backed classifier — calls the generateContent API.
#[derive(Debug, Clone)]
pub struct GeminiClassifier {
    client: Client,
    config: GeminiClassifierConfig,
    base_url: String,
}

impl GeminiClassifier {
    pub fn new(config: GeminiClassifierConfig) -> Result<Self, ClassifierError> {
        if config.api_key.is_empty() {
            return Err(ClassifierError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        })
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: GeminiClassifierConfig,
        base_url: String,
    ) -> Result<Self, ClassifierError> {
        if config.api_key.is_empty() {
            return Err(ClassifierError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Raw drift check. `true` means the user has moved to a different
    /// general subject.
    pub async fn drift_raw(
        &self,
        previous: &TopicContext,
        content: &str,
    ) -> Result<bool, ClassifierError> {
        let prompt = build_drift_prompt(previous, content);
        let answer = self.generate(&prompt).await?;
        Ok(parse_yes_no(&answer))
    }

    /// Raw topic detection. `Ok(None)` means no attention signal.
    pub async fn topic_raw(&self, content: &str) -> Result<Option<String>, ClassifierError> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        let prompt = build_topic_prompt(content);
        let answer = self.generate(&prompt).await?;
        Ok(parse_topic(&answer))
    }

    /// Raw keyword summarization.
    pub async fn summarize_raw(&self, keywords: &[String]) -> Result<String, ClassifierError> {
        let prompt = build_summary_prompt(keywords);
        let answer = self.generate(&prompt).await?;
        Ok(clean_label(&answer))
    }

    /// One prompt round-trip with retry + exponential backoff.
    async fn generate(&self, prompt: &str) -> Result<String, ClassifierError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.generate_once(prompt)).await;

        match result {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All classifier retry attempts failed"
                );
                Err(ClassifierError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, ClassifierError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Gemini API error");

            return Err(ClassifierError::Api { code, message });
        }

        let gemini_response: GeminiResponse = response.json().await?;

        gemini_response
            .candidates
            .and_then(|mut c| c.drain(..).next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|mut p| p.drain(..).next())
            .and_then(|p| p.text)
            .ok_or(ClassifierError::MissingText)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Prompts and response parsing
// ============================================================================

fn build_drift_prompt(previous: &TopicContext, content: &str) -> String {
    format!(
        "The user was previously focused on \"{}\" (related keywords: {}).\n\
         Below is their most recent activity.\n\n{}\n\n\
         Has the user moved on to a DIFFERENT general subject, as opposed to \
         a subtopic or closely related aspect of the same subject? \
         If you are unsure, or the activity stays in the same domain, answer no. \
         Answer with exactly one word: yes or no.",
        previous.item,
        previous.keywords.join(", "),
        content
    )
}

fn build_topic_prompt(content: &str) -> String {
    format!(
        "Below is a record of a user's recent browsing and reading activity.\n\n{}\n\n\
         What single short keyword or phrase (1-3 words) best names the dominant \
         topic the user is paying attention to? If there is no real reading or \
         attention signal, answer exactly: none. \
         Answer with only the keyword, no punctuation or explanation.",
        content
    )
}

fn build_summary_prompt(keywords: &[String]) -> String {
    format!(
        "Here is a list of topic keywords collected from one continuous focus \
         period, most recent first: {}.\n\
         What single short label (1-3 words) best summarizes them as one topic? \
         Answer with only the label, no punctuation or explanation.",
        keywords.join(", ")
    )
}

/// Trims quotes, trailing punctuation, and whitespace from a model answer.
fn clean_label(answer: &str) -> String {
    answer
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '.' || c == '`')
        .trim()
        .to_string()
}

fn parse_yes_no(answer: &str) -> bool {
    clean_label(answer).to_lowercase().starts_with("yes")
}

fn parse_topic(answer: &str) -> Option<String> {
    let label = clean_label(answer);
    if label.is_empty() || label.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(label)
    }
}

// ============================================================================
// FailSafeClassifier
// ============================================================================

/// Wraps `GeminiClassifier`. On any provider error, logs a warning and
/// returns the documented safe default, preferring continuity over
/// false drift.
pub struct FailSafeClassifier {
    inner: GeminiClassifier,
}

impl FailSafeClassifier {
    pub fn new(config: GeminiClassifierConfig) -> Result<Self, ClassifierError> {
        Ok(Self {
            inner: GeminiClassifier::new(config)?,
        })
    }

    #[cfg(test)]
    pub fn with_base_url(
        config: GeminiClassifierConfig,
        base_url: String,
    ) -> Result<Self, ClassifierError> {
        Ok(Self {
            inner: GeminiClassifier::with_base_url(config, base_url)?,
        })
    }
}

#[async_trait]
impl FocusClassifier for FailSafeClassifier {
    async fn detect_drift(&self, previous: &TopicContext, content: &str) -> bool {
        match self.inner.drift_raw(previous, content).await {
            Ok(drifted) => drifted,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Drift detection failed — assuming no drift (still focused)"
                );
                false
            }
        }
    }

    async fn detect_topic(&self, content: &str) -> Option<String> {
        match self.inner.topic_raw(content).await {
            Ok(topic) => topic,
            Err(e) => {
                tracing::warn!(error = %e, "Topic detection failed — treating as no signal");
                None
            }
        }
    }

    async fn summarize(&self, keywords: &[String]) -> String {
        let fallback = || keywords.first().cloned().unwrap_or_default();
        match self.inner.summarize_raw(keywords).await {
            Ok(label) if !label.is_empty() => label,
            Ok(_) => fallback(),
            Err(e) => {
                tracing::warn!(error = %e, "Summarization failed — falling back to first keyword");
                fallback()
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model()
    }
}

// ============================================================================
// TESTS
// ============================================================================
