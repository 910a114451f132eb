use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct VigilConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub gemini_model: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            gemini_model: "gemini-2.0-flash".to_string(),
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

/// Tunables for the detection scheduler. The 5s tick and the two
/// lookback windows match the reference deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub interval_seconds: u64,
    pub candidate_lookback_minutes: i64,
    pub first_run_lookback_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            candidate_lookback_minutes: 60,
            first_run_lookback_minutes: 10,
        }
    }
}

/// Caps on expensive activity kinds, bounding classifier input size.
#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorConfig {
    pub max_images: usize,
    pub max_videos: usize,
    pub max_audio: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_images: 10,
            max_videos: 5,
            max_audio: 5,
        }
    }
}

impl VigilConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
