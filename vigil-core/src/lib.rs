pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use classifier::{
    ClassifierError, FailSafeClassifier, FocusClassifier, GeminiClassifier, GeminiClassifierConfig,
};
pub use config::VigilConfig;
pub use error::VigilError;
pub use models::{
    ActivityWindowBundle, FocusSession, FocusSnapshot, TimeSegment, TopicContext,
};
