use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Other error: {0}")]
    Other(String),
}
