use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use vigil_core::classifier::{FailSafeClassifier, GeminiClassifierConfig};
use vigil_core::VigilConfig;

use vigil_engine::activity::PgActivitySource;
use vigil_engine::events::ChangePublisher;
use vigil_engine::store::PgSessionStore;
use vigil_engine::subsystems::scheduler::{FocusScheduler, LastTickMap};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "vigil.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match VigilConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match vigil_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match vigil_core::db::health_check(&pool).await {
            Ok(v) => println!("PostgreSQL connected: {}", v),
            Err(e) => {
                println!("PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("Vigil DB health check passed");
        return Ok(());
    }

    // Classifier (GOOGLE_API_KEY from the environment)
    let classifier_config =
        GeminiClassifierConfig::new(None, config.classifier.gemini_model.clone());
    let classifier = match FailSafeClassifier::new(GeminiClassifierConfig {
        max_retries: config.classifier.max_retries,
        retry_delay_ms: config.classifier.retry_delay_ms,
        ..classifier_config
    }) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to create classifier: {}", e);
            std::process::exit(1);
        }
    };

    let scheduler = FocusScheduler::new(
        Arc::new(PgSessionStore::new(pool.clone())),
        Arc::new(PgActivitySource::new(pool)),
        classifier,
        ChangePublisher::default(),
        config.scheduler.clone(),
        config.aggregator.clone(),
        LastTickMap::default(),
    );

    scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    scheduler.stop();

    Ok(())
}
