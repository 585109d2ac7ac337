use crate::config::Config;
use crate::error::Error;
use crate::pipeline::enrich::{
    AttendeeDirectory, Disabled, HttpAttendeeDirectory, HttpProjectClassifier, ProjectClassifier,
};
use crate::pipeline::{scheduler, Reconciler, RunOutcome};
use crate::shutdown;
use crate::sources::{CalendarSource, GoogleCalendarSource, IcsFeedSource};
use crate::store::{EventStore, RedisStore};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging with environment-based configuration
pub fn init_logging() -> miette::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set up logging: {}", e)))?;

    Ok(())
}

/// Load and initialize the application config
pub async fn load_config() -> miette::Result<Arc<RwLock<Config>>> {
    match Config::load() {
        Ok(config) => Ok(Arc::new(RwLock::new(config))),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e.into())
        }
    }
}

/// Wire the store, sources and oracles together and run the service until a
/// shutdown signal arrives
pub async fn start_service(config: Arc<RwLock<Config>>) -> miette::Result<()> {
    let reconciler = Arc::new(build_reconciler(Arc::clone(&config)).await?);

    // Start the wall-clock scheduler
    scheduler::start_scheduler(Arc::clone(&reconciler), Arc::clone(&config)).await;

    // Run one pass right away so a fresh deployment serves data without
    // waiting for the next scheduled time
    match reconciler.try_run().await {
        Ok(RunOutcome::Completed { processed }) => {
            info!(processed, "initial reconciliation pass finished");
        }
        Ok(RunOutcome::Skipped) => {
            info!("initial pass skipped, a run is already in flight");
        }
        Err(e) => {
            error!("Initial reconciliation pass failed: {}", e);
        }
    }

    // Create shutdown channel and wait for a signal
    let (shutdown_send, shutdown_recv) = oneshot::channel();

    tokio::spawn(async move {
        shutdown::handle_signals(shutdown_send).await;
    });

    let _ = shutdown_recv.await;
    info!("Received shutdown signal, stopping service");
    Ok(())
}

/// Build the reconciler from configuration
pub async fn build_reconciler(config: Arc<RwLock<Config>>) -> miette::Result<Reconciler> {
    let config_read = config.read().await;

    let store: Arc<dyn EventStore> = Arc::new(RedisStore::new(&config_read.redis_url)?);

    let mut sources: Vec<Arc<dyn CalendarSource>> = Vec::new();
    if config_read.is_source_enabled("google_calendar") {
        sources.push(Arc::new(GoogleCalendarSource::new(Arc::clone(&config))));
    }
    if config_read.is_source_enabled("ics_feed") {
        sources.push(Arc::new(IcsFeedSource::new(Arc::clone(&config))));
    }
    if sources.is_empty() {
        warn!("All calendar sources are disabled; passes will persist nothing");
    }

    let classifier: Arc<dyn ProjectClassifier> = if config_read.classifier_api_url.is_empty() {
        info!("No classifier endpoint configured, project enrichment disabled");
        Arc::new(Disabled)
    } else {
        Arc::new(HttpProjectClassifier::new(
            config_read.classifier_api_url.clone(),
            config_read.classifier_api_key.clone(),
        ))
    };

    let directory: Arc<dyn AttendeeDirectory> = if config_read.attendee_api_url.is_empty() {
        info!("No attendee directory configured, attendee enrichment disabled");
        Arc::new(Disabled)
    } else {
        Arc::new(HttpAttendeeDirectory::new(
            config_read.attendee_api_url.clone(),
        ))
    };

    drop(config_read);

    Ok(Reconciler::new(
        store,
        sources,
        classifier,
        directory,
        config,
    ))
}
