use super::{Reconciler, RunOutcome};
use crate::config::Config;
use crate::utils::time::next_run_time;
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{error, info};

/// Start the fixed wall-clock reconciliation scheduler.
///
/// Each tick goes through `Reconciler::try_run`, the same path a manual
/// trigger uses; a tick that arrives while the previous run is still holding
/// the gate comes back as `Skipped`.
pub async fn start_scheduler(reconciler: Arc<Reconciler>, config: Arc<RwLock<Config>>) {
    let (run_times, timezone) = {
        let config_read = config.read().await;
        (config_read.run_times.clone(), config_read.timezone.clone())
    };
    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);

    tokio::spawn(async move {
        loop {
            let now = Utc::now().with_timezone(&tz);
            let Some(next) = next_run_time(now, &run_times) else {
                error!("No valid run times configured, scheduler idle for an hour");
                sleep(TokioDuration::from_secs(3600)).await;
                continue;
            };

            let wait = (next - now).num_seconds().max(1) as u64;
            info!("Next reconciliation pass scheduled for {}", next);
            sleep(TokioDuration::from_secs(wait)).await;

            match reconciler.try_run().await {
                Ok(RunOutcome::Completed { processed }) => {
                    info!(processed, "scheduled reconciliation pass finished");
                }
                Ok(RunOutcome::Skipped) => {
                    info!("scheduled pass skipped, previous run still in flight");
                }
                Err(e) => {
                    error!("Scheduled reconciliation pass failed: {}", e);
                }
            }
        }
    });
}
