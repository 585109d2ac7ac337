pub mod dedup;
pub mod enrich;
pub mod gate;
pub mod normalize;
pub mod reader;
pub mod scheduler;
pub mod writer;

pub use gate::RunGate;

use crate::config::Config;
use crate::error::{config_error, AppResult};
use crate::models::CanonicalEvent;
use crate::sources::CalendarSource;
use crate::store::EventStore;
use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use enrich::{AttendeeDirectory, ProjectClassifier};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Result of one trigger of the reconciliation pipeline
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// A full pass ran; `processed` counts the events that reached storage
    Completed { processed: usize },
    /// A run was already in flight; nothing was done
    Skipped,
}

/// Orchestrates normalize → deduplicate → enrich → persist over the small
/// fixed date window (today, tomorrow), guarded by single-flight exclusion.
pub struct Reconciler {
    store: Arc<dyn EventStore>,
    sources: Vec<Arc<dyn CalendarSource>>,
    classifier: Arc<dyn ProjectClassifier>,
    directory: Arc<dyn AttendeeDirectory>,
    config: Arc<RwLock<Config>>,
    gate: RunGate,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn EventStore>,
        sources: Vec<Arc<dyn CalendarSource>>,
        classifier: Arc<dyn ProjectClassifier>,
        directory: Arc<dyn AttendeeDirectory>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            store,
            sources,
            classifier,
            directory,
            config,
            gate: RunGate::new(),
        }
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    /// Run one full reconciliation pass unless one is already in flight.
    ///
    /// Scheduled and manual triggers share this exact path. The permit is
    /// released on every exit path, so a failed run never blocks future ones.
    pub async fn try_run(&self) -> AppResult<RunOutcome> {
        let Some(_permit) = self.gate.try_acquire() else {
            info!("reconciliation already in flight, skipping trigger");
            return Ok(RunOutcome::Skipped);
        };

        let tz = self.reference_timezone().await?;
        let today = Utc::now().with_timezone(&tz).date_naive();
        let dates = [today, today + Duration::days(1)];

        let mut processed = 0;
        for date in dates {
            // The next date does not start until this date's writer stage
            // completed or was aborted by the validation gate
            processed += self.run_date(date, &tz).await?;
        }

        info!(processed, "reconciliation pass completed");
        Ok(RunOutcome::Completed { processed })
    }

    async fn reference_timezone(&self) -> AppResult<Tz> {
        let name = {
            let config_read = self.config.read().await;
            config_read.timezone.clone()
        };
        name.parse::<Tz>()
            .map_err(|_| config_error(&format!("Invalid timezone: {}", name)))
    }

    /// One reconciliation pass for a single date
    async fn run_date(&self, date: NaiveDate, tz: &Tz) -> AppResult<usize> {
        // Both upstream fetches are issued concurrently and joined; a failing
        // source contributes zero events instead of failing the pass
        let fetches = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            async move { (source.system(), source.fetch_events(date).await) }
        });
        let fetched = futures::future::join_all(fetches).await;

        let mut raw_events = Vec::new();
        for (system, result) in fetched {
            match result {
                Ok(events) => {
                    info!(date = %date, source = %system, count = events.len(), "fetched events");
                    raw_events.extend(events);
                }
                Err(e) => {
                    warn!(date = %date, source = %system, "source fetch failed, treating as empty: {}", e);
                }
            }
        }

        let mut events: Vec<CanonicalEvent> = Vec::with_capacity(raw_events.len());
        for raw in raw_events {
            let system = raw.source_system();
            match normalize::normalize(raw, tz) {
                Ok(event) => events.push(event),
                Err(reason) => {
                    warn!(date = %date, source = %system, "rejected event: {}", reason);
                }
            }
        }

        events.sort_by_key(|e| e.start);
        events.retain(|e| covers_date(e, date, tz));

        let mut events = dedup::dedup_events(events);

        let (budget, internal_domain) = {
            let config_read = self.config.read().await;
            (
                config_read.attendee_monthly_budget,
                config_read.internal_domain.clone(),
            )
        };
        enrich::enrich_events(
            &mut events,
            self.classifier.as_ref(),
            self.directory.as_ref(),
            self.store.as_ref(),
            budget,
            &internal_domain,
        )
        .await;

        let report = writer::persist_day(self.store.as_ref(), date, events).await?;
        Ok(report.written_ids.len())
    }
}

/// Whether an event belongs on the given date in the reference timezone
fn covers_date(event: &CanonicalEvent, date: NaiveDate, tz: &Tz) -> bool {
    if event.all_day {
        let start = event.start.date_naive();
        let end = event.end.date_naive();
        // End is exclusive for all-day spans
        return start == date || (start < date && date < end);
    }
    event.start.with_timezone(tz).date_naive() == date
}
