use crate::error::AppResult;
use crate::models::{CanonicalEvent, DayIndexRow};
use crate::store::EventStore;
use chrono::{NaiveDate, Utc};
use tracing::{error, info, warn};

/// Fraction of failed upserts above which a run must not touch the day index
pub const FAILURE_RATE_LIMIT: f64 = 0.30;

/// Outcome of persisting one date's event set
#[derive(Debug, Default)]
pub struct WriteReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Ids of the candidates that made it into storage this run
    pub written_ids: Vec<String>,
    /// Whether the day index was merged (false on gate abort or empty input)
    pub index_merged: bool,
}

impl WriteReport {
    pub fn candidates(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.failed
    }
}

/// Upsert one date's deduplicated, enriched events and merge the day index.
///
/// Canonical events are never deleted here. The index update is union-only:
/// an overlapping or partial run can add references but never regress
/// previously stored ones. A majority-failed run aborts the index update so it
/// cannot overwrite a previously-correct index while looking successful.
pub async fn persist_day(
    store: &dyn EventStore,
    date: NaiveDate,
    events: Vec<CanonicalEvent>,
) -> AppResult<WriteReport> {
    let mut report = WriteReport::default();

    for event in events {
        match upsert_event(store, event).await {
            Ok(UpsertOutcome::Inserted(id)) => {
                report.inserted += 1;
                report.written_ids.push(id);
            }
            Ok(UpsertOutcome::Updated(id)) => {
                report.updated += 1;
                report.written_ids.push(id);
            }
            Ok(UpsertOutcome::Unchanged(id)) => {
                report.unchanged += 1;
                report.written_ids.push(id);
            }
            Err(e) => {
                report.failed += 1;
                warn!("Event upsert failed for {}: {}", date, e);
            }
        }
    }

    info!(
        date = %date,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        failed = report.failed,
        "persisted event candidates"
    );

    let total = report.candidates();
    if total == 0 {
        return Ok(report);
    }

    let failure_rate = report.failed as f64 / total as f64;
    if failure_rate > FAILURE_RATE_LIMIT {
        // A majority-failed run must never look successful and overwrite a
        // previously-correct index
        error!(
            date = %date,
            failed = report.failed,
            total = total,
            "CRITICAL: upsert failure rate {:.0}% exceeds {:.0}%, aborting day-index update",
            failure_rate * 100.0,
            FAILURE_RATE_LIMIT * 100.0
        );
        return Ok(report);
    }
    if report.failed > 0 {
        warn!(
            date = %date,
            failed = report.failed,
            total = total,
            "some upserts failed; proceeding with day-index merge"
        );
    }

    merge_day_index(store, date, &report.written_ids).await?;
    report.index_merged = true;

    Ok(report)
}

enum UpsertOutcome {
    Inserted(String),
    Updated(String),
    Unchanged(String),
}

/// Insert the event if its source identity is unknown; otherwise update only
/// when title/start/end changed or the stored record is missing generated
/// summary text. Unchanged data is an idempotent no-op.
async fn upsert_event(
    store: &dyn EventStore,
    mut event: CanonicalEvent,
) -> AppResult<UpsertOutcome> {
    let existing = store
        .find_event(event.source_system, &event.source_id)
        .await?;

    match existing {
        None => {
            event.last_written_at = Utc::now();
            store.put_event(&event).await?;
            Ok(UpsertOutcome::Inserted(event.id))
        }
        Some(stored) => {
            let changed = stored.title != event.title
                || stored.start != event.start
                || stored.end != event.end;
            if !changed && stored.summary_text.is_some() {
                return Ok(UpsertOutcome::Unchanged(stored.id));
            }

            event.id = stored.id;
            if event.summary_text.is_none() {
                event.summary_text = stored.summary_text;
            }
            if event.project_ref.is_none() {
                event.project_ref = stored.project_ref;
            }
            if event.category.is_none() {
                event.category = stored.category;
            }
            event.last_written_at = Utc::now();
            store.put_event(&event).await?;
            Ok(UpsertOutcome::Updated(event.id))
        }
    }
}

/// Union this run's successfully-written ids into the current day index.
///
/// The union is commutative and idempotent, so repeated, out-of-order, or
/// overlapping-in-effect runs converge to the same final state. When
/// anomalous duplicate rows exist the newest one is merged into; collapsing
/// the extras is the reader's job.
async fn merge_day_index(
    store: &dyn EventStore,
    date: NaiveDate,
    written_ids: &[String],
) -> AppResult<()> {
    let rows = store.day_index_rows(date).await?;
    let mut row = rows
        .into_iter()
        .max_by_key(|r| r.created_at)
        .unwrap_or_else(|| DayIndexRow::new(date));

    let before = row.event_ids.len();
    row.event_ids.extend(written_ids.iter().cloned());
    row.last_merged_at = Utc::now();
    store.put_day_index(&row).await?;

    info!(
        date = %date,
        added = row.event_ids.len() - before,
        total = row.event_ids.len(),
        "merged day index"
    );
    Ok(())
}
