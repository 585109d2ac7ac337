use crate::error::AppResult;
use crate::models::{CanonicalEvent, DayIndexRow, EntryTime, ScheduleEntry};
use crate::store::EventStore;
use chrono::NaiveDate;
use tracing::{info, warn};

/// Read the reconciled, display-ready schedule for an inclusive date range.
///
/// A date with no index row yet yields nothing — that is the normal
/// "not reconciled yet" state, not an error.
pub async fn read_range(
    store: &dyn EventStore,
    from: NaiveDate,
    to: NaiveDate,
) -> AppResult<Vec<ScheduleEntry>> {
    let mut entries = Vec::new();
    let mut date = from;
    while date <= to {
        entries.extend(read_day(store, date).await?);
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    Ok(entries)
}

/// Read one date, self-healing duplicate index rows along the way
async fn read_day(store: &dyn EventStore, date: NaiveDate) -> AppResult<Vec<ScheduleEntry>> {
    let rows = store.day_index_rows(date).await?;
    let row = match rows.len() {
        0 => return Ok(Vec::new()),
        1 => rows.into_iter().next(),
        _ => {
            // Uniqueness violation: repairable, not fatal. Keep the newest
            // row, delete the rest, then retry the fetch once.
            heal_duplicate_rows(store, date, rows).await?;
            let retried = store.day_index_rows(date).await?;
            if retried.len() > 1 {
                warn!(
                    date = %date,
                    rows = retried.len(),
                    "day index still anomalous after repair, degrading to empty"
                );
                return Ok(Vec::new());
            }
            retried.into_iter().next()
        }
    };

    let Some(row) = row else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::with_capacity(row.event_ids.len());
    for event_id in &row.event_ids {
        match store.get_event(event_id).await? {
            Some(event) => entries.push(shape_entry(store, event).await?),
            None => {
                warn!(date = %date, event_id = %event_id, "dangling day-index reference, skipping");
            }
        }
    }

    entries.sort_by_key(|entry| match &entry.time {
        EntryTime::Timed { start, .. } => *start,
        EntryTime::AllDay { start_date, .. } => start_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_default(),
    });

    Ok(entries)
}

/// Collapse duplicate index rows for a date: keep the newest by creation
/// time, delete the rest
async fn heal_duplicate_rows(
    store: &dyn EventStore,
    date: NaiveDate,
    rows: Vec<DayIndexRow>,
) -> AppResult<()> {
    let Some(keep) = rows.iter().max_by_key(|r| r.created_at).map(|r| r.row_id.clone()) else {
        return Ok(());
    };

    info!(
        date = %date,
        rows = rows.len(),
        keep = %keep,
        "collapsing duplicate day-index rows"
    );

    for row in rows {
        if row.row_id != keep {
            store.delete_day_index(date, &row.row_id).await?;
        }
    }
    Ok(())
}

/// Reshape a canonical event into the external view, applying any standing
/// override as the final transform
async fn shape_entry(store: &dyn EventStore, event: CanonicalEvent) -> AppResult<ScheduleEntry> {
    // All-day rows hold UTC-midnight instants; reconstruct the date-only pair
    let time = if event.all_day {
        EntryTime::AllDay {
            start_date: event.start.date_naive(),
            end_date: event.end.date_naive(),
        }
    } else {
        EntryTime::Timed {
            start: event.start,
            end: event.end,
            timezone: event.timezone.clone(),
        }
    };

    let mut entry = ScheduleEntry {
        id: event.id.clone(),
        title: event.title,
        time,
        location: event.location,
        description: event.description,
        attendees: event.attendees,
        project_ref: event.project_ref,
        category: event.category,
        summary_text: event.summary_text,
        context: None,
        source: event.source_system,
    };

    // Overrides always take precedence over pipeline-derived values
    if let Some(record) = store.get_override(&event.id).await? {
        if let Some(title) = record.title {
            entry.title = title;
        }
        if let Some(project_ref) = record.project_ref {
            entry.project_ref = Some(project_ref);
        }
        if let Some(context) = record.context {
            entry.context = Some(context);
        }
    }

    Ok(entry)
}
