use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Originating calendar system for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceSystem {
    GoogleCalendar,
    IcsFeed,
}

impl SourceSystem {
    /// Stable lowercase tag used in storage keys
    pub fn key_tag(&self) -> &'static str {
        match self {
            SourceSystem::GoogleCalendar => "google",
            SourceSystem::IcsFeed => "ics",
        }
    }

    /// Preference rank for deduplication tie-breaks; lower wins.
    /// Google carries structured attendee metadata, the feed does not.
    pub fn preference_rank(&self) -> u8 {
        match self {
            SourceSystem::GoogleCalendar => 0,
            SourceSystem::IcsFeed => 1,
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_tag())
    }
}

/// Attendee response state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResponseState {
    Accepted,
    Declined,
    Tentative,
    #[default]
    NeedsAction,
}

/// One attendee of a canonical event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub name: Option<String>,
    pub response: ResponseState,
    /// Filled in by the attendee-enrichment oracle when available
    pub company: Option<String>,
}

impl Attendee {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            response: ResponseState::NeedsAction,
            company: None,
        }
    }
}

/// The single reconciled representation of a real-world calendar occurrence,
/// independent of originating source.
///
/// Invariants: `title` is non-empty and never a "no title" sentinel; `start`
/// and `end` are always resolvable instants. All-day events carry UTC-midnight
/// instants plus the `all_day` flag, never a null time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Storage key
    pub id: String,
    /// Stable occurrence identifier from the originating system
    pub source_id: String,
    pub source_system: SourceSystem,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    /// IANA timezone label the event was expressed in
    pub timezone: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub attendees: Vec<Attendee>,
    pub project_ref: Option<String>,
    pub category: Option<String>,
    pub summary_text: Option<String>,
    pub last_written_at: DateTime<Utc>,
}

/// One durable row of the per-date event index.
///
/// Exactly one row per date in a healthy state; `event_ids` is union-only
/// across writer runs. Duplicate rows for a date are a storage anomaly the
/// reader collapses (keep newest, delete the rest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayIndexRow {
    pub date: NaiveDate,
    pub row_id: String,
    pub event_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_merged_at: DateTime<Utc>,
}

impl DayIndexRow {
    pub fn new(date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            date,
            row_id: uuid::Uuid::new_v4().to_string(),
            event_ids: BTreeSet::new(),
            created_at: now,
            last_merged_at: now,
        }
    }
}

/// Manual correction record, applied only at read time and always winning
/// over pipeline-derived values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventOverride {
    pub event_id: String,
    pub title: Option<String>,
    pub project_ref: Option<String>,
    pub context: Option<String>,
}

/// Start/end of a schedule entry as the display layer expects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryTime {
    /// Timed event: instant pair plus the timezone it was expressed in
    Timed {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timezone: String,
    },
    /// All-day event: date-only pair
    AllDay {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
}

/// Display-ready view of one reconciled event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub title: String,
    pub time: EntryTime,
    pub location: Option<String>,
    pub description: Option<String>,
    pub attendees: Vec<Attendee>,
    pub project_ref: Option<String>,
    pub category: Option<String>,
    pub summary_text: Option<String>,
    pub context: Option<String>,
    pub source: SourceSystem,
}
