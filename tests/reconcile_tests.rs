
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use daysched::config::Config;
use daysched::error::{enrichment_error, store_error, AppResult};
use daysched::models::{
    Attendee, CanonicalEvent, DayIndexRow, EntryTime, EventOverride, SourceSystem,
};
use daysched::pipeline::dedup::dedup_events;
use daysched::pipeline::enrich::{
    enrich_events, AttendeeDirectory, AttendeeProfile, Classification, Disabled,
    ProjectClassifier,
};
use daysched::pipeline::normalize::normalize;
use daysched::pipeline::reader::read_range;
use daysched::pipeline::writer::persist_day;
use daysched::pipeline::{Reconciler, RunOutcome};
use daysched::sources::google::{GoogleEventTime, GoogleRawEvent};
use daysched::sources::ics_feed::IcsRawEvent;
use daysched::sources::{CalendarSource, RawSourceEvent};
use daysched::store::EventStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use store_mock::MemoryStore;
use tokio::sync::RwLock;

fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

/// Canonical event ready for the writer, with summary text already attached
fn canonical(
    title: &str,
    source_id: &str,
    system: SourceSystem,
    start: DateTime<Utc>,
) -> CanonicalEvent {
    CanonicalEvent {
        id: uuid::Uuid::new_v4().to_string(),
        source_id: source_id.to_string(),
        source_system: system,
        title: title.to_string(),
        start,
        end: start + chrono::Duration::hours(1),
        all_day: false,
        timezone: "UTC".to_string(),
        location: None,
        description: None,
        attendees: Vec::new(),
        project_ref: None,
        category: None,
        summary_text: Some(format!("{} summary", title)),
        last_written_at: Utc::now(),
    }
}

fn google_timed_raw(id: &str, title: &str, start: &str) -> GoogleRawEvent {
    GoogleRawEvent {
        id: id.to_string(),
        summary: Some(title.to_string()),
        start: Some(GoogleEventTime {
            date_time: Some(start.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn test_config() -> Arc<RwLock<Config>> {
    Arc::new(RwLock::new(Config {
        redis_url: "redis://127.0.0.1:6379".to_string(),
        timezone: "UTC".to_string(),
        run_times: vec!["06:30".to_string()],
        google_calendar_id: String::new(),
        google_api_key: String::new(),
        ics_feed_url: String::new(),
        classifier_api_url: String::new(),
        classifier_api_key: String::new(),
        attendee_api_url: String::new(),
        attendee_monthly_budget: 500,
        internal_domain: "example.com".to_string(),
        sources: HashMap::new(),
    }))
}

async fn seed_index(
    store: &MemoryStore,
    date: NaiveDate,
    ids: &[&str],
    created_at: DateTime<Utc>,
) -> DayIndexRow {
    let mut row = DayIndexRow::new(date);
    row.created_at = created_at;
    row.last_merged_at = created_at;
    row.event_ids = ids.iter().map(|id| id.to_string()).collect();
    store.put_day_index(&row).await.unwrap();
    row
}

/// Running the writer twice on unchanged data must not grow the index
#[tokio::test]
async fn test_repeated_run_is_idempotent() {
    let store = MemoryStore::new();
    let date = test_date();
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    let events = vec![
        canonical("Standup", "uid-a", SourceSystem::GoogleCalendar, start),
        canonical("Review", "uid-b", SourceSystem::IcsFeed, start),
    ];

    let first = persist_day(&store, date, events.clone()).await.unwrap();
    assert_eq!(first.inserted, 2);
    assert!(first.index_merged);

    let second = persist_day(&store, date, events).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.unchanged, 2);

    let rows = store.day_index_rows(date).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_ids.len(), 2);
}

/// A run seeing only new events must union into the index, never replace it
#[tokio::test]
async fn test_index_merge_is_union_only() {
    let store = MemoryStore::new();
    let date = test_date();
    seed_index(&store, date, &["a", "b"], Utc::now()).await;

    let start = Utc.with_ymd_and_hms(2025, 1, 15, 14, 0, 0).unwrap();
    let only_c = vec![canonical("Late sync", "uid-c", SourceSystem::IcsFeed, start)];
    let report = persist_day(&store, date, only_c).await.unwrap();
    assert!(report.index_merged);

    let rows = store.day_index_rows(date).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].event_ids.len(), 3);
    assert!(rows[0].event_ids.contains("a"));
    assert!(rows[0].event_ids.contains("b"));
}

/// Store wrapper that refuses to write events with a marked title
struct FlakyStore {
    inner: MemoryStore,
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn get_event(&self, id: &str) -> AppResult<Option<CanonicalEvent>> {
        self.inner.get_event(id).await
    }
    async fn find_event(
        &self,
        system: SourceSystem,
        source_id: &str,
    ) -> AppResult<Option<CanonicalEvent>> {
        self.inner.find_event(system, source_id).await
    }
    async fn put_event(&self, event: &CanonicalEvent) -> AppResult<()> {
        if event.title.starts_with("boom") {
            return Err(store_error("injected write failure"));
        }
        self.inner.put_event(event).await
    }
    async fn day_index_rows(&self, date: NaiveDate) -> AppResult<Vec<DayIndexRow>> {
        self.inner.day_index_rows(date).await
    }
    async fn put_day_index(&self, row: &DayIndexRow) -> AppResult<()> {
        self.inner.put_day_index(row).await
    }
    async fn delete_day_index(&self, date: NaiveDate, row_id: &str) -> AppResult<()> {
        self.inner.delete_day_index(date, row_id).await
    }
    async fn get_override(&self, event_id: &str) -> AppResult<Option<EventOverride>> {
        self.inner.get_override(event_id).await
    }
    async fn put_override(&self, record: &EventOverride) -> AppResult<()> {
        self.inner.put_override(record).await
    }
    async fn attendee_lookups(&self, month: &str) -> AppResult<u64> {
        self.inner.attendee_lookups(month).await
    }
    async fn bump_attendee_lookups(&self, month: &str) -> AppResult<u64> {
        self.inner.bump_attendee_lookups(month).await
    }
}

/// 4 of 10 failed upserts (40%) must leave the existing index untouched
#[tokio::test]
async fn test_majority_failure_aborts_index_update() {
    let inner = MemoryStore::new();
    let date = test_date();
    seed_index(&inner, date, &["keep"], Utc::now()).await;
    let before = serde_json::to_string(&inner.day_index_rows(date).await.unwrap()[0]).unwrap();

    let store = FlakyStore {
        inner: inner.clone(),
    };
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    let mut events = Vec::new();
    for i in 0..6 {
        events.push(canonical(
            &format!("ok-{}", i),
            &format!("ok-uid-{}", i),
            SourceSystem::GoogleCalendar,
            start,
        ));
    }
    for i in 0..4 {
        events.push(canonical(
            &format!("boom-{}", i),
            &format!("boom-uid-{}", i),
            SourceSystem::GoogleCalendar,
            start,
        ));
    }

    let report = persist_day(&store, date, events).await.unwrap();
    assert_eq!(report.failed, 4);
    assert!(!report.index_merged);

    let rows = inner.day_index_rows(date).await.unwrap();
    assert_eq!(rows.len(), 1);
    let after = serde_json::to_string(&rows[0]).unwrap();
    assert_eq!(before, after);
}

/// A minority of failures (10%) warns but still merges the survivors
#[tokio::test]
async fn test_minority_failure_still_merges() {
    let store = FlakyStore {
        inner: MemoryStore::new(),
    };
    let date = test_date();
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    let mut events = Vec::new();
    for i in 0..9 {
        events.push(canonical(
            &format!("ok-{}", i),
            &format!("ok-uid-{}", i),
            SourceSystem::GoogleCalendar,
            start,
        ));
    }
    events.push(canonical(
        "boom",
        "boom-uid",
        SourceSystem::GoogleCalendar,
        start,
    ));

    let report = persist_day(&store, date, events).await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.index_merged);

    let rows = store.inner.day_index_rows(date).await.unwrap();
    assert_eq!(rows[0].event_ids.len(), 9);
}

/// Two events sharing a stable source identifier collapse into one, and the
/// source with richer attendee metadata wins the tie-break
#[tokio::test]
async fn test_dedup_by_shared_source_identifier() {
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    let feed = canonical("Standup", "shared-uid", SourceSystem::IcsFeed, start);
    let google = canonical("Standup", "shared-uid", SourceSystem::GoogleCalendar, start);

    // Feed event arrives first, Google still wins the identity
    let deduped = dedup_events(vec![feed, google]);
    assert_eq!(deduped.len(), 1);
    assert_eq!(deduped[0].source_system, SourceSystem::GoogleCalendar);
}

/// Equivalent instants in `Z` and `+00:00` notation dedup under the fallback key
#[tokio::test]
async fn test_dedup_fallback_normalizes_offset_notation() {
    let zulu = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let offset = DateTime::parse_from_rfc3339("2025-01-01T00:00:00+00:00")
        .unwrap()
        .with_timezone(&Utc);

    let a = canonical("Kickoff", "", SourceSystem::GoogleCalendar, zulu);
    let b = canonical("Kickoff", "", SourceSystem::IcsFeed, offset);

    let deduped = dedup_events(vec![a, b]);
    assert_eq!(deduped.len(), 1);
}

/// Malformed events never make it past the normalizer into storage
#[tokio::test]
async fn test_rejected_events_never_persist() {
    let tz = chrono_tz::UTC;
    let raws = vec![
        RawSourceEvent::Google(google_timed_raw("r1", "", "2025-01-15T09:00:00Z")),
        RawSourceEvent::Google(google_timed_raw("r2", "No Title", "2025-01-15T09:00:00Z")),
        RawSourceEvent::Google(GoogleRawEvent {
            id: "r3".to_string(),
            summary: Some("Has a title but no start".to_string()),
            ..Default::default()
        }),
        RawSourceEvent::IcsFeed(IcsRawEvent {
            uid: "r4".to_string(),
            summary: Some("Feed event without DTSTART".to_string()),
            ..Default::default()
        }),
    ];

    let mut survivors = Vec::new();
    for raw in raws {
        if let Ok(event) = normalize(raw, &tz) {
            survivors.push(event);
        }
    }
    assert!(survivors.is_empty());

    let store = MemoryStore::new();
    let report = persist_day(&store, test_date(), survivors).await.unwrap();
    assert_eq!(report.candidates(), 0);
    assert!(!report.index_merged);
    assert!(store.day_index_rows(test_date()).await.unwrap().is_empty());
    assert_eq!(store.event_count().await, 0);
}

/// Duplicate index rows for one date resolve to the newest row after one read
#[tokio::test]
async fn test_read_self_heals_duplicate_index_rows() {
    let store = MemoryStore::new();
    let date = test_date();
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();

    let mut old_event = canonical("Old", "uid-old", SourceSystem::GoogleCalendar, start);
    old_event.id = "e-old".to_string();
    store.put_event(&old_event).await.unwrap();
    let mut new_event = canonical("New", "uid-new", SourceSystem::GoogleCalendar, start);
    new_event.id = "e-new".to_string();
    store.put_event(&new_event).await.unwrap();

    let older = Utc.with_ymd_and_hms(2025, 1, 14, 6, 0, 0).unwrap();
    let newer = Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap();
    seed_index(&store, date, &["e-old"], older).await;
    let kept = seed_index(&store, date, &["e-new"], newer).await;

    let entries = read_range(&store, date, date).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title, "New");

    let rows = store.day_index_rows(date).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].row_id, kept.row_id);
}

/// A date with no index row reads as an empty schedule, not an error
#[tokio::test]
async fn test_unreconciled_date_reads_empty() {
    let store = MemoryStore::new();
    let entries = read_range(&store, test_date(), test_date()).await.unwrap();
    assert!(entries.is_empty());
}

/// Calendar source stub with optional delay, for exclusivity tests
struct StubSource {
    system: SourceSystem,
    events: Vec<RawSourceEvent>,
    delay_ms: u64,
}

#[async_trait]
impl CalendarSource for StubSource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn fetch_events(&self, _date: NaiveDate) -> AppResult<Vec<RawSourceEvent>> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        Ok(self.events.clone())
    }
}

/// Triggering while a run is in flight returns Skipped and writes nothing
#[tokio::test]
async fn test_trigger_while_running_is_skipped() {
    let store = MemoryStore::new();
    let raw = google_timed_raw("live-1", "Live event", &Utc::now().to_rfc3339());
    let source = StubSource {
        system: SourceSystem::GoogleCalendar,
        events: vec![RawSourceEvent::Google(raw)],
        delay_ms: 300,
    };

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(store.clone()),
        vec![Arc::new(source)],
        Arc::new(Disabled),
        Arc::new(Disabled),
        test_config(),
    ));

    let first = Arc::clone(&reconciler);
    let handle = tokio::spawn(async move { first.try_run().await });

    // Let the first run take the gate and park inside the source fetch
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(reconciler.gate().is_running());

    let second = reconciler.try_run().await.unwrap();
    assert_eq!(second, RunOutcome::Skipped);
    assert_eq!(store.event_count().await, 0);

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Completed { processed: 1 });
    assert_eq!(store.event_count().await, 1);
}

/// Store wrapper whose day-index reads always fail
struct BrokenIndexStore {
    inner: MemoryStore,
}

#[async_trait]
impl EventStore for BrokenIndexStore {
    async fn get_event(&self, id: &str) -> AppResult<Option<CanonicalEvent>> {
        self.inner.get_event(id).await
    }
    async fn find_event(
        &self,
        system: SourceSystem,
        source_id: &str,
    ) -> AppResult<Option<CanonicalEvent>> {
        self.inner.find_event(system, source_id).await
    }
    async fn put_event(&self, event: &CanonicalEvent) -> AppResult<()> {
        self.inner.put_event(event).await
    }
    async fn day_index_rows(&self, _date: NaiveDate) -> AppResult<Vec<DayIndexRow>> {
        Err(store_error("index storage unavailable"))
    }
    async fn put_day_index(&self, row: &DayIndexRow) -> AppResult<()> {
        self.inner.put_day_index(row).await
    }
    async fn delete_day_index(&self, date: NaiveDate, row_id: &str) -> AppResult<()> {
        self.inner.delete_day_index(date, row_id).await
    }
    async fn get_override(&self, event_id: &str) -> AppResult<Option<EventOverride>> {
        self.inner.get_override(event_id).await
    }
    async fn put_override(&self, record: &EventOverride) -> AppResult<()> {
        self.inner.put_override(record).await
    }
    async fn attendee_lookups(&self, month: &str) -> AppResult<u64> {
        self.inner.attendee_lookups(month).await
    }
    async fn bump_attendee_lookups(&self, month: &str) -> AppResult<u64> {
        self.inner.bump_attendee_lookups(month).await
    }
}

/// A failed run releases the gate so the next trigger is not skipped
#[tokio::test]
async fn test_gate_released_on_error_path() {
    let store = BrokenIndexStore {
        inner: MemoryStore::new(),
    };
    let raw = google_timed_raw("live-1", "Live event", &Utc::now().to_rfc3339());
    let source = StubSource {
        system: SourceSystem::GoogleCalendar,
        events: vec![RawSourceEvent::Google(raw)],
        delay_ms: 0,
    };

    let reconciler = Reconciler::new(
        Arc::new(store),
        vec![Arc::new(source)],
        Arc::new(Disabled),
        Arc::new(Disabled),
        test_config(),
    );

    assert!(reconciler.try_run().await.is_err());
    assert!(!reconciler.gate().is_running());

    // Next trigger runs again instead of being skipped
    assert!(reconciler.try_run().await.is_err());
}

/// Standing overrides win over pipeline-derived values at read time
#[tokio::test]
async fn test_override_takes_precedence() {
    let store = MemoryStore::new();
    let date = test_date();
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();

    let mut event = canonical("Weekly sync", "uid-1", SourceSystem::GoogleCalendar, start);
    event.id = "e1".to_string();
    store.put_event(&event).await.unwrap();
    seed_index(&store, date, &["e1"], Utc::now()).await;

    store
        .put_override(&EventOverride {
            event_id: "e1".to_string(),
            title: Some("Architecture review".to_string()),
            project_ref: Some("proj-9".to_string()),
            context: Some("deep work".to_string()),
        })
        .await
        .unwrap();

    let entries = read_range(&store, date, date).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title, "Architecture review");
    assert_eq!(entries[0].project_ref.as_deref(), Some("proj-9"));
    assert_eq!(entries[0].context.as_deref(), Some("deep work"));
}

/// All-day events round-trip to a date-only pair in the view
#[tokio::test]
async fn test_all_day_event_view_shape() {
    let tz = chrono_tz::UTC;
    let raw = GoogleRawEvent {
        id: "allday-1".to_string(),
        summary: Some("Offsite".to_string()),
        start: Some(GoogleEventTime {
            date: Some("2025-03-10".to_string()),
            ..Default::default()
        }),
        end: Some(GoogleEventTime {
            date: Some("2025-03-11".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let event = normalize(RawSourceEvent::Google(raw), &tz).unwrap();
    assert!(event.all_day);

    let store = MemoryStore::new();
    let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
    persist_day(&store, date, vec![event]).await.unwrap();

    let entries = read_range(&store, date, date).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].time,
        EntryTime::AllDay {
            start_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 11).unwrap(),
        }
    );
}

/// Attendee directory stub that counts its calls
struct CountingDirectory {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AttendeeDirectory for CountingDirectory {
    async fn lookup(&self, _email: &str) -> AppResult<Option<AttendeeProfile>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(AttendeeProfile {
            name: Some("Looked Up".to_string()),
            company: Some("Acme".to_string()),
        }))
    }
}

/// The monthly lookup budget hard-stops directory calls; internal addresses
/// are never looked up
#[tokio::test]
async fn test_attendee_budget_exhaustion() {
    let store = MemoryStore::new();
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    let mut event = canonical("Partner call", "uid-1", SourceSystem::GoogleCalendar, start);
    event.attendees = vec![
        Attendee::new("a@partner-one.com"),
        Attendee::new("b@partner-two.com"),
        Attendee::new("c@example.com"),
    ];
    let mut events = vec![event];

    let calls = Arc::new(AtomicUsize::new(0));
    let directory = CountingDirectory {
        calls: Arc::clone(&calls),
    };

    enrich_events(&mut events, &Disabled, &directory, &store, 1, "example.com").await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(events[0].attendees[0].company.as_deref(), Some("Acme"));
    assert!(events[0].attendees[1].company.is_none());
    assert!(events[0].attendees[2].company.is_none());
}

/// Discovering exhaustion must not push the stored counter past the budget
#[tokio::test]
async fn test_budget_counter_stops_at_budget() {
    let store = MemoryStore::new();
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    let mut event = canonical("Vendor sync", "uid-1", SourceSystem::GoogleCalendar, start);
    event.attendees = vec![
        Attendee::new("a@partner-one.com"),
        Attendee::new("b@partner-two.com"),
        Attendee::new("c@partner-three.com"),
    ];
    let mut events = vec![event];

    let calls = Arc::new(AtomicUsize::new(0));
    let directory = CountingDirectory {
        calls: Arc::clone(&calls),
    };

    enrich_events(&mut events, &Disabled, &directory, &store, 1, "example.com").await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let month = Utc::now().format("%Y-%m").to_string();
    assert_eq!(store.attendee_lookups(&month).await.unwrap(), 1);
}

/// An attendee entry without an @ is never treated as internal
#[tokio::test]
async fn test_domainless_attendee_is_not_internal() {
    let store = MemoryStore::new();
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    let mut event = canonical("Mixed list", "uid-1", SourceSystem::GoogleCalendar, start);
    event.attendees = vec![
        // Malformed entry equal to the internal domain
        Attendee::new("example.com"),
        Attendee::new("c@example.com"),
    ];
    let mut events = vec![event];

    let calls = Arc::new(AtomicUsize::new(0));
    let directory = CountingDirectory {
        calls: Arc::clone(&calls),
    };

    enrich_events(&mut events, &Disabled, &directory, &store, 500, "example.com").await;

    // The domainless entry is looked up like any other external address;
    // only the real internal address is skipped
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(events[0].attendees[0].company.as_deref(), Some("Acme"));
    assert!(events[0].attendees[1].company.is_none());
}

/// Classifier stub that always fails
struct FailingClassifier;

#[async_trait]
impl ProjectClassifier for FailingClassifier {
    async fn classify(&self, _event: &CanonicalEvent) -> AppResult<Option<Classification>> {
        Err(enrichment_error("oracle unavailable"))
    }
}

/// Oracle failure never blocks persistence of the underlying event
#[tokio::test]
async fn test_classifier_failure_degrades_gracefully() {
    let store = MemoryStore::new();
    let date = test_date();
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
    let mut event = canonical("Budget review", "uid-1", SourceSystem::GoogleCalendar, start);
    event.summary_text = None;
    let mut events = vec![event];

    enrich_events(
        &mut events,
        &FailingClassifier,
        &Disabled,
        &store,
        500,
        "example.com",
    )
    .await;
    assert!(events[0].summary_text.is_none());

    let report = persist_day(&store, date, events).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert!(report.index_merged);
    assert_eq!(store.event_count().await, 1);
}
