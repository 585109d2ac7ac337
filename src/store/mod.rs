mod redis;

pub use redis::RedisStore;

use crate::error::AppResult;
use crate::models::{CanonicalEvent, DayIndexRow, EventOverride, SourceSystem};
use async_trait::async_trait;
use chrono::NaiveDate;

// Storage key prefixes
pub mod keys {
    pub const EVENT: &str = "event";
    pub const EVENT_IDENT: &str = "event_ident";
    pub const DAY_INDEX: &str = "day_index";
    pub const OVERRIDE: &str = "override";
    pub const ATTENDEE_LOOKUPS: &str = "attendee_lookups";
}

/// Keyed read/write interface over the durable store.
///
/// The production implementation is [`RedisStore`]; tests substitute an
/// in-memory mock. Writers never delete canonical events; day-index rows are
/// deleted only by the reader when collapsing duplicate rows for a date.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fetch a canonical event by its storage id
    async fn get_event(&self, id: &str) -> AppResult<Option<CanonicalEvent>>;

    /// Fetch a canonical event by its source identity
    async fn find_event(
        &self,
        system: SourceSystem,
        source_id: &str,
    ) -> AppResult<Option<CanonicalEvent>>;

    /// Insert or replace a canonical event row and its identity mapping
    async fn put_event(&self, event: &CanonicalEvent) -> AppResult<()>;

    /// All day-index rows stored for a date; more than one is an anomaly
    async fn day_index_rows(&self, date: NaiveDate) -> AppResult<Vec<DayIndexRow>>;

    /// Insert or replace a day-index row
    async fn put_day_index(&self, row: &DayIndexRow) -> AppResult<()>;

    /// Delete one day-index row
    async fn delete_day_index(&self, date: NaiveDate, row_id: &str) -> AppResult<()>;

    /// Fetch the standing override for an event, if any
    async fn get_override(&self, event_id: &str) -> AppResult<Option<EventOverride>>;

    /// Insert or replace an override record
    async fn put_override(&self, record: &EventOverride) -> AppResult<()>;

    /// Current attendee-lookup count for a month key (`YYYY-MM`); 0 when unset
    async fn attendee_lookups(&self, month: &str) -> AppResult<u64>;

    /// Increment and return the attendee-lookup counter for a month key
    /// (`YYYY-MM`)
    async fn bump_attendee_lookups(&self, month: &str) -> AppResult<u64>;
}
