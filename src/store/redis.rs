use super::{keys, EventStore};
use crate::error::{store_error, AppResult};
use crate::models::{CanonicalEvent, DayIndexRow, EventOverride, SourceSystem};
use async_trait::async_trait;
use chrono::NaiveDate;
use redis::{aio::Connection, AsyncCommands, Client as RedisClient};

/// Redis-backed implementation of the durable store
pub struct RedisStore {
    client: RedisClient,
}

impl RedisStore {
    /// Create a store over the given Redis URL
    pub fn new(redis_url: &str) -> AppResult<Self> {
        let client = RedisClient::open(redis_url)
            .map_err(|e| store_error(&format!("Failed to create Redis client: {}", e)))?;
        Ok(Self { client })
    }

    /// Get a redis connection
    async fn connection(&self) -> AppResult<Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| store_error(&format!("Failed to connect to Redis: {}", e)))
    }

    fn event_key(id: &str) -> String {
        format!("{}:{}", keys::EVENT, id)
    }

    fn ident_key(system: SourceSystem, source_id: &str) -> String {
        format!("{}:{}:{}", keys::EVENT_IDENT, system.key_tag(), source_id)
    }

    fn index_key(date: NaiveDate, row_id: &str) -> String {
        format!("{}:{}:{}", keys::DAY_INDEX, date, row_id)
    }

    fn override_key(event_id: &str) -> String {
        format!("{}:{}", keys::OVERRIDE, event_id)
    }
}

#[async_trait]
impl EventStore for RedisStore {
    async fn get_event(&self, id: &str) -> AppResult<Option<CanonicalEvent>> {
        let mut conn = self.connection().await?;
        let key = Self::event_key(id);

        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| store_error(&format!("Redis error: {}", e)))?;
        if !exists {
            return Ok(None);
        }

        let json: String = conn
            .get(&key)
            .await
            .map_err(|e| store_error(&format!("Failed to read event: {}", e)))?;
        let event: CanonicalEvent = serde_json::from_str(&json)?;
        Ok(Some(event))
    }

    async fn find_event(
        &self,
        system: SourceSystem,
        source_id: &str,
    ) -> AppResult<Option<CanonicalEvent>> {
        let mut conn = self.connection().await?;
        let ident = Self::ident_key(system, source_id);

        let exists: bool = conn
            .exists(&ident)
            .await
            .map_err(|e| store_error(&format!("Redis error: {}", e)))?;
        if !exists {
            return Ok(None);
        }

        let id: String = conn
            .get(&ident)
            .await
            .map_err(|e| store_error(&format!("Failed to read identity key: {}", e)))?;
        drop(conn);

        self.get_event(&id).await
    }

    async fn put_event(&self, event: &CanonicalEvent) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(event)?;

        () = conn
            .set(Self::event_key(&event.id), json)
            .await
            .map_err(|e| store_error(&format!("Failed to save event: {}", e)))?;
        () = conn
            .set(
                Self::ident_key(event.source_system, &event.source_id),
                event.id.clone(),
            )
            .await
            .map_err(|e| store_error(&format!("Failed to save identity key: {}", e)))?;

        Ok(())
    }

    async fn day_index_rows(&self, date: NaiveDate) -> AppResult<Vec<DayIndexRow>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}:{}:*", keys::DAY_INDEX, date);

        let row_keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| store_error(&format!("Failed to scan day-index rows: {}", e)))?;

        let mut rows = Vec::with_capacity(row_keys.len());
        for key in row_keys {
            let json: String = conn
                .get(&key)
                .await
                .map_err(|e| store_error(&format!("Failed to read day-index row: {}", e)))?;
            let row: DayIndexRow = serde_json::from_str(&json)?;
            rows.push(row);
        }

        Ok(rows)
    }

    async fn put_day_index(&self, row: &DayIndexRow) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(row)?;

        () = conn
            .set(Self::index_key(row.date, &row.row_id), json)
            .await
            .map_err(|e| store_error(&format!("Failed to save day-index row: {}", e)))?;

        Ok(())
    }

    async fn delete_day_index(&self, date: NaiveDate, row_id: &str) -> AppResult<()> {
        let mut conn = self.connection().await?;

        () = conn
            .del(Self::index_key(date, row_id))
            .await
            .map_err(|e| store_error(&format!("Failed to delete day-index row: {}", e)))?;

        Ok(())
    }

    async fn get_override(&self, event_id: &str) -> AppResult<Option<EventOverride>> {
        let mut conn = self.connection().await?;
        let key = Self::override_key(event_id);

        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| store_error(&format!("Redis error: {}", e)))?;
        if !exists {
            return Ok(None);
        }

        let json: String = conn
            .get(&key)
            .await
            .map_err(|e| store_error(&format!("Failed to read override: {}", e)))?;
        let record: EventOverride = serde_json::from_str(&json)?;
        Ok(Some(record))
    }

    async fn put_override(&self, record: &EventOverride) -> AppResult<()> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(record)?;

        () = conn
            .set(Self::override_key(&record.event_id), json)
            .await
            .map_err(|e| store_error(&format!("Failed to save override: {}", e)))?;

        Ok(())
    }

    async fn attendee_lookups(&self, month: &str) -> AppResult<u64> {
        let mut conn = self.connection().await?;
        let key = format!("{}:{}", keys::ATTENDEE_LOOKUPS, month);

        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| store_error(&format!("Redis error: {}", e)))?;
        if !exists {
            return Ok(0);
        }

        let count: u64 = conn
            .get(&key)
            .await
            .map_err(|e| store_error(&format!("Failed to read lookup counter: {}", e)))?;
        Ok(count)
    }

    async fn bump_attendee_lookups(&self, month: &str) -> AppResult<u64> {
        let mut conn = self.connection().await?;
        let key = format!("{}:{}", keys::ATTENDEE_LOOKUPS, month);

        let count: u64 = conn
            .incr(&key, 1u64)
            .await
            .map_err(|e| store_error(&format!("Failed to bump lookup counter: {}", e)))?;

        Ok(count)
    }
}
