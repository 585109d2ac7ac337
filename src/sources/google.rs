use super::{CalendarSource, RawSourceEvent};
use crate::config::Config;
use crate::error::{source_error, AppResult};
use crate::models::SourceSystem;
use crate::utils::time::day_window;
use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Start or end of a Google event: either a timezone-qualified instant or a
/// bare date for all-day events
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
    pub time_zone: Option<String>,
}

/// Attendee as Google encodes it: a structured list entry
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleRawAttendee {
    pub email: String,
    pub display_name: Option<String>,
    pub response_status: Option<String>,
}

/// One event as returned by the Google Calendar events endpoint
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleRawEvent {
    pub id: String,
    pub i_cal_uid: Option<String>,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<GoogleEventTime>,
    pub end: Option<GoogleEventTime>,
    pub attendees: Vec<GoogleRawAttendee>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GoogleEventsResponse {
    items: Vec<GoogleRawEvent>,
}

/// Calendar source backed by the Google Calendar REST API
pub struct GoogleCalendarSource {
    config: Arc<RwLock<Config>>,
    client: Client,
}

impl GoogleCalendarSource {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl CalendarSource for GoogleCalendarSource {
    fn system(&self) -> SourceSystem {
        SourceSystem::GoogleCalendar
    }

    async fn fetch_events(&self, date: NaiveDate) -> AppResult<Vec<RawSourceEvent>> {
        let (calendar_id, api_key, timezone) = {
            let config_read = self.config.read().await;
            (
                config_read.google_calendar_id.clone(),
                config_read.google_api_key.clone(),
                config_read.timezone.clone(),
            )
        };
        let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);

        // The fetch window is the reference-timezone day converted to UTC, so
        // events near local midnight land in the date they belong to
        let (window_start, window_end) = day_window(date, &tz);
        let time_min = window_start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let time_max = window_end.to_rfc3339_opts(SecondsFormat::Secs, true);

        let url_str = format!(
            "https://www.googleapis.com/calendar/v3/calendars/{}/events",
            calendar_id
        );
        let mut url = Url::parse(&url_str)
            .map_err(|e| source_error(&format!("Failed to parse URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("timeMin", &time_min)
            .append_pair("timeMax", &time_max)
            .append_pair("singleEvents", "true")
            .append_pair("orderBy", "startTime")
            .append_pair("key", &api_key);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| source_error(&format!("Failed to fetch events: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(source_error(&format!(
                "Failed to fetch events: HTTP {} - {}",
                status, error_body
            )));
        }

        let response_data: GoogleEventsResponse = response
            .json()
            .await
            .map_err(|e| source_error(&format!("Failed to parse events response: {}", e)))?;

        let events = response_data
            .items
            .into_iter()
            .filter(|e| e.status.as_deref() != Some("cancelled"))
            .map(RawSourceEvent::Google)
            .collect();

        Ok(events)
    }
}
