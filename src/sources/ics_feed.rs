use super::{CalendarSource, RawSourceEvent};
use crate::config::Config;
use crate::error::{source_error, AppResult};
use crate::models::SourceSystem;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One VEVENT as the subscribed feed shapes it.
///
/// Date/time values are kept in the feed's own encoding (`YYYYMMDD`,
/// `YYYYMMDDTHHMMSSZ`, or a local stamp with a TZID parameter); attendees come
/// as one delimiter-separated string. Decoding both is the normalizer's job.
#[derive(Debug, Clone, Default)]
pub struct IcsRawEvent {
    pub uid: String,
    pub summary: Option<String>,
    pub dtstart: Option<String>,
    pub dtstart_tzid: Option<String>,
    pub dtend: Option<String>,
    pub dtend_tzid: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    /// `Name <email>; Name <email>` as joined from the feed's ATTENDEE lines
    pub attendees: Option<String>,
}

/// Calendar source backed by a subscribed ICS feed
pub struct IcsFeedSource {
    config: Arc<RwLock<Config>>,
    client: Client,
}

impl IcsFeedSource {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl CalendarSource for IcsFeedSource {
    fn system(&self) -> SourceSystem {
        SourceSystem::IcsFeed
    }

    async fn fetch_events(&self, date: NaiveDate) -> AppResult<Vec<RawSourceEvent>> {
        let feed_url = {
            let config_read = self.config.read().await;
            config_read.ics_feed_url.clone()
        };

        let response = self
            .client
            .get(&feed_url)
            .send()
            .await
            .map_err(|e| source_error(&format!("Failed to fetch feed: {}", e)))?;

        if !response.status().is_success() {
            return Err(source_error(&format!(
                "Failed to fetch feed: HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| source_error(&format!("Failed to read feed body: {}", e)))?;

        let events = parse_feed(&body)
            .into_iter()
            .filter(|e| candidate_for_date(e, date))
            .map(RawSourceEvent::IcsFeed)
            .collect();

        Ok(events)
    }
}

/// Unfold RFC 5545 folded lines (continuation lines start with a space or tab)
fn unfold_lines(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in content.lines() {
        let line = raw.trim_end_matches('\r');
        if (line.starts_with(' ') || line.starts_with('\t')) && !lines.is_empty() {
            if let Some(last) = lines.last_mut() {
                last.push_str(&line[1..]);
            }
        } else {
            lines.push(line.to_string());
        }
    }
    lines
}

/// Split a content line into (name, params, value)
fn split_property(line: &str) -> Option<(&str, Vec<&str>, &str)> {
    let colon = line.find(':')?;
    let (head, value) = line.split_at(colon);
    let value = &value[1..];
    let mut parts = head.split(';');
    let name = parts.next()?;
    Some((name, parts.collect(), value))
}

fn param_value<'a>(params: &[&'a str], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find_map(|p| p.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
}

/// Walk the VEVENT blocks of a feed and collect the raw events
pub fn parse_feed(content: &str) -> Vec<IcsRawEvent> {
    let mut events = Vec::new();
    let mut current: Option<IcsRawEvent> = None;
    let mut attendee_parts: Vec<String> = Vec::new();

    for line in unfold_lines(content) {
        if line == "BEGIN:VEVENT" {
            current = Some(IcsRawEvent::default());
            attendee_parts.clear();
            continue;
        }
        if line == "END:VEVENT" {
            if let Some(mut event) = current.take() {
                if !attendee_parts.is_empty() {
                    event.attendees = Some(attendee_parts.join("; "));
                }
                if !event.uid.is_empty() {
                    events.push(event);
                }
            }
            continue;
        }

        let Some(event) = current.as_mut() else {
            continue;
        };
        let Some((name, params, value)) = split_property(&line) else {
            continue;
        };

        match name {
            "UID" => event.uid = value.trim().to_string(),
            "SUMMARY" => event.summary = Some(unescape_text(value)),
            "LOCATION" => event.location = Some(unescape_text(value)),
            "DESCRIPTION" => event.description = Some(unescape_text(value)),
            "DTSTART" => {
                event.dtstart = Some(value.trim().to_string());
                event.dtstart_tzid = param_value(&params, "TZID").map(str::to_string);
            }
            "DTEND" => {
                event.dtend = Some(value.trim().to_string());
                event.dtend_tzid = param_value(&params, "TZID").map(str::to_string);
            }
            "ATTENDEE" => {
                let email = value.trim().trim_start_matches("mailto:");
                let part = match param_value(&params, "CN") {
                    Some(cn) => format!("{} <{}>", cn.trim_matches('"'), email),
                    None => email.to_string(),
                };
                attendee_parts.push(part);
            }
            _ => {}
        }
    }

    events
}

/// Undo RFC 5545 text escaping
fn unescape_text(value: &str) -> String {
    value
        .replace("\\n", "\n")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

/// Date component of a feed date/time value, if it has one
fn value_date(value: &str) -> Option<NaiveDate> {
    if value.len() < 8 {
        return None;
    }
    NaiveDate::parse_from_str(&value[..8], "%Y%m%d").ok()
}

/// Whether a feed event might belong to the requested date's candidate set.
///
/// Deliberately loose: raw DTSTART values are feed-local, so an event near
/// midnight can fall on a neighboring date once expressed in the reference
/// timezone. The window is widened by a day on both sides here; final date
/// membership is decided after normalization.
pub fn candidate_for_date(event: &IcsRawEvent, date: NaiveDate) -> bool {
    let Some(start) = event.dtstart.as_deref().and_then(value_date) else {
        // No start information; let the normalizer log the rejection
        return true;
    };
    let lo = date.pred_opt().unwrap_or(date);
    let hi = date.succ_opt().unwrap_or(date);
    if (lo..=hi).contains(&start) {
        return true;
    }
    // Multi-day all-day events: DTEND is exclusive
    if event.dtstart.as_deref().map(str::len) == Some(8) {
        if let Some(end) = event.dtend.as_deref().and_then(value_date) {
            return start <= hi && lo < end;
        }
    }
    false
}
