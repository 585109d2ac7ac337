use crate::error::{env_error, AppResult};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;

/// Default wall-clock run times (HH:MM, reference timezone)
pub const DEFAULT_RUN_TIMES: &str = "06:30,12:30,18:30";

/// Default monthly call budget for the attendee-enrichment oracle
pub const DEFAULT_ATTENDEE_BUDGET: u64 = 500;

/// Main configuration structure for the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,
    /// Reference timezone for day boundaries and scheduling
    pub timezone: String,
    /// Wall-clock times (HH:MM) at which a reconciliation pass runs
    pub run_times: Vec<String>,
    /// Google Calendar ID to pull events from
    pub google_calendar_id: String,
    /// Google Calendar API key
    pub google_api_key: String,
    /// URL of the subscribed ICS feed
    pub ics_feed_url: String,
    /// Project-classification oracle endpoint (empty disables enrichment)
    pub classifier_api_url: String,
    /// Bearer key for the classification oracle
    pub classifier_api_key: String,
    /// Attendee-enrichment oracle endpoint (empty disables lookups)
    pub attendee_api_url: String,
    /// Monthly call budget for attendee lookups
    pub attendee_monthly_budget: u64,
    /// Email domain treated as internal; never looked up
    pub internal_domain: String,
    /// Map of source names to their enabled status
    pub sources: HashMap<String, bool>,
}

impl Config {
    /// Load configuration from environment and config file
    pub fn load() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| String::from("redis://127.0.0.1:6379"));
        let timezone = env::var("TIMEZONE").unwrap_or_else(|_| String::from("UTC"));

        let run_times = env::var("RUN_TIMES")
            .unwrap_or_else(|_| String::from(DEFAULT_RUN_TIMES))
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        // Required upstream source settings
        let google_calendar_id =
            env::var("GOOGLE_CALENDAR_ID").map_err(|_| env_error("GOOGLE_CALENDAR_ID"))?;
        let google_api_key =
            env::var("GOOGLE_API_KEY").map_err(|_| env_error("GOOGLE_API_KEY"))?;
        let ics_feed_url = env::var("ICS_FEED_URL").map_err(|_| env_error("ICS_FEED_URL"))?;

        // Enrichment oracles are optional; empty values disable them
        let classifier_api_url = env::var("CLASSIFIER_API_URL").unwrap_or_default();
        let classifier_api_key = env::var("CLASSIFIER_API_KEY").unwrap_or_default();
        let attendee_api_url = env::var("ATTENDEE_API_URL").unwrap_or_default();

        let attendee_monthly_budget = env::var("ATTENDEE_MONTHLY_BUDGET")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_ATTENDEE_BUDGET);

        let internal_domain = env::var("INTERNAL_DOMAIN").unwrap_or_default();

        // Both sources enabled unless the overlay says otherwise
        let mut sources = HashMap::new();
        sources.insert("google_calendar".to_string(), true);
        sources.insert("ics_feed".to_string(), true);

        // Load source configuration from file if it exists
        if let Ok(content) = fs::read_to_string("config/sources.toml") {
            if let Ok(file_sources) = toml::from_str::<HashMap<String, bool>>(&content) {
                // Merge with defaults
                for (key, value) in file_sources {
                    sources.insert(key, value);
                }
            }
        }

        Ok(Config {
            redis_url,
            timezone,
            run_times,
            google_calendar_id,
            google_api_key,
            ics_feed_url,
            classifier_api_url,
            classifier_api_key,
            attendee_api_url,
            attendee_monthly_budget,
            internal_domain,
            sources,
        })
    }

    /// Check if a source is enabled
    pub fn is_source_enabled(&self, name: &str) -> bool {
        *self.sources.get(name).unwrap_or(&false)
    }
}
