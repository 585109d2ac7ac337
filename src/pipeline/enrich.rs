use crate::error::{enrichment_error, AppResult};
use crate::models::CanonicalEvent;
use crate::store::EventStore;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

/// Project linkage and summary text produced by the classification oracle
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Classification {
    pub project_id: Option<String>,
    pub category: Option<String>,
    pub summary_text: Option<String>,
}

/// Profile returned by the attendee-enrichment oracle
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttendeeProfile {
    pub name: Option<String>,
    pub company: Option<String>,
}

/// Project/category classification oracle.
///
/// Failure or unavailability degrades gracefully: the event persists without
/// enrichment and is retried on a later run through the writer's
/// missing-summary rule.
#[async_trait]
pub trait ProjectClassifier: Send + Sync {
    async fn classify(&self, event: &CanonicalEvent) -> AppResult<Option<Classification>>;
}

/// Attendee-enrichment oracle, consulted per unique external attendee email
#[async_trait]
pub trait AttendeeDirectory: Send + Sync {
    async fn lookup(&self, email: &str) -> AppResult<Option<AttendeeProfile>>;
}

/// No-op oracle used when no endpoint is configured
pub struct Disabled;

#[async_trait]
impl ProjectClassifier for Disabled {
    async fn classify(&self, _event: &CanonicalEvent) -> AppResult<Option<Classification>> {
        Ok(None)
    }
}

#[async_trait]
impl AttendeeDirectory for Disabled {
    async fn lookup(&self, _email: &str) -> AppResult<Option<AttendeeProfile>> {
        Ok(None)
    }
}

/// HTTP-backed classification oracle with bearer-key auth
pub struct HttpProjectClassifier {
    client: Client,
    api_url: String,
    api_key: String,
}

impl HttpProjectClassifier {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl ProjectClassifier for HttpProjectClassifier {
    async fn classify(&self, event: &CanonicalEvent) -> AppResult<Option<Classification>> {
        let payload = json!({
            "title": event.title,
            "description": event.description,
            "location": event.location,
        });

        let response = self
            .client
            .post(&self.api_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| enrichment_error(&format!("Classifier request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(enrichment_error(&format!(
                "Classifier returned error: HTTP {} - {}",
                status, error_body
            )));
        }

        let classification: Classification = response
            .json()
            .await
            .map_err(|e| enrichment_error(&format!("Failed to parse classification: {}", e)))?;

        if classification.project_id.is_none()
            && classification.category.is_none()
            && classification.summary_text.is_none()
        {
            return Ok(None);
        }
        Ok(Some(classification))
    }
}

/// HTTP-backed attendee directory with per-email lookups
pub struct HttpAttendeeDirectory {
    client: Client,
    api_url: String,
}

impl HttpAttendeeDirectory {
    pub fn new(api_url: String) -> Self {
        Self {
            client: Client::new(),
            api_url,
        }
    }
}

#[async_trait]
impl AttendeeDirectory for HttpAttendeeDirectory {
    async fn lookup(&self, email: &str) -> AppResult<Option<AttendeeProfile>> {
        let url = format!("{}/{}", self.api_url.trim_end_matches('/'), email);

        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| enrichment_error(&format!("Attendee lookup failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(enrichment_error(&format!(
                "Attendee lookup returned error: HTTP {}",
                response.status()
            )));
        }

        let profile: AttendeeProfile = response
            .json()
            .await
            .map_err(|e| enrichment_error(&format!("Failed to parse attendee profile: {}", e)))?;
        Ok(Some(profile))
    }
}

/// Attach project linkage, summary text and attendee profiles to one date's
/// deduplicated event set.
///
/// Oracle failures never block persistence; attendee lookups stop once the
/// monthly call budget is exhausted and attendees pass through unenriched.
pub async fn enrich_events(
    events: &mut [CanonicalEvent],
    classifier: &dyn ProjectClassifier,
    directory: &dyn AttendeeDirectory,
    store: &dyn EventStore,
    monthly_budget: u64,
    internal_domain: &str,
) {
    for event in events.iter_mut() {
        match classifier.classify(event).await {
            Ok(Some(classification)) => {
                event.project_ref = classification.project_id.or(event.project_ref.take());
                event.category = classification.category.or(event.category.take());
                event.summary_text = classification.summary_text.or(event.summary_text.take());
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Classification failed for {:?}: {}", event.title, e);
            }
        }
    }

    let month = Utc::now().format("%Y-%m").to_string();
    let mut profiles: HashMap<String, Option<AttendeeProfile>> = HashMap::new();
    let mut budget_spent = false;

    for event in events.iter_mut() {
        for attendee in event.attendees.iter_mut() {
            if attendee.company.is_some() || is_internal(&attendee.email, internal_domain) {
                continue;
            }
            if !profiles.contains_key(&attendee.email) {
                if budget_spent {
                    continue;
                }
                // Check before incrementing so discovering exhaustion leaves
                // the stored counter at the budget value
                match store.attendee_lookups(&month).await {
                    Ok(count) if count >= monthly_budget => {
                        info!(
                            "Attendee lookup budget for {} exhausted ({} calls), passing through",
                            month, monthly_budget
                        );
                        budget_spent = true;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Failed to read attendee lookup budget: {}", e);
                        continue;
                    }
                }
                if let Err(e) = store.bump_attendee_lookups(&month).await {
                    warn!("Failed to track attendee lookup budget: {}", e);
                    continue;
                }
                let profile = match directory.lookup(&attendee.email).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        warn!("Attendee lookup failed for {}: {}", attendee.email, e);
                        None
                    }
                };
                profiles.insert(attendee.email.clone(), profile);
            }
            if let Some(Some(profile)) = profiles.get(&attendee.email) {
                if attendee.name.is_none() {
                    attendee.name = profile.name.clone();
                }
                attendee.company = profile.company.clone();
            }
        }
    }
}

fn is_internal(email: &str, internal_domain: &str) -> bool {
    if internal_domain.is_empty() {
        return false;
    }
    // An entry without an @ has no domain to compare
    match email.rsplit_once('@') {
        Some((_, domain)) => domain.eq_ignore_ascii_case(internal_domain),
        None => false,
    }
}
