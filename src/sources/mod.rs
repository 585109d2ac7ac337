pub mod google;
pub mod ics_feed;

pub use google::{GoogleCalendarSource, GoogleRawEvent};
pub use ics_feed::{IcsFeedSource, IcsRawEvent};

use crate::error::AppResult;
use crate::models::SourceSystem;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Raw event as one of the upstream systems shapes it.
///
/// Ephemeral; never persisted past a pipeline run. Only the normalizer is
/// allowed to branch on the variant — everything downstream works on
/// [`crate::models::CanonicalEvent`].
#[derive(Debug, Clone)]
pub enum RawSourceEvent {
    Google(GoogleRawEvent),
    IcsFeed(IcsRawEvent),
}

impl RawSourceEvent {
    pub fn source_system(&self) -> SourceSystem {
        match self {
            RawSourceEvent::Google(_) => SourceSystem::GoogleCalendar,
            RawSourceEvent::IcsFeed(_) => SourceSystem::IcsFeed,
        }
    }
}

/// One upstream calendar source.
///
/// A source failure is isolated by the pipeline: it is logged and treated as
/// zero events from that source, never as a pipeline-fatal error.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Which system this source pulls from
    fn system(&self) -> SourceSystem;

    /// Fetch the source-shaped events for one date
    async fn fetch_events(&self, date: NaiveDate) -> AppResult<Vec<RawSourceEvent>>;
}
