use crate::models::{Attendee, CanonicalEvent, ResponseState, SourceSystem};
use crate::sources::google::{GoogleEventTime, GoogleRawAttendee, GoogleRawEvent};
use crate::sources::ics_feed::IcsRawEvent;
use crate::sources::RawSourceEvent;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use tracing::debug;

/// Titles that mean "the user never named this event"
const NO_TITLE_SENTINELS: &[&str] = &["no title", "(no title)", "untitled"];

/// Why a raw event was refused at the normalization boundary.
///
/// Rejected events are logged and dropped — never retried, never silently
/// defaulted. Garbage never enters storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    EmptyTitle,
    SentinelTitle(String),
    MissingStart,
    BadTimestamp(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::EmptyTitle => write!(f, "empty or blank title"),
            RejectReason::SentinelTitle(t) => write!(f, "sentinel title {:?}", t),
            RejectReason::MissingStart => write!(f, "no start information"),
            RejectReason::BadTimestamp(v) => write!(f, "unparseable timestamp {:?}", v),
        }
    }
}

/// Convert one raw source event into the canonical shape.
///
/// Any non-rejected output has a non-empty title and a resolvable
/// (start, end) pair; all-day events come out as UTC-midnight instants plus
/// the `all_day` flag regardless of how the source encoded them.
pub fn normalize(raw: RawSourceEvent, default_tz: &Tz) -> Result<CanonicalEvent, RejectReason> {
    match raw {
        RawSourceEvent::Google(event) => normalize_google(event, default_tz),
        RawSourceEvent::IcsFeed(event) => normalize_ics(event, default_tz),
    }
}

fn accept_title(summary: Option<&str>) -> Result<String, RejectReason> {
    let title = summary.unwrap_or("").trim();
    if title.is_empty() {
        return Err(RejectReason::EmptyTitle);
    }
    if NO_TITLE_SENTINELS.contains(&title.to_lowercase().as_str()) {
        return Err(RejectReason::SentinelTitle(title.to_string()));
    }
    Ok(title.to_string())
}

fn normalize_google(event: GoogleRawEvent, default_tz: &Tz) -> Result<CanonicalEvent, RejectReason> {
    let title = accept_title(event.summary.as_deref())?;

    let start_spec = event.start.as_ref().ok_or(RejectReason::MissingStart)?;
    let (start, all_day) = google_instant(start_spec)?;

    let end = match event.end.as_ref() {
        Some(spec) => match google_instant(spec) {
            Ok((end, _)) => end,
            Err(reason) => {
                debug!(title = %title, "unusable end value, using default: {}", reason);
                default_end(start, all_day)
            }
        },
        None => default_end(start, all_day),
    };

    let timezone = start_spec
        .time_zone
        .clone()
        .unwrap_or_else(|| default_tz.name().to_string());

    // iCal UID is shared across systems ingesting the same invite, so it is
    // the stronger occurrence identity when Google provides it
    let source_id = match event.i_cal_uid {
        Some(uid) if !uid.is_empty() => uid,
        _ => event.id,
    };

    Ok(CanonicalEvent {
        id: uuid::Uuid::new_v4().to_string(),
        source_id,
        source_system: SourceSystem::GoogleCalendar,
        title,
        start,
        end,
        all_day,
        timezone,
        location: event.location,
        description: event.description,
        attendees: event.attendees.into_iter().map(google_attendee).collect(),
        project_ref: None,
        category: None,
        summary_text: None,
        last_written_at: Utc::now(),
    })
}

/// Resolve a Google start/end spec to a UTC instant plus the all-day flag
fn google_instant(spec: &GoogleEventTime) -> Result<(DateTime<Utc>, bool), RejectReason> {
    if let Some(date_time) = spec.date_time.as_deref() {
        let instant = DateTime::parse_from_rfc3339(date_time)
            .map_err(|_| RejectReason::BadTimestamp(date_time.to_string()))?;
        return Ok((instant.with_timezone(&Utc), false));
    }
    if let Some(date) = spec.date.as_deref() {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| RejectReason::BadTimestamp(date.to_string()))?;
        return Ok((utc_midnight(day), true));
    }
    Err(RejectReason::MissingStart)
}

fn google_attendee(raw: GoogleRawAttendee) -> Attendee {
    let response = match raw.response_status.as_deref() {
        Some("accepted") => ResponseState::Accepted,
        Some("declined") => ResponseState::Declined,
        Some("tentative") => ResponseState::Tentative,
        _ => ResponseState::NeedsAction,
    };
    Attendee {
        email: raw.email,
        name: raw.display_name,
        response,
        company: None,
    }
}

fn normalize_ics(event: IcsRawEvent, default_tz: &Tz) -> Result<CanonicalEvent, RejectReason> {
    let title = accept_title(event.summary.as_deref())?;

    let start_value = event.dtstart.as_deref().ok_or(RejectReason::MissingStart)?;
    let (start, all_day) = ics_instant(start_value, event.dtstart_tzid.as_deref(), default_tz)?;

    let end = match event.dtend.as_deref() {
        Some(value) => match ics_instant(value, event.dtend_tzid.as_deref(), default_tz) {
            Ok((end, _)) => end,
            Err(reason) => {
                debug!(title = %title, "unusable end value, using default: {}", reason);
                default_end(start, all_day)
            }
        },
        None => default_end(start, all_day),
    };

    let timezone = event
        .dtstart_tzid
        .clone()
        .unwrap_or_else(|| {
            if start_value.ends_with('Z') {
                "UTC".to_string()
            } else {
                default_tz.name().to_string()
            }
        });

    Ok(CanonicalEvent {
        id: uuid::Uuid::new_v4().to_string(),
        source_id: event.uid,
        source_system: SourceSystem::IcsFeed,
        title,
        start,
        end,
        all_day,
        timezone,
        location: event.location,
        description: event.description,
        attendees: parse_attendee_string(event.attendees.as_deref()),
        project_ref: None,
        category: None,
        summary_text: None,
        last_written_at: Utc::now(),
    })
}

/// Resolve a feed date/time value to a UTC instant plus the all-day flag
fn ics_instant(
    value: &str,
    tzid: Option<&str>,
    default_tz: &Tz,
) -> Result<(DateTime<Utc>, bool), RejectReason> {
    // Bare date means an all-day event
    if value.len() == 8 {
        let day = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|_| RejectReason::BadTimestamp(value.to_string()))?;
        return Ok((utc_midnight(day), true));
    }

    if let Some(stamp) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S")
            .map_err(|_| RejectReason::BadTimestamp(value.to_string()))?;
        return Ok((Utc.from_utc_datetime(&naive), false));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|_| RejectReason::BadTimestamp(value.to_string()))?;
    let tz = tzid
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(*default_tz);
    let instant = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => return Err(RejectReason::BadTimestamp(value.to_string())),
    };
    Ok((instant.with_timezone(&Utc), false))
}

/// Parse the feed's delimiter-separated attendee string
/// (`Name <email>; Name <email>` or bare emails)
fn parse_attendee_string(raw: Option<&str>) -> Vec<Attendee> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(';')
        .flat_map(|chunk| chunk.split(','))
        .filter_map(|chunk| {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                return None;
            }
            if let (Some(open), Some(close)) = (chunk.find('<'), chunk.rfind('>')) {
                if open < close {
                    let name = chunk[..open].trim();
                    let email = chunk[open + 1..close].trim();
                    if email.is_empty() {
                        return None;
                    }
                    let mut attendee = Attendee::new(email);
                    if !name.is_empty() {
                        attendee.name = Some(name.to_string());
                    }
                    return Some(attendee);
                }
            }
            Some(Attendee::new(chunk))
        })
        .collect()
}

fn utc_midnight(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn default_end(start: DateTime<Utc>, all_day: bool) -> DateTime<Utc> {
    if all_day {
        start + Duration::days(1)
    } else {
        start + Duration::hours(1)
    }
}
