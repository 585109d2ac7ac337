use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};

/// Parse time string in HH:MM format
pub fn parse_time(time_str: &str) -> Option<(u32, u32)> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 2 {
        return None;
    }
    let hour = parts[0].parse::<u32>().ok()?;
    let minute = parts[1].parse::<u32>().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// Earliest upcoming wall-clock run time among the configured HH:MM times.
///
/// Times already passed today roll over to tomorrow; invalid entries are
/// ignored. Returns `None` only when no entry parses.
/// UTC instants bounding one calendar day in the given timezone.
///
/// The start is the day's local midnight, the end is the next day's local
/// midnight, both converted to UTC.
pub fn day_window<Z: TimeZone>(date: NaiveDate, tz: &Z) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(date, tz);
    let end = local_midnight(date.succ_opt().unwrap_or(date), tz);
    (start, end)
}

fn local_midnight<Z: TimeZone>(date: NaiveDate, tz: &Z) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Midnight skipped by a DST transition; the UTC reading is close enough
        // for a fetch window bound
        LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

pub fn next_run_time<Z: TimeZone>(now: DateTime<Z>, run_times: &[String]) -> Option<DateTime<Z>> {
    let mut next: Option<DateTime<Z>> = None;

    for time_str in run_times {
        let Some((hour, minute)) = parse_time(time_str) else {
            continue;
        };
        let Some(today_at) = now
            .date_naive()
            .and_hms_opt(hour, minute, 0)
            .and_then(|naive| now.timezone().from_local_datetime(&naive).earliest())
        else {
            continue;
        };

        let candidate = if today_at <= now {
            today_at + Duration::days(1)
        } else {
            today_at
        };

        match &next {
            Some(best) if candidate >= *best => {}
            _ => next = Some(candidate),
        }
    }

    next
}
