use crate::models::CanonicalEvent;
use std::collections::HashMap;
use tracing::debug;

/// Identity key for one candidate event.
///
/// The stable source-provided occurrence identifier wins when present; the
/// fallback is the lowercase title plus the start instant reduced to its epoch
/// timestamp, so equivalent instants written with different UTC-offset
/// notations compare equal.
fn identity_key(event: &CanonicalEvent) -> String {
    if !event.source_id.is_empty() {
        format!("uid:{}", event.source_id)
    } else {
        format!("fb:{}:{}", event.title.to_lowercase(), event.start.timestamp())
    }
}

/// Collapse events representing the same real-world occurrence within one
/// date's candidate set.
///
/// When two sources claim the same identity the source with richer attendee
/// metadata wins deterministically; outside that rule, first-seen wins. The
/// winner keeps all of its attributes; the loser's unique fields are
/// discarded.
pub fn dedup_events(events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let mut kept: Vec<CanonicalEvent> = Vec::with_capacity(events.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for event in events {
        let key = identity_key(&event);
        match seen.get(&key) {
            None => {
                seen.insert(key, kept.len());
                kept.push(event);
            }
            Some(&slot) => {
                let incumbent = &kept[slot];
                if event.source_system.preference_rank()
                    < incumbent.source_system.preference_rank()
                {
                    debug!(
                        title = %event.title,
                        winner = %event.source_system,
                        loser = %incumbent.source_system,
                        "duplicate resolved by source preference"
                    );
                    kept[slot] = event;
                } else {
                    debug!(
                        title = %incumbent.title,
                        dropped = %event.source_system,
                        "duplicate dropped, first-seen wins"
                    );
                }
            }
        }
    }

    kept
}
