//! Invitation events observed in the Outlook calendar.
//!
//! Events are value objects: the extractor produces them, the sync engine
//! consumes them, and nothing mutates them in between. Identity across
//! extraction cycles comes from [`compute_stable_id`], not from anything
//! Outlook provides.

use chrono::NaiveDateTime;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// A meeting invitation extracted from Outlook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Deterministic identifier derived from title, start time, and organizer.
    pub stable_id: String,
    pub title: String,
    /// Wall-clock time as Outlook reported it. The target timezone is applied
    /// only when the event is written to the remote calendar.
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub location: String,
    pub organizer: String,
    /// Name of the Outlook calendar the event came from.
    pub source_calendar: String,
    pub content: String,
    pub importance: String,
}

impl Event {
    /// Build an event, deriving its stable identifier from the identity fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        title: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
        location: String,
        organizer: String,
        source_calendar: String,
        content: String,
        importance: String,
    ) -> Self {
        let stable_id = compute_stable_id(&title, &start, &organizer);
        Self {
            stable_id,
            title,
            start,
            end,
            location,
            organizer,
            source_calendar,
            content,
            importance,
        }
    }
}

/// Derive the stable identifier for an event.
///
/// The scheme hashes `{title}-{start iso8601}-{organizer}` and keeps the first
/// 16 hex chars, prefixed with `outlook-`. Changing any of the three inputs
/// yields a different id; that fragility is a property of the scheme, which is
/// why it lives behind this one function. Existing ledgers were written with
/// exactly this derivation, so changing it requires a ledger migration.
pub fn compute_stable_id(title: &str, start: &NaiveDateTime, organizer: &str) -> String {
    let input = format!("{}-{}-{}", title, start.format("%Y-%m-%dT%H:%M:%S"), organizer);
    let digest = Md5::digest(input.as_bytes());
    format!("outlook-{}", &hex::encode(digest)[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_stable_id_is_deterministic() {
        let a = compute_stable_id("Sync Review", &start(), "alice");
        let b = compute_stable_id("Sync Review", &start(), "alice");
        assert_eq!(a, b);
    }

    #[test]
    fn test_stable_id_shape() {
        let id = compute_stable_id("Sync Review", &start(), "alice");
        assert!(id.starts_with("outlook-"));
        assert_eq!(id.len(), "outlook-".len() + 16);
        assert!(id["outlook-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_stable_id_changes_with_identity_fields() {
        let base = compute_stable_id("Sync Review", &start(), "alice");

        assert_ne!(base, compute_stable_id("Sync review", &start(), "alice"));
        assert_ne!(base, compute_stable_id("Sync Review", &start(), "bob"));

        let later = start() + chrono::Duration::minutes(30);
        assert_ne!(base, compute_stable_id("Sync Review", &later, "alice"));
    }

    #[test]
    fn test_event_new_derives_stable_id() {
        let event = Event::new(
            "Sync Review".to_string(),
            start(),
            start() + chrono::Duration::hours(1),
            String::new(),
            "alice".to_string(),
            "Calendar".to_string(),
            String::new(),
            String::new(),
        );
        assert_eq!(
            event.stable_id,
            compute_stable_id("Sync Review", &start(), "alice")
        );
    }
}
