//! The reconciliation ledger: a durable map from stable event identifiers to
//! the remote events that mirror them.
//!
//! The ledger is loaded fully into memory at startup and written back as a
//! whole document. A non-null `remote_id` records the engine's *belief* that
//! a mirror exists remotely; the remote calendar remains the source of truth
//! and may have diverged (manual deletion, partial write).
//!
//! The persisted document carries a schema version. Older shapes are upgraded
//! in memory on load and only written back in the current shape on the next
//! `save()`:
//!
//! - version 2 (current): `{ "version": 2, "synced_events": { id: entry } }`
//! - unversioned map: entries keyed by id with `google_event_id` /
//!   `synced_date` / `event_date` field names
//! - unversioned list: a flat array of ids with no metadata at all

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// How long an entry may go without a successful reconciliation before it is
/// pruned regardless of remote state.
pub const RETENTION_DAYS: i64 = 60;

const CURRENT_VERSION: u32 = 2;

/// Ledger record for one mirrored event, keyed externally by stable id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Remote calendar's id for the mirror, or None if reconciliation never
    /// produced one (degraded entry; deletion removes it from the ledger only).
    #[serde(default)]
    pub remote_id: Option<String>,
    /// Last successful reconciliation.
    pub synced_at: DateTime<Utc>,
    /// Event start as observed at sync time, used for legacy-id matching.
    #[serde(default)]
    pub event_start: Option<NaiveDateTime>,
    /// Event title as observed at sync time, used for legacy-id matching.
    #[serde(default)]
    pub title: String,
}

#[derive(Serialize, Deserialize)]
struct LedgerDocument {
    version: u32,
    synced_events: HashMap<String, LedgerEntry>,
}

/// Durable `stable_id -> LedgerEntry` mapping with a single writer.
pub struct Ledger {
    path: PathBuf,
    entries: HashMap<String, LedgerEntry>,
}

impl Ledger {
    /// Load the ledger from disk.
    ///
    /// Fails soft: a missing, unreadable, or corrupt file yields an empty
    /// ledger. That risks re-creating remote mirrors that already exist, an
    /// accepted tradeoff favoring availability.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => match parse_document(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    eprintln!("⚠️  Ledger at {} is unreadable ({}), starting empty", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// An empty in-memory ledger that will persist to `path`.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: HashMap::new(),
        }
    }

    /// Write the ledger in the current schema.
    ///
    /// Writes to a temp path and renames, so a truncated write never replaces
    /// the previous document.
    pub fn save(&self) -> SyncResult<()> {
        let doc = LedgerDocument {
            version: CURRENT_VERSION,
            synced_events: self.entries.clone(),
        };
        let content = serde_json::to_string_pretty(&doc)
            .map_err(|e| SyncError::Ledger(format!("serialize: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, stable_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(stable_id)
    }

    pub fn contains(&self, stable_id: &str) -> bool {
        self.entries.contains_key(stable_id)
    }

    pub fn insert(&mut self, stable_id: String, entry: LedgerEntry) {
        self.entries.insert(stable_id, entry);
    }

    pub fn remove(&mut self, stable_id: &str) -> Option<LedgerEntry> {
        self.entries.remove(stable_id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry recorded under the obsolete identifier scheme whose
    /// stored title and start time match the given event.
    ///
    /// Old-style keys look like `outlook--123456789` (a signed integer hash
    /// rather than a content digest). A match means the event was mirrored
    /// before the current scheme existed and its entry should be rewritten
    /// under the new key instead of creating a duplicate remote event.
    pub fn find_legacy_match(&self, title: &str, start: &NaiveDateTime) -> Option<String> {
        self.entries
            .iter()
            .find(|(id, entry)| {
                is_legacy_id(id)
                    && entry.title.trim() == title.trim()
                    && entry.event_start.as_ref() == Some(start)
            })
            .map(|(id, _)| id.clone())
    }

    /// Drop entries whose last reconciliation is older than [`RETENTION_DAYS`].
    /// Returns the number removed. Best-effort hygiene, not a safety property.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(RETENTION_DAYS);
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.synced_at >= cutoff);
        before - self.entries.len()
    }
}

/// Whether an id was produced by the obsolete hash scheme.
fn is_legacy_id(id: &str) -> bool {
    id.strip_prefix("outlook--")
        .map(|rest| {
            let digits = rest.trim_start_matches('-');
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        })
        .unwrap_or(false)
}

/// Parse a persisted ledger document, dispatching on its schema.
fn parse_document(content: &str) -> Result<HashMap<String, LedgerEntry>, String> {
    let value: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;

    if value.get("version").and_then(Value::as_u64) == Some(CURRENT_VERSION as u64) {
        let doc: LedgerDocument =
            serde_json::from_value(value).map_err(|e| e.to_string())?;
        return Ok(doc.synced_events);
    }

    match value.get("synced_events") {
        Some(Value::Array(ids)) => Ok(upgrade_flat_list(ids)),
        Some(Value::Object(map)) => Ok(upgrade_unversioned_map(map)),
        _ => Err("missing synced_events".to_string()),
    }
}

/// Oldest shape: a bare list of ids. Synthesize `synced_at = now` so the
/// entries survive until their next real reconciliation or pruning.
fn upgrade_flat_list(ids: &[Value]) -> HashMap<String, LedgerEntry> {
    let now = Utc::now();
    ids.iter()
        .filter_map(Value::as_str)
        .map(|id| {
            (
                id.to_string(),
                LedgerEntry {
                    remote_id: None,
                    synced_at: now,
                    event_start: None,
                    title: String::new(),
                },
            )
        })
        .collect()
}

/// Unversioned map shape with `google_event_id` / `synced_date` / `event_date`
/// field names. Entries with unparseable sync dates are dropped, matching the
/// old cleanup behavior for invalid records.
fn upgrade_unversioned_map(
    map: &serde_json::Map<String, Value>,
) -> HashMap<String, LedgerEntry> {
    let mut entries = HashMap::new();

    for (id, info) in map {
        let synced_at = match info
            .get("synced_date")
            .and_then(Value::as_str)
            .and_then(parse_loose_datetime)
        {
            Some(dt) => dt,
            None => continue,
        };

        entries.insert(
            id.clone(),
            LedgerEntry {
                remote_id: info
                    .get("google_event_id")
                    .and_then(Value::as_str)
                    .map(String::from),
                synced_at,
                event_start: info
                    .get("event_date")
                    .and_then(Value::as_str)
                    .and_then(parse_loose_naive),
                title: info
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
        );
    }

    entries
}

/// Parse an ISO-8601 timestamp that may or may not carry an offset or
/// fractional seconds, treating naive values as UTC.
fn parse_loose_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_loose_naive(s).map(|naive| naive.and_utc())
}

fn parse_loose_naive(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
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

    fn entry(remote_id: Option<&str>) -> LedgerEntry {
        LedgerEntry {
            remote_id: remote_id.map(String::from),
            synced_at: Utc::now(),
            event_start: Some(start()),
            title: "Standup".to_string(),
        }
    }

    #[test]
    fn test_missing_file_yields_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(&dir.path().join("ledger.json"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_corrupt_file_yields_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{not json").unwrap();

        let ledger = Ledger::load(&path);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = Ledger::empty(&path);
        ledger.insert("outlook-abc123def4567890".to_string(), entry(Some("gcal-1")));
        ledger.save().unwrap();

        let reloaded = Ledger::load(&path);
        assert_eq!(reloaded.len(), 1);
        let got = reloaded.get("outlook-abc123def4567890").unwrap();
        assert_eq!(got.remote_id.as_deref(), Some("gcal-1"));
        assert_eq!(got.title, "Standup");
        assert_eq!(got.event_start, Some(start()));
    }

    #[test]
    fn test_flat_list_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(
            &path,
            r#"{"synced_events": ["outlook-aaaaaaaaaaaaaaaa", "outlook-bbbbbbbbbbbbbbbb"]}"#,
        )
        .unwrap();

        let ledger = Ledger::load(&path);
        assert_eq!(ledger.len(), 2);
        let got = ledger.get("outlook-aaaaaaaaaaaaaaaa").unwrap();
        assert!(got.remote_id.is_none());
        assert!(got.synced_at <= Utc::now());
    }

    #[test]
    fn test_unversioned_map_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(
            &path,
            r#"{
                "synced_events": {
                    "outlook-abc123def4567890": {
                        "synced_date": "2024-05-30T09:00:00.123456",
                        "event_date": "2024-06-01T10:00:00",
                        "title": "Standup",
                        "google_event_id": "gcal-42"
                    },
                    "outlook-badentry00000000": {
                        "synced_date": "not a date"
                    }
                }
            }"#,
        )
        .unwrap();

        let ledger = Ledger::load(&path);
        assert_eq!(ledger.len(), 1);
        let got = ledger.get("outlook-abc123def4567890").unwrap();
        assert_eq!(got.remote_id.as_deref(), Some("gcal-42"));
        assert_eq!(got.event_start, Some(start()));
        assert_eq!(got.title, "Standup");
    }

    #[test]
    fn test_legacy_match_requires_old_scheme_and_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::empty(&dir.path().join("ledger.json"));

        ledger.insert("outlook--123456789".to_string(), entry(Some("gcal-legacy")));
        ledger.insert("outlook-abc123def4567890".to_string(), entry(Some("gcal-new")));

        // Only the old-scheme key matches.
        assert_eq!(
            ledger.find_legacy_match("Standup", &start()),
            Some("outlook--123456789".to_string())
        );
        // Title mismatch finds nothing.
        assert_eq!(ledger.find_legacy_match("Retro", &start()), None);
        // Start mismatch finds nothing.
        let other = start() + Duration::hours(1);
        assert_eq!(ledger.find_legacy_match("Standup", &other), None);
    }

    #[test]
    fn test_legacy_id_detection() {
        assert!(is_legacy_id("outlook--123456789"));
        assert!(is_legacy_id("outlook---98765"));
        assert!(!is_legacy_id("outlook-abc123def4567890"));
        assert!(!is_legacy_id("outlook--12ab34"));
        assert!(!is_legacy_id("something-else"));
    }

    #[test]
    fn test_prune_drops_entries_past_retention() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::empty(&dir.path().join("ledger.json"));
        let now = Utc::now();

        let mut stale = entry(Some("gcal-old"));
        stale.synced_at = now - Duration::days(RETENTION_DAYS + 1);
        ledger.insert("outlook-stale00000000000".to_string(), stale);

        let mut fresh = entry(Some("gcal-new"));
        fresh.synced_at = now - Duration::days(RETENTION_DAYS - 1);
        ledger.insert("outlook-fresh00000000000".to_string(), fresh);

        let pruned = ledger.prune(now);
        assert_eq!(pruned, 1);
        assert!(ledger.contains("outlook-fresh00000000000"));
        assert!(!ledger.contains("outlook-stale00000000000"));
    }

    #[test]
    fn test_truncated_write_leaves_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = Ledger::empty(&path);
        ledger.insert("outlook-abc123def4567890".to_string(), entry(Some("gcal-1")));
        ledger.save().unwrap();

        // A leftover temp file from an interrupted write must not affect load.
        std::fs::write(path.with_extension("json.tmp"), "{trunc").unwrap();
        let reloaded = Ledger::load(&path);
        assert_eq!(reloaded.len(), 1);
    }
}
