//! The remote calendar seam.
//!
//! The sync engine talks to the cloud calendar exclusively through this
//! trait, so the engine can be exercised against a mock and the Google
//! client stays replaceable.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::SyncResult;
use crate::event::Event;

/// Cosmetic prefix added to the titles of mirrored events so they are
/// recognizable in the remote calendar, and stripped again when matching
/// remote events back to their source titles.
pub const MIRROR_TITLE_PREFIX: &str = "📧 ";

/// Remove the mirror prefix from a remote title, if present.
pub fn strip_mirror_prefix(title: &str) -> &str {
    title.strip_prefix(MIRROR_TITLE_PREFIX).unwrap_or(title)
}

/// A cloud calendar that events can be mirrored into.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// Create a mirror for the event and return the remote-assigned id.
    async fn create(&self, event: &Event) -> SyncResult<String>;

    /// Look for an existing remote event with the same title on the same
    /// calendar day (in the configured target timezone). Used to recognize
    /// mirrors created by a previous process before the ledger knew them.
    async fn find_by_title_and_day(
        &self,
        title: &str,
        start: &NaiveDateTime,
    ) -> SyncResult<Option<String>>;

    /// Delete a remote event. An already-absent event counts as success.
    async fn delete(&self, remote_id: &str) -> SyncResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_mirror_prefix() {
        assert_eq!(strip_mirror_prefix("📧 Sync Review"), "Sync Review");
        assert_eq!(strip_mirror_prefix("Sync Review"), "Sync Review");
        // Only a leading prefix is stripped.
        assert_eq!(strip_mirror_prefix("Re: 📧 Sync Review"), "Re: 📧 Sync Review");
    }
}
