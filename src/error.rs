//! Error types for invitesync.

use thiserror::Error;

/// Errors that can occur while extracting, reconciling, or mirroring events.
///
/// Nothing here is fatal to the process: extraction failures skip the cycle,
/// remote failures are recorded per event and retried next cycle, and a
/// corrupt ledger degrades to an empty one.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Event extraction failed: {0}")]
    Extraction(String),

    #[error("Remote calendar error: {0}")]
    Remote(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for invitesync operations.
pub type SyncResult<T> = Result<T, SyncError>;
