//! The synchronization state machine.
//!
//! One call to [`SyncEngine::run_cycle`] takes a snapshot of invitation
//! events and brings the remote calendar and the ledger into agreement with
//! it: new events are mirrored, events already mirrored (by this ledger, by
//! an obsolete ledger key, or by a previous process) are reconciled without
//! duplicates, and events that vanished from the snapshot have their mirrors
//! deleted. Per-event failures are recorded and retried on the next cycle;
//! nothing escapes the cycle as an error.

use std::collections::HashSet;

use chrono::Utc;

use crate::event::Event;
use crate::ledger::{Ledger, LedgerEntry};
use crate::remote::RemoteCalendar;

/// Outcome of one sync cycle, surfaced to the driver for reporting.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub already_synced: usize,
    pub migrated: usize,
    pub reconciled_existing: usize,
    pub created: usize,
    pub create_failed: usize,
    pub deleted: usize,
    pub delete_failed: usize,
    pub pruned: usize,
    /// Titles of events whose creation failed this cycle.
    pub failed_creates: Vec<String>,
    /// Stable ids whose remote deletion failed this cycle.
    pub failed_deletes: Vec<String>,
    /// Human-readable error messages accumulated during the cycle.
    pub errors: Vec<String>,
}

impl CycleReport {
    pub fn changed(&self) -> bool {
        self.migrated + self.reconciled_existing + self.created + self.deleted + self.pruned > 0
    }
}

/// Drives one-way sync from snapshots into a remote calendar.
///
/// Owns the ledger for its lifetime; the single-writer assumption of the
/// ledger file is enforced by construction (one engine, one process).
pub struct SyncEngine<R: RemoteCalendar> {
    ledger: Ledger,
    remote: R,
}

impl<R: RemoteCalendar> SyncEngine<R> {
    pub fn new(ledger: Ledger, remote: R) -> Self {
        Self { ledger, remote }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one sync cycle over a snapshot.
    ///
    /// Idempotent: running it again with an identical snapshot and unchanged
    /// remote state performs no creations or deletions. The ledger is
    /// persisted at most twice (after creations, after deletions) and only
    /// when something changed.
    pub async fn run_cycle(&mut self, snapshot: &[Event]) -> CycleReport {
        let mut report = CycleReport::default();
        let now = Utc::now();

        // -- Classification + creation ------------------------------------

        let mut seen: HashSet<&str> = HashSet::new();
        let mut to_create: Vec<&Event> = Vec::new();
        let mut mutated = false;

        for event in snapshot {
            // Duplicate stable ids within one snapshot collapse to the first
            // observation (hash collision or duplicate extraction).
            if !seen.insert(event.stable_id.as_str()) {
                continue;
            }

            if self.ledger.contains(&event.stable_id) {
                report.already_synced += 1;
                continue;
            }

            // An entry under the obsolete id scheme with matching title and
            // start means this event is already mirrored: rewrite the entry
            // under the new key, keeping its remote id. No remote call.
            if let Some(legacy_id) = self.ledger.find_legacy_match(&event.title, &event.start) {
                let remote_id = self
                    .ledger
                    .remove(&legacy_id)
                    .and_then(|old| old.remote_id);
                self.ledger
                    .insert(event.stable_id.clone(), entry_for(event, remote_id, now));
                report.migrated += 1;
                mutated = true;
                continue;
            }

            // The remote may already hold a mirror this ledger never saw
            // (fresh ledger, prior process). Lookup failures are treated as
            // "not found" so a flaky remote degrades to a duplicate-create
            // risk instead of stalling the event.
            match self
                .remote
                .find_by_title_and_day(&event.title, &event.start)
                .await
            {
                Ok(Some(remote_id)) => {
                    self.ledger
                        .insert(event.stable_id.clone(), entry_for(event, Some(remote_id), now));
                    report.reconciled_existing += 1;
                    mutated = true;
                }
                Ok(None) => to_create.push(event),
                Err(e) => {
                    report
                        .errors
                        .push(format!("Existence check failed for '{}': {}", event.title, e));
                    to_create.push(event);
                }
            }
        }

        for event in to_create {
            match self.remote.create(event).await {
                Ok(remote_id) => {
                    self.ledger
                        .insert(event.stable_id.clone(), entry_for(event, Some(remote_id), now));
                    report.created += 1;
                    mutated = true;
                }
                Err(e) => {
                    // No ledger entry, so the event is classified CREATE_NEW
                    // again next cycle.
                    report.create_failed += 1;
                    report.failed_creates.push(event.title.clone());
                    report
                        .errors
                        .push(format!("Failed to create '{}': {}", event.title, e));
                }
            }
        }

        if mutated {
            self.persist(&mut report);
        }

        // -- Deletion detection -------------------------------------------

        let snapshot_ids: HashSet<&str> = snapshot.iter().map(|e| e.stable_id.as_str()).collect();
        let deleted_ids: Vec<String> = self
            .ledger
            .keys()
            .filter(|id| !snapshot_ids.contains(id.as_str()))
            .cloned()
            .collect();

        let mut mutated = false;

        for stable_id in deleted_ids {
            let remote_id = self.ledger.get(&stable_id).and_then(|e| e.remote_id.clone());

            match remote_id {
                Some(remote_id) => match self.remote.delete(&remote_id).await {
                    Ok(()) => {
                        self.ledger.remove(&stable_id);
                        report.deleted += 1;
                        mutated = true;
                    }
                    Err(e) => {
                        // Entry stays so deletion is retried next cycle.
                        report.delete_failed += 1;
                        report.failed_deletes.push(stable_id.clone());
                        report
                            .errors
                            .push(format!("Failed to delete '{}': {}", stable_id, e));
                    }
                },
                None => {
                    // Degraded entry with no known mirror; dropping it from
                    // the ledger is all the deletion there is.
                    self.ledger.remove(&stable_id);
                    report.deleted += 1;
                    mutated = true;
                }
            }
        }

        // -- Pruning ------------------------------------------------------

        report.pruned = self.ledger.prune(now);
        if report.pruned > 0 {
            mutated = true;
        }

        if mutated {
            self.persist(&mut report);
        }

        report
    }

    fn persist(&self, report: &mut CycleReport) {
        if let Err(e) = self.ledger.save() {
            report.errors.push(format!("Failed to save ledger: {}", e));
        }
    }
}

fn entry_for(event: &Event, remote_id: Option<String>, now: chrono::DateTime<Utc>) -> LedgerEntry {
    LedgerEntry {
        remote_id,
        synced_at: now,
        event_start: Some(event.start),
        title: event.title.clone(),
    }
}
