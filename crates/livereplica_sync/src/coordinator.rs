//! Sequencing of the snapshot load against the change feed.
//!
//! The feed is opened before the snapshot query is issued, so every write
//! from that moment on is observed. Until the snapshot has been loaded the
//! coordinator only buffers events. Once it has, the buffer is applied in
//! arrival order and every later event is applied as it arrives.
//!
//! ```text
//!  Initializing ──complete_snapshot──▶ Draining ──drain──▶ Live
//!   (buffer)                            (apply buffer)     (apply)
//! ```
//!
//! Events that overlap the snapshot are resolved by the applier's dedup
//! rules: an insert for a document the snapshot already holds is skipped,
//! a delete for one it never saw is skipped, and a replace for one it never
//! saw is inserted.

use crate::error::{SyncError, SyncResult};
use livereplica_core::{ApplyOutcome, ChangeApplier, ChangeEvent, CoreError, Document, ReplicaStore};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Phase of the initialization protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the snapshot; events are buffered.
    Initializing,
    /// Snapshot loaded; buffered events not yet applied.
    Draining,
    /// Events are applied on arrival.
    Live,
}

impl CoordinatorState {
    fn name(&self) -> &'static str {
        match self {
            CoordinatorState::Initializing => "initializing",
            CoordinatorState::Draining => "draining",
            CoordinatorState::Live => "live",
        }
    }
}

/// What happened to an event handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Held until the snapshot is loaded.
    Buffered,
    /// Applied to the replica.
    Applied(ApplyOutcome),
}

/// Result of loading the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotLoad {
    /// Documents inserted into the replica.
    pub loaded: usize,
    /// Documents dropped because their id was already loaded.
    pub duplicates: usize,
    /// Documents beyond the limit that were dropped.
    pub truncated: usize,
}

/// Result of draining the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Events that changed the replica.
    pub applied: usize,
    /// Events skipped as known races.
    pub skipped: usize,
    /// Events rejected with a non-fatal error.
    pub rejected: usize,
    /// True if an invalidation was drained.
    pub invalidated: bool,
    /// Events behind the invalidation that were discarded.
    pub discarded: usize,
}

/// Buffers feed events until the snapshot is loaded, then applies them.
#[derive(Debug)]
pub struct InitializationCoordinator {
    state: CoordinatorState,
    buffer: VecDeque<ChangeEvent>,
    applier: ChangeApplier,
    limit: usize,
}

impl InitializationCoordinator {
    /// Creates a coordinator that loads at most `limit` snapshot documents.
    pub fn new(limit: usize) -> Self {
        Self {
            state: CoordinatorState::Initializing,
            buffer: VecDeque::new(),
            applier: ChangeApplier::new(),
            limit,
        }
    }

    /// Returns the current phase.
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Returns the number of buffered events.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Handles one feed event.
    ///
    /// Before the buffer is drained the event is appended to it. Afterwards
    /// it is applied immediately.
    pub fn on_event(
        &mut self,
        store: &mut ReplicaStore,
        event: ChangeEvent,
    ) -> SyncResult<Disposition> {
        match self.state {
            CoordinatorState::Initializing | CoordinatorState::Draining => {
                debug!(kind = %event.kind(), buffered = self.buffer.len() + 1, "buffering change");
                self.buffer.push_back(event);
                Ok(Disposition::Buffered)
            }
            CoordinatorState::Live => Ok(Disposition::Applied(self.applier.apply(store, event)?)),
        }
    }

    /// Loads the snapshot into `store` and moves to `Draining`.
    ///
    /// Documents past the limit are dropped. A document whose id was
    /// already loaded is dropped with a warning.
    pub fn complete_snapshot(
        &mut self,
        store: &mut ReplicaStore,
        documents: Vec<Document>,
    ) -> SyncResult<SnapshotLoad> {
        self.expect_state(CoordinatorState::Initializing, CoordinatorState::Draining)?;

        let mut load = SnapshotLoad {
            truncated: documents.len().saturating_sub(self.limit),
            ..SnapshotLoad::default()
        };

        for document in documents.into_iter().take(self.limit) {
            match store.insert_sorted(document) {
                Ok(_) => load.loaded += 1,
                Err(CoreError::DuplicateId { id }) => {
                    warn!(collection = store.collection(), %id, "duplicate id in snapshot dropped");
                    load.duplicates += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        if load.truncated > 0 {
            warn!(
                collection = store.collection(),
                limit = self.limit,
                dropped = load.truncated,
                "snapshot exceeded limit"
            );
        }

        self.state = CoordinatorState::Draining;
        Ok(load)
    }

    /// Applies the buffered events in arrival order and moves to `Live`.
    ///
    /// `observe` sees every outcome as it is applied. Draining stops at an
    /// invalidation; later events are discarded. A fatal error stops the
    /// drain and leaves the coordinator in `Draining`.
    pub fn drain<F>(&mut self, store: &mut ReplicaStore, mut observe: F) -> SyncResult<DrainReport>
    where
        F: FnMut(&ApplyOutcome),
    {
        self.expect_state(CoordinatorState::Draining, CoordinatorState::Live)?;

        let mut report = DrainReport::default();
        while let Some(event) = self.buffer.pop_front() {
            let outcome = match self.applier.apply(store, event) {
                Ok(outcome) => outcome,
                Err(err) if !err.is_fatal() => {
                    warn!(collection = store.collection(), error = %err, "buffered change rejected");
                    report.rejected += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            observe(&outcome);

            if outcome == ApplyOutcome::Invalidated {
                report.invalidated = true;
                report.discarded = self.buffer.len();
                self.buffer.clear();
                break;
            }

            if outcome.is_mutation() {
                report.applied += 1;
            } else {
                report.skipped += 1;
            }
        }

        debug!(
            collection = store.collection(),
            applied = report.applied,
            skipped = report.skipped,
            "buffer drained"
        );
        self.state = CoordinatorState::Live;
        Ok(report)
    }

    fn expect_state(&self, expected: CoordinatorState, next: CoordinatorState) -> SyncResult<()> {
        if self.state != expected {
            return Err(SyncError::InvalidStateTransition {
                from: self.state.name().to_string(),
                to: next.name().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livereplica_core::DocumentId;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        Document::from_value(value, "_id").unwrap()
    }

    fn bodies(store: &ReplicaStore) -> Vec<Value> {
        store.iter().map(Document::to_value).collect()
    }

    #[test]
    fn events_before_snapshot_are_buffered_then_drained() {
        let mut store = ReplicaStore::new("events", "createdAt");
        let mut coordinator = InitializationCoordinator::new(100);

        let first = coordinator
            .on_event(
                &mut store,
                ChangeEvent::insert(doc(json!({"_id": 2, "createdAt": 20}))),
            )
            .unwrap();
        coordinator
            .on_event(&mut store, ChangeEvent::delete("1"))
            .unwrap();

        assert_eq!(first, Disposition::Buffered);
        assert_eq!(coordinator.buffered(), 2);
        assert!(store.is_empty());

        let load = coordinator
            .complete_snapshot(&mut store, vec![doc(json!({"_id": 1, "createdAt": 10}))])
            .unwrap();
        assert_eq!(load.loaded, 1);
        assert_eq!(coordinator.state(), CoordinatorState::Draining);

        let mut seen = Vec::new();
        let report = coordinator
            .drain(&mut store, |outcome| seen.push(outcome.clone()))
            .unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(seen.len(), 2);
        assert_eq!(coordinator.state(), CoordinatorState::Live);
        assert_eq!(bodies(&store), vec![json!({"_id": 2, "createdAt": 20})]);
        store.check_invariants().unwrap();
    }

    #[test]
    fn snapshot_already_containing_buffered_changes() {
        // The snapshot ran after both writes, so it already reflects them.
        let mut store = ReplicaStore::new("events", "createdAt");
        let mut coordinator = InitializationCoordinator::new(100);

        coordinator
            .on_event(
                &mut store,
                ChangeEvent::insert(doc(json!({"_id": 2, "createdAt": 20}))),
            )
            .unwrap();
        coordinator
            .on_event(&mut store, ChangeEvent::delete("1"))
            .unwrap();

        coordinator
            .complete_snapshot(&mut store, vec![doc(json!({"_id": 2, "createdAt": 20}))])
            .unwrap();
        let report = coordinator.drain(&mut store, |_| {}).unwrap();

        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(bodies(&store), vec![json!({"_id": 2, "createdAt": 20})]);
    }

    #[test]
    fn live_events_apply_immediately() {
        let mut store = ReplicaStore::new("events", "createdAt");
        let mut coordinator = InitializationCoordinator::new(100);
        coordinator.complete_snapshot(&mut store, Vec::new()).unwrap();
        coordinator.drain(&mut store, |_| {}).unwrap();

        let disposition = coordinator
            .on_event(
                &mut store,
                ChangeEvent::insert(doc(json!({"_id": 5, "createdAt": 1}))),
            )
            .unwrap();

        assert_eq!(
            disposition,
            Disposition::Applied(ApplyOutcome::Inserted {
                id: DocumentId::from(5),
                position: 0
            })
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_is_capped_and_deduplicated() {
        let mut store = ReplicaStore::new("events", "createdAt");
        let mut coordinator = InitializationCoordinator::new(2);

        let load = coordinator
            .complete_snapshot(
                &mut store,
                vec![
                    doc(json!({"_id": 1, "createdAt": 30})),
                    doc(json!({"_id": 1, "createdAt": 30})),
                    doc(json!({"_id": 2, "createdAt": 20})),
                ],
            )
            .unwrap();

        assert_eq!(
            load,
            SnapshotLoad {
                loaded: 1,
                duplicates: 1,
                truncated: 1
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn invalidation_stops_drain() {
        let mut store = ReplicaStore::new("events", "createdAt");
        let mut coordinator = InitializationCoordinator::new(100);

        coordinator
            .on_event(&mut store, ChangeEvent::Invalidate)
            .unwrap();
        coordinator
            .on_event(
                &mut store,
                ChangeEvent::insert(doc(json!({"_id": 9, "createdAt": 9}))),
            )
            .unwrap();

        coordinator.complete_snapshot(&mut store, Vec::new()).unwrap();
        let report = coordinator.drain(&mut store, |_| {}).unwrap();

        assert!(report.invalidated);
        assert_eq!(report.discarded, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn fatal_error_during_drain_propagates() {
        let mut store = ReplicaStore::new("events", "createdAt");
        let mut coordinator = InitializationCoordinator::new(100);

        coordinator
            .on_event(
                &mut store,
                ChangeEvent::update(
                    "4",
                    livereplica_core::UpdateDescription::new().set("createdAt", json!(99)),
                ),
            )
            .unwrap();
        coordinator
            .complete_snapshot(&mut store, vec![doc(json!({"_id": 4, "createdAt": 1}))])
            .unwrap();

        let err = coordinator.drain(&mut store, |_| {}).unwrap_err();
        assert!(err.is_integrity_violation());
        assert_eq!(coordinator.state(), CoordinatorState::Draining);
        assert_eq!(store.get(0).unwrap().get("createdAt"), Some(&json!(1)));
    }

    #[test]
    fn out_of_order_calls_rejected() {
        let mut store = ReplicaStore::new("events", "createdAt");
        let mut coordinator = InitializationCoordinator::new(100);

        assert!(matches!(
            coordinator.drain(&mut store, |_| {}),
            Err(SyncError::InvalidStateTransition { .. })
        ));

        coordinator.complete_snapshot(&mut store, Vec::new()).unwrap();
        assert!(coordinator
            .complete_snapshot(&mut store, Vec::new())
            .is_err());
    }
}
