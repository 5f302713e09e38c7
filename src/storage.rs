//! Lane-Sharded State Storage
//!
//! The scheduler only needs a narrow surface from the state store: keyed
//! reads and writes within a lane, a state hash over the whole store, and
//! checkpoint commit/revert keyed by a bookmark index. `StorageUnit` is
//! that boundary; `InMemoryStorageUnit` is the in-process implementation
//! used for local nodes and tests.

use crate::types::{Digest, LaneIndex};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxBuildHasher;
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;

/// DashMap with FxHasher, noticeably faster than SipHash for short keys
type FastDashMap<K, V> = DashMap<K, V, FxBuildHasher>;

/// Number of committed checkpoints kept revertible by default
pub const DEFAULT_CHECKPOINT_RETENTION: usize = 64;

/// The state-store interface the execution manager depends on.
///
/// `commit` records the current state under a bookmark index; `revert`
/// restores a previously committed bookmark. Both return whether the
/// bookmark was accepted/known.
pub trait StorageUnit: Send + Sync {
    fn get(&self, lane: LaneIndex, key: &[u8]) -> Option<Vec<u8>>;
    fn set(&self, lane: LaneIndex, key: &[u8], value: Vec<u8>);
    fn hash(&self) -> Digest;
    fn commit(&self, index: u64) -> bool;
    fn revert(&self, index: u64) -> bool;
}

type StateKey = (LaneIndex, Vec<u8>);

/// In-memory lane-sharded store with bookmark snapshots.
///
/// Keeps a bounded window of committed snapshots; the oldest bookmark is
/// dropped once the window is full, after which reverting to it fails.
pub struct InMemoryStorageUnit {
    entries: FastDashMap<StateKey, Vec<u8>>,
    checkpoints: Mutex<BTreeMap<u64, Vec<(StateKey, Vec<u8>)>>>,
    retention: usize,
}

impl InMemoryStorageUnit {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_CHECKPOINT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuildHasher),
            checkpoints: Mutex::new(BTreeMap::new()),
            retention: retention.max(1),
        }
    }

    /// Number of live entries across all lanes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of revertible bookmarks currently held
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.lock().len()
    }

    fn snapshot(&self) -> Vec<(StateKey, Vec<u8>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for InMemoryStorageUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageUnit for InMemoryStorageUnit {
    fn get(&self, lane: LaneIndex, key: &[u8]) -> Option<Vec<u8>> {
        self.entries
            .get(&(lane, key.to_vec()))
            .map(|entry| entry.value().clone())
    }

    fn set(&self, lane: LaneIndex, key: &[u8], value: Vec<u8>) {
        self.entries.insert((lane, key.to_vec()), value);
    }

    fn hash(&self) -> Digest {
        let mut entries = self.snapshot();
        if entries.is_empty() {
            return Digest::ZERO;
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        // hash entries in parallel, then chain the sorted leaves
        let leaves: Vec<[u8; 32]> = entries
            .par_iter()
            .map(|((lane, key), value)| {
                let mut hasher = Sha256::new();
                hasher.update(lane.to_le_bytes());
                hasher.update((key.len() as u32).to_le_bytes());
                hasher.update(key);
                hasher.update(value);
                hasher.finalize().into()
            })
            .collect();

        let mut hasher = Sha256::new();
        for leaf in &leaves {
            hasher.update(leaf);
        }
        Digest(hasher.finalize().into())
    }

    fn commit(&self, index: u64) -> bool {
        let snapshot = self.snapshot();
        let mut checkpoints = self.checkpoints.lock();
        checkpoints.insert(index, snapshot);
        while checkpoints.len() > self.retention {
            checkpoints.pop_first();
        }
        true
    }

    fn revert(&self, index: u64) -> bool {
        let snapshot = {
            let checkpoints = self.checkpoints.lock();
            match checkpoints.get(&index) {
                Some(snapshot) => snapshot.clone(),
                None => return false,
            }
        };

        self.entries.clear();
        for (key, value) in snapshot {
            self.entries.insert(key, value);
        }
        true
    }
}
