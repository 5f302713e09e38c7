//! State Archive - Revertible Checkpoints
//!
//! Maps a block digest to the storage bookmark recorded when that block
//! committed. The archive keeps a bounded window of recent checkpoints;
//! once a block falls out of the window it can no longer serve as a
//! rollback target and re-execution requests against it fail with
//! `NoParentBlock`.

use crate::types::Digest;
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

type FastDashMap<K, V> = DashMap<K, V, FxBuildHasher>;

/// A committed state snapshot reachable through `StorageUnit::revert`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    /// Storage bookmark index
    pub index: u64,
    /// State hash at commit time
    pub state_hash: Digest,
    /// Height of the committed block
    pub block_number: u64,
}

/// Bounded history of committed checkpoints, keyed by block digest
pub struct StateArchive {
    entries: FastDashMap<Digest, Checkpoint>,
    order: Mutex<VecDeque<Digest>>,
    next_index: AtomicU64,
    retention: usize,
}

impl StateArchive {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: DashMap::with_hasher(FxBuildHasher),
            order: Mutex::new(VecDeque::new()),
            next_index: AtomicU64::new(0),
            retention: retention.max(1),
        }
    }

    /// Record a checkpoint for a block, assigning the next bookmark index.
    /// The oldest checkpoint is pruned once the retention window is full.
    pub fn record(&self, block: Digest, state_hash: Digest, block_number: u64) -> u64 {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let checkpoint = Checkpoint {
            index,
            state_hash,
            block_number,
        };

        let mut order = self.order.lock();
        if self.entries.insert(block, checkpoint).is_some() {
            // re-recorded after a rollback: refresh its position
            if let Some(position) = order.iter().position(|digest| digest == &block) {
                order.remove(position);
            }
        }
        order.push_back(block);

        while order.len() > self.retention {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        index
    }

    pub fn lookup(&self, block: &Digest) -> Option<Checkpoint> {
        self.entries.get(block).map(|entry| *entry.value())
    }

    pub fn contains(&self, block: &Digest) -> bool {
        self.entries.contains_key(block)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
