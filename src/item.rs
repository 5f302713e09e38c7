//! Execution Item - One Scheduled Transaction
//!
//! An item carries a transaction's digest and target lanes into the worker
//! pool and collects the outcome. The status and fee are written exactly
//! once by whichever worker runs the item, then read by the scheduler when
//! the block drains; atomics make that handoff safe without a lock.

use crate::executor::{Executor, Status};
use crate::types::{Digest, LaneIndex};
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tracing::warn;

/// One transaction scheduled for execution, with its mutable outcome
#[derive(Debug)]
pub struct ExecutionItem {
    digest: Digest,
    block_number: u64,
    slice_index: usize,
    lanes: SmallVec<[LaneIndex; 8]>,
    status: AtomicU8,
    fee: AtomicU64,
}

impl ExecutionItem {
    pub fn new(digest: Digest, block_number: u64, slice_index: usize) -> Self {
        Self {
            digest,
            block_number,
            slice_index,
            lanes: SmallVec::new(),
            status: AtomicU8::new(Status::NotRun as u8),
            fee: AtomicU64::new(0),
        }
    }

    /// Union a lane into the target set. Only possible before the item is
    /// shared with the workers (requires exclusive access).
    pub fn add_lane(&mut self, lane: LaneIndex) {
        if let Err(position) = self.lanes.binary_search(&lane) {
            self.lanes.insert(position, lane);
        }
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn slice_index(&self) -> usize {
        self.slice_index
    }

    pub fn lanes(&self) -> &[LaneIndex] {
        &self.lanes
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn fee(&self) -> u64 {
        self.fee.load(Ordering::SeqCst)
    }

    /// Run this item on the given executor.
    ///
    /// A fault or panic from the executor is recorded as
    /// `Status::ResourceFailure` and never propagates; a broken executor
    /// must not take the scheduler down with it.
    pub fn execute<E: Executor>(&self, executor: &mut E) -> Status {
        let call = catch_unwind(AssertUnwindSafe(|| {
            executor.execute(
                &self.digest,
                self.block_number,
                self.slice_index as u64,
                &self.lanes,
            )
        }));

        let status = match call {
            Ok(Ok(outcome)) => {
                self.fee.fetch_add(outcome.fee, Ordering::SeqCst);
                outcome.status
            }
            Ok(Err(fault)) => {
                warn!(digest = %self.digest, %fault, "executor fault while running transaction");
                Status::ResourceFailure
            }
            Err(_) => {
                warn!(digest = %self.digest, "executor panicked while running transaction");
                Status::ResourceFailure
            }
        };

        self.status.store(status as u8, Ordering::SeqCst);
        status
    }
}
