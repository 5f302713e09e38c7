//! Execution Plan - Block Decomposition
//!
//! Turns a block into an ordered sequence of slices, each an array of
//! execution items that may run concurrently. Slice boundaries are the
//! only ordering constraint inside a block, so the planner's job is
//! validation plus lane derivation: it checks the declared lane masks
//! against the block's lane count and rejects a slice whose transactions
//! claim overlapping lanes rather than trusting upstream block builders.

use crate::error::PlanError;
use crate::item::ExecutionItem;
use crate::types::{Block, Digest, Slice, MAX_LOG2_NUM_LANES};
use rayon::prelude::*;
use std::sync::Arc;

/// The per-block schedule: slices in execution order, each holding the
/// items eligible to run in parallel. Built once per `execute` call and
/// discarded when the block finishes.
#[derive(Debug)]
pub struct ExecutionPlan {
    slices: Vec<Vec<Arc<ExecutionItem>>>,
    item_count: usize,
}

impl ExecutionPlan {
    /// Decompose a block into an execution plan
    pub fn build(block: &Block) -> Result<ExecutionPlan, PlanError> {
        if block.digest.is_zero() {
            return Err(PlanError::MissingDigest);
        }
        if block.log2_num_lanes > MAX_LOG2_NUM_LANES {
            return Err(PlanError::TooManyLanes(block.log2_num_lanes));
        }

        let slices: Vec<Vec<Arc<ExecutionItem>>> = block
            .slices
            .par_iter()
            .enumerate()
            .map(|(slice_index, slice)| plan_slice(block, slice_index, slice))
            .collect::<Result<_, _>>()?;

        let item_count = slices.iter().map(Vec::len).sum();

        Ok(ExecutionPlan { slices, item_count })
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    pub fn slice(&self, index: usize) -> Option<&[Arc<ExecutionItem>]> {
        self.slices.get(index).map(Vec::as_slice)
    }

    /// Iterate every item in slice order
    pub fn items(&self) -> impl Iterator<Item = &Arc<ExecutionItem>> {
        self.slices.iter().flatten()
    }
}

fn plan_slice(
    block: &Block,
    slice_index: usize,
    slice: &Slice,
) -> Result<Vec<Arc<ExecutionItem>>, PlanError> {
    let num_lanes = block.num_lanes();
    let allowed_mask = u64::MAX >> (64 - num_lanes as u32);

    let mut items = Vec::with_capacity(slice.len());
    let mut claimed: u64 = 0;
    let mut owners: Vec<(u64, Digest)> = Vec::with_capacity(slice.len());

    for (index, tx) in slice.transactions.iter().enumerate() {
        if tx.digest.is_zero() {
            return Err(PlanError::MissingTransactionDigest {
                slice: slice_index,
                index,
            });
        }
        if tx.lane_mask == 0 {
            return Err(PlanError::EmptyLaneMask { digest: tx.digest });
        }

        let invalid = tx.lane_mask & !allowed_mask;
        if invalid != 0 {
            return Err(PlanError::LaneOutOfRange {
                digest: tx.digest,
                lane: invalid.trailing_zeros(),
                num_lanes,
            });
        }

        if claimed & tx.lane_mask != 0 {
            let first = owners
                .iter()
                .find(|(mask, _)| mask & tx.lane_mask != 0)
                .map(|(_, digest)| *digest)
                .unwrap_or(tx.digest);
            return Err(PlanError::OverlappingLanes {
                slice: slice_index,
                first,
                second: tx.digest,
            });
        }
        claimed |= tx.lane_mask;
        owners.push((tx.lane_mask, tx.digest));

        let mut item = ExecutionItem::new(tx.digest, block.block_number, slice_index);
        for lane in tx.lanes() {
            item.add_lane(lane);
        }
        items.push(Arc::new(item));
    }

    Ok(items)
}
