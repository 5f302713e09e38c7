use super::{Address, Digest};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Index of a state lane (shard of the global keyspace)
pub type LaneIndex = u32;

/// Largest supported lane exponent; the lane bitmask is a u64
pub const MAX_LOG2_NUM_LANES: u32 = 6;

/// One transaction as laid out in a block: its digest, the lanes it
/// declares it will touch, and the charge it is willing to pay.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TransactionLayout {
    /// Transaction content hash
    pub digest: Digest,
    /// Declared lane usage, bit i set = lane i is touched
    pub lane_mask: u64,
    /// Maximum charge the sender will pay
    pub charge_limit: u64,
}

impl TransactionLayout {
    pub fn new(digest: Digest, lane_mask: u64, charge_limit: u64) -> Self {
        Self {
            digest,
            lane_mask,
            charge_limit,
        }
    }

    /// Iterate the lanes set in the mask, in ascending order
    pub fn lanes(&self) -> impl Iterator<Item = LaneIndex> + '_ {
        let mut mask = self.lane_mask;
        std::iter::from_fn(move || {
            if mask == 0 {
                return None;
            }
            let lane = mask.trailing_zeros();
            mask &= mask - 1;
            Some(lane)
        })
    }
}

/// An ordered group of transactions that must all complete before the
/// next slice of the block starts.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Slice {
    pub transactions: Vec<TransactionLayout>,
}

impl Slice {
    pub fn new(transactions: Vec<TransactionLayout>) -> Self {
        Self { transactions }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// An immutable block: identity, chain linkage, and the sliced
/// transaction schedule. Owned by the caller; the manager only reads it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Block {
    /// Block content hash
    pub digest: Digest,
    /// Digest of the parent block (`Digest::ZERO` for the genesis block)
    pub previous_digest: Digest,
    /// Merkle root over the block's transactions
    pub merkle_root: Digest,
    /// Height of this block in the chain
    pub block_number: u64,
    /// Fee recipient for the block
    pub miner: Address,
    /// Lane count exponent: the block partitions state into 2^n lanes
    pub log2_num_lanes: u32,
    /// Slices in execution order
    pub slices: Vec<Slice>,
}

impl Block {
    pub fn num_lanes(&self) -> u64 {
        1u64 << self.log2_num_lanes
    }

    /// Total number of transactions across all slices
    pub fn transaction_count(&self) -> usize {
        self.slices.iter().map(Slice::len).sum()
    }
}
