use crate::types::Digest;
use thiserror::Error;

/// Errors raised while decomposing a block into an execution plan
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("Block digest is unset")]
    MissingDigest,

    #[error("Transaction {index} in slice {slice} has no digest")]
    MissingTransactionDigest { slice: usize, index: usize },

    #[error("Lane count 2^{0} exceeds the supported maximum of 64 lanes")]
    TooManyLanes(u32),

    #[error("Transaction {digest} declares no lanes")]
    EmptyLaneMask { digest: Digest },

    #[error("Transaction {digest} declares lane {lane} outside the block's {num_lanes} lanes")]
    LaneOutOfRange {
        digest: Digest,
        lane: u32,
        num_lanes: u64,
    },

    #[error("Transactions {first} and {second} in slice {slice} declare overlapping lanes")]
    OverlappingLanes {
        slice: usize,
        first: Digest,
        second: Digest,
    },
}

/// Fault surfaced by an executor implementation. Faults are converted to
/// `Status::ResourceFailure` at the execution-item boundary and never
/// propagate into the scheduler.
#[derive(Clone, Debug, Error)]
pub enum ExecutorFault {
    #[error("Executor internal failure: {0}")]
    Internal(String),

    #[error("Storage unavailable: {0}")]
    Storage(String),
}
