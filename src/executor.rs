//! Executor Interface
//!
//! The transaction interpreter is an external collaborator: the manager
//! only needs to hand it a transaction digest plus the lanes it may touch,
//! and read back a status and fee. Concrete VMs implement `Executor`;
//! the manager is generic over it and builds instances through an
//! injected factory so expensive setup is paid once per pool slot.

use crate::error::ExecutorFault;
use crate::types::{Address, Digest, LaneIndex};
use std::sync::Arc;

/// Terminal status of one transaction's execution.
///
/// Ordinary failures are recorded on the item and do not stop the block;
/// fatal failures prevent the whole block from committing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Initial state, also final for items never dispatched
    NotRun = 0,
    Success = 1,
    ChainCodeLookupFailure = 2,
    ChainCodeExecFailure = 3,
    ContractNameParseFailure = 4,
    InsufficientAvailableFunds = 5,
    TransferFailure = 6,
    InsufficientCharge = 7,
    /// Fatal: the transaction body could not be found
    TxLookupFailure = 8,
    /// Fatal: the executor itself faulted
    ResourceFailure = 9,
    /// Fatal: unclassifiable failure
    InexplicableFailure = 10,
}

impl Status {
    /// Whether this status forbids committing the block
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Status::TxLookupFailure | Status::ResourceFailure | Status::InexplicableFailure
        )
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    pub(crate) fn from_u8(value: u8) -> Status {
        match value {
            0 => Status::NotRun,
            1 => Status::Success,
            2 => Status::ChainCodeLookupFailure,
            3 => Status::ChainCodeExecFailure,
            4 => Status::ContractNameParseFailure,
            5 => Status::InsufficientAvailableFunds,
            6 => Status::TransferFailure,
            7 => Status::InsufficientCharge,
            8 => Status::TxLookupFailure,
            9 => Status::ResourceFailure,
            _ => Status::InexplicableFailure,
        }
    }
}

/// Outcome of executing one transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: Status,
    /// Compute units consumed
    pub charge: u64,
    /// Price per compute unit
    pub charge_rate: u64,
    /// Fee owed to the block miner
    pub fee: u64,
}

impl ExecutionOutcome {
    pub fn new(status: Status, charge: u64, charge_rate: u64, fee: u64) -> Self {
        Self {
            status,
            charge,
            charge_rate,
            fee,
        }
    }

    pub fn success(fee: u64) -> Self {
        Self::new(Status::Success, 0, 1, fee)
    }

    pub fn failed(status: Status) -> Self {
        Self::new(status, 0, 1, 0)
    }
}

/// A transaction interpreter capable of running one transaction against a
/// declared set of lanes. Stateless between calls; reused across blocks.
pub trait Executor: Send {
    fn execute(
        &mut self,
        digest: &Digest,
        block_number: u64,
        slice_index: u64,
        lanes: &[LaneIndex],
    ) -> Result<ExecutionOutcome, ExecutorFault>;

    /// Credit the block's aggregate fees to the miner
    fn settle_fees(
        &mut self,
        miner: &Address,
        amount: u64,
        log2_num_lanes: u32,
    ) -> Result<(), ExecutorFault>;
}

/// Factory invoked lazily by the pool, once per executor slot
pub type ExecutorFactory<E> = Arc<dyn Fn() -> E + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_statuses() {
        assert!(Status::TxLookupFailure.is_fatal());
        assert!(Status::ResourceFailure.is_fatal());
        assert!(Status::InexplicableFailure.is_fatal());

        assert!(!Status::Success.is_fatal());
        assert!(!Status::NotRun.is_fatal());
        assert!(!Status::InsufficientAvailableFunds.is_fatal());
        assert!(!Status::ChainCodeExecFailure.is_fatal());
    }

    #[test]
    fn test_status_round_trips_through_u8() {
        let all = [
            Status::NotRun,
            Status::Success,
            Status::ChainCodeLookupFailure,
            Status::ChainCodeExecFailure,
            Status::ContractNameParseFailure,
            Status::InsufficientAvailableFunds,
            Status::TransferFailure,
            Status::InsufficientCharge,
            Status::TxLookupFailure,
            Status::ResourceFailure,
            Status::InexplicableFailure,
        ];
        for status in all {
            assert_eq!(Status::from_u8(status as u8), status);
        }
    }

    #[test]
    fn test_outcome_helpers() {
        let ok = ExecutionOutcome::success(150);
        assert!(ok.status.is_success());
        assert_eq!(ok.fee, 150);

        let failed = ExecutionOutcome::failed(Status::TransferFailure);
        assert_eq!(failed.status, Status::TransferFailure);
        assert_eq!(failed.fee, 0);
    }
}
