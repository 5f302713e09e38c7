pub mod archive;
pub mod error;
pub mod executor;
pub mod item;
pub mod manager;
pub mod plan;
pub mod pool;
pub mod storage;
pub mod sync;
pub mod types;

pub use archive::{Checkpoint, StateArchive};
pub use error::{ExecutorFault, PlanError};
pub use executor::{ExecutionOutcome, Executor, ExecutorFactory, Status};
pub use item::ExecutionItem;
pub use manager::{
    Counters, ExecutionManager, ManagerConfig, ScheduleStatus, State, Summary,
};
pub use plan::ExecutionPlan;
pub use pool::ExecutorPool;
pub use storage::{InMemoryStorageUnit, StorageUnit, DEFAULT_CHECKPOINT_RETENTION};
pub use sync::Waitable;
pub use types::{
    Address, Block, Digest, DigestError, LaneIndex, Slice, TransactionLayout, MAX_LOG2_NUM_LANES,
};
