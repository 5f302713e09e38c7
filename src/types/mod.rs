mod block;
mod digest;

pub use block::{Block, LaneIndex, Slice, TransactionLayout, MAX_LOG2_NUM_LANES};
pub use digest::{Address, Digest, DigestError};
