//! Buffer pool: a fixed set of page frames shared by every open file

mod frame;
mod policy;
mod pool;
mod usage;

pub use frame::{FrameId, PageRef};
pub use policy::{EvictionPolicy, LruPolicy, MruPolicy, ReplacementPolicy};
pub use pool::BufferPool;
pub use usage::UsageList;
