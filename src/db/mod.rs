pub mod store;

pub use store::{MemoryStore, StoreCounts, StoreOp};
