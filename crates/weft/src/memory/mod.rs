//! Bounded, recyclable memory pools attached to tasks as memory edges.
//!
//! A memory edge connects a *getter* task to a dedicated
//! [`manager::MemoryManager`] task that owns a fixed pool of
//! [`data::MemoryData`] handles. The getter blocks on the manager's "get"
//! channel until a handle is free; whichever task ends up holding the
//! handle sends it home over the manager's "release" channel once its
//! release rule says so. An empty pool is back-pressure, not an error.

pub mod allocator;
pub mod data;
pub(crate) mod edges;
pub mod manager;
pub mod pool;

pub use allocator::MemoryAllocator;
pub use data::{MemoryData, MemoryReleaseRule, PoolKind};
pub use manager::MemoryManager;
