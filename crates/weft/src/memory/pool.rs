//! The fixed-capacity handle pool owned by a memory manager.

use std::sync::Arc;

use super::{allocator::MemoryAllocator, data::MemoryData};

/// A FIFO pool of memory handles.
///
/// Only the owning memory manager's thread touches the pool; getters and
/// releasers reach it through the manager's edges. The pool keeps a second
/// list of every handle it ever created so the manager can reclaim storage
/// at shutdown no matter where the handles ended up.
pub struct MemoryPool<A: MemoryAllocator> {
	queue: Vec<Arc<MemoryData<A>>>,
	all: Vec<Arc<MemoryData<A>>>,
	capacity: usize,
}

impl<A: MemoryAllocator> MemoryPool<A> {
	/// Make an empty pool that will hold `capacity` handles.
	pub fn new(capacity: usize) -> Self {
		Self {
			queue: Vec::with_capacity(capacity),
			all: Vec::with_capacity(capacity),
			capacity,
		}
	}

	/// Add a freshly created handle, up to the pool's capacity.
	pub fn seed(&mut self, handle: Arc<MemoryData<A>>) {
		if self.all.len() >= self.capacity {
			return;
		}
		self.all.push(handle.clone());
		self.queue.push(handle);
	}

	/// The number of handles currently resident in the pool.
	pub fn size(&self) -> usize {
		self.queue.len()
	}

	/// The pool's fixed capacity.
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Whether no handles are resident.
	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	/// Look at the next handle without removing it.
	pub fn peek(&self) -> Option<&Arc<MemoryData<A>>> {
		self.queue.first()
	}

	/// Remove and return the next handle.
	pub fn take(&mut self) -> Option<Arc<MemoryData<A>>> {
		if self.queue.is_empty() {
			return None;
		}
		Some(self.queue.remove(0))
	}

	/// Recycle a handle back into the pool.
	pub fn put(&mut self, handle: Arc<MemoryData<A>>) {
		self.queue.push(handle);
	}

	/// Free the storage of every resident handle.
	pub fn free_resident(&mut self) {
		for handle in &self.queue {
			handle.free_memory();
		}
	}
}
