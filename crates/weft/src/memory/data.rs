//! The reference-counted handles a memory pool hands out.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use super::allocator::MemoryAllocator;
use crate::{data::TaskData, edge::Connector, labels::EdgeName};

/// The allocation discipline of a memory edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
	/// Every handle's storage is allocated when the memory manager
	/// initializes and freed when it shuts down.
	Static,

	/// Storage is allocated per `get` (with a caller-provided element
	/// count) and freed when the handle is recycled.
	Dynamic,

	/// Handles carry no storage at all; the pool only throttles how many
	/// user-owned allocations are outstanding.
	UserManaged,
}

/// Per-handle state deciding when a handle may return to its pool.
///
/// The handle's memory manager calls [`memory_used`](Self::memory_used)
/// each time the handle comes back over the release channel, then consults
/// [`can_release`](Self::can_release); the typical rule counts uses and
/// releases after `k`.
pub trait MemoryReleaseRule: Send {
	/// Record one use of the handle.
	fn memory_used(&mut self);

	/// Whether the handle may be recycled into its pool.
	fn can_release(&self) -> bool;
}

/// Release after a fixed number of uses. The common case.
pub struct ReleaseAfterUses {
	remaining: usize,
}

impl ReleaseAfterUses {
	/// Release once the handle has been returned `uses` times.
	pub fn new(uses: usize) -> Self {
		Self { remaining: uses }
	}
}

impl MemoryReleaseRule for ReleaseAfterUses {
	fn memory_used(&mut self) {
		self.remaining = self.remaining.saturating_sub(1);
	}

	fn can_release(&self) -> bool {
		self.remaining == 0
	}
}

/// A handle owning one slot of a memory pool.
///
/// Handles circulate as `Arc<MemoryData<A>>`: out of the manager's "get"
/// channel, through the graph inside ordinary messages, and home over the
/// manager's "release" channel. The handle remembers which pipeline and
/// which release channel it came from, so releasing it routes it back to
/// the right pool even when execution pipelines have replicated the
/// manager.
pub struct MemoryData<A: MemoryAllocator> {
	allocator: Arc<A>,
	edge_name: EdgeName,
	kind: PoolKind,
	pipeline_id: usize,

	/// The owning manager's release channel
	release_edge: Arc<Connector<MemoryData<A>>>,

	memory: Mutex<Option<A::Memory>>,
	release_rule: Mutex<Option<Box<dyn MemoryReleaseRule>>>,
}

impl<A: MemoryAllocator> TaskData for MemoryData<A> {}

impl<A: MemoryAllocator> MemoryData<A> {
	pub(crate) fn new(
		allocator: Arc<A>,
		edge_name: EdgeName,
		kind: PoolKind,
		pipeline_id: usize,
		release_edge: Arc<Connector<MemoryData<A>>>,
	) -> Self {
		Self {
			allocator,
			edge_name,
			kind,
			pipeline_id,
			release_edge,
			memory: Mutex::new(None),
			release_rule: Mutex::new(None),
		}
	}

	/// The name of the memory edge this handle belongs to.
	pub fn edge_name(&self) -> &EdgeName {
		&self.edge_name
	}

	/// The allocation discipline of this handle's pool.
	pub fn kind(&self) -> PoolKind {
		self.kind
	}

	/// The pipeline whose memory manager owns this handle.
	pub fn pipeline_id(&self) -> usize {
		self.pipeline_id
	}

	/// Access this handle's storage. `None` for UserManaged handles, for
	/// Dynamic handles that are not currently allocated, and after the
	/// pool has shut down.
	pub fn memory(&self) -> MutexGuard<'_, Option<A::Memory>> {
		self.memory.lock().unwrap()
	}

	/// Allocate storage of the allocator's default size.
	pub(crate) fn allocate(&self) {
		let mut memory = self.memory.lock().unwrap();
		if memory.is_none() {
			*memory = Some(self.allocator.alloc());
		}
	}

	/// Allocate storage for `elems` elements.
	pub(crate) fn allocate_elems(&self, elems: usize) {
		let mut memory = self.memory.lock().unwrap();
		if memory.is_none() {
			*memory = Some(self.allocator.alloc_elems(elems));
		}
	}

	/// Free this handle's storage, if any.
	pub(crate) fn free_memory(&self) {
		if let Some(memory) = self.memory.lock().unwrap().take() {
			self.allocator.free(memory);
		}
	}

	pub(crate) fn set_release_rule(&self, rule: Option<Box<dyn MemoryReleaseRule>>) {
		*self.release_rule.lock().unwrap() = rule;
	}

	/// Record one use against this handle's release rule.
	pub(crate) fn memory_used(&self) {
		if let Some(rule) = self.release_rule.lock().unwrap().as_mut() {
			rule.memory_used();
		}
	}

	/// Whether this handle's release rule allows recycling.
	/// Handles without a rule (UserManaged) release immediately.
	pub(crate) fn can_release(&self) -> bool {
		self.release_rule
			.lock()
			.unwrap()
			.as_ref()
			.map_or(true, |rule| rule.can_release())
	}

	/// Send this handle home over its manager's release channel.
	pub(crate) fn release(self: &Arc<Self>) {
		if self.release_edge.is_input_terminated() {
			warn!(
				message = "Released memory after its manager shut down, dropping handle",
				edge = %self.edge_name,
				pipeline = self.pipeline_id,
			);
			return;
		}
		self.release_edge.produce(self.clone());
	}
}
