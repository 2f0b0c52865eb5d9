//! The task that owns a memory pool.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{
	allocator::MemoryAllocator,
	data::{MemoryData, PoolKind},
	pool::MemoryPool,
};
use crate::{
	edge::Connector,
	labels::{EdgeName, TaskName},
	task::{Task, TaskContext, TaskInit},
};

/// The task behind a memory edge.
///
/// A memory manager is a start task on one thread. Its input edge is the
/// memory edge's "release" channel and its output edge is the "get"
/// channel. On its initial start call it flushes its pool onto the get
/// channel; every later call processes one returned handle and then tops
/// the get channel back up with whatever fits.
///
/// Created by [`crate::graph::TaskGraph::add_memory_edge`]; never
/// instantiated directly by user code.
pub struct MemoryManager<A: MemoryAllocator> {
	edge_name: EdgeName,
	pool_size: usize,
	allocator: Arc<A>,
	kind: PoolKind,

	pool: Option<MemoryPool<A>>,

	/// The get channel, remembered at initialization so shutdown can
	/// reclaim unclaimed handles from it.
	get_edge: Option<Arc<Connector<MemoryData<A>>>>,
}

impl<A: MemoryAllocator> MemoryManager<A> {
	pub(crate) fn new(
		edge_name: EdgeName,
		pool_size: usize,
		allocator: Arc<A>,
		kind: PoolKind,
	) -> Self {
		Self {
			edge_name,
			pool_size,
			allocator,
			kind,
			pool: None,
			get_edge: None,
		}
	}

	/// Push pool handles onto the get channel until the pool is empty or
	/// the channel is full.
	fn flush_pool(&mut self, ctx: &mut TaskContext<'_, MemoryData<A>>) {
		let pool = match &mut self.pool {
			Some(pool) => pool,
			None => return,
		};
		let out = match ctx.output_connector() {
			Some(out) => out,
			None => return,
		};

		loop {
			let next = match pool.peek() {
				Some(next) => next.clone(),
				None => break,
			};
			if !out.try_produce(next) {
				break;
			}
			let _ = pool.take();
		}
	}
}

impl<A: MemoryAllocator> Task<MemoryData<A>, MemoryData<A>> for MemoryManager<A> {
	fn initialize(&mut self, init: &mut TaskInit<'_, MemoryData<A>, MemoryData<A>>) {
		let release_edge = match init.input() {
			Some(edge) => edge.clone(),
			None => {
				warn!(
					message = "Memory manager initialized without a release channel",
					edge = %self.edge_name,
				);
				return;
			}
		};
		self.get_edge = init.output().cloned();

		let mut pool = MemoryPool::new(self.pool_size);
		for _ in 0..self.pool_size {
			let handle = MemoryData::new(
				self.allocator.clone(),
				self.edge_name.clone(),
				self.kind,
				init.pipeline_id(),
				release_edge.clone(),
			);
			if self.kind == PoolKind::Static {
				handle.allocate();
			}
			pool.seed(Arc::new(handle));
		}

		debug!(
			message = "Memory pool filled",
			edge = %self.edge_name,
			pipeline = init.pipeline_id(),
			size = self.pool_size,
		);
		self.pool = Some(pool);
	}

	fn execute(
		&mut self,
		data: Option<Arc<MemoryData<A>>>,
		ctx: &mut TaskContext<'_, MemoryData<A>>,
	) {
		if let Some(handle) = data {
			if handle.pipeline_id() != ctx.pipeline_id() {
				warn!(
					message = "Memory manager received a handle from another pipeline, ignoring it",
					edge = %self.edge_name,
					pipeline = ctx.pipeline_id(),
					handle_pipeline = handle.pipeline_id(),
				);
			} else {
				handle.memory_used();
				if handle.can_release() {
					if self.kind == PoolKind::Dynamic {
						handle.free_memory();
					}
					handle.set_release_rule(None);
					if let Some(pool) = &mut self.pool {
						pool.put(handle);
					}
				}
			}
		}

		self.flush_pool(ctx);
	}

	fn shutdown(&mut self) {
		// Reclaim handles still sitting on the get channel, then release
		// whatever the pool holds. Handles that never came home stay with
		// their holders; their storage is the client's responsibility.
		let stranded = self.get_edge.take().map(|edge| edge.drain());
		if let Some(pool) = &mut self.pool {
			for handle in stranded.into_iter().flatten() {
				pool.put(handle);
			}
			pool.free_resident();
			debug!(
				message = "Memory manager shut down",
				edge = %self.edge_name,
				resident = pool.size(),
				capacity = pool.capacity(),
			);
		}
	}

	fn copy(&self) -> Box<dyn Task<MemoryData<A>, MemoryData<A>>> {
		Box::new(Self::new(
			self.edge_name.clone(),
			self.pool_size,
			self.allocator.clone(),
			self.kind,
		))
	}

	fn is_start_task(&self) -> bool {
		true
	}

	fn name(&self) -> TaskName {
		let kind = match self.kind {
			PoolKind::Static => "static",
			PoolKind::Dynamic => "dynamic",
			PoolKind::UserManaged => "user-managed",
		};
		TaskName::from(format!("memory-manager({kind}): {}", self.edge_name))
	}
}
