//! What a task body sees of the graph around it.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::{
	comm::{CommunicatorHandle, DataPacket},
	data::TaskData,
	edge::Connector,
	labels::{EdgeName, GraphAddress, TaskName},
	memory::{
		data::{MemoryData, PoolKind},
		edges::MemoryEdgeMap,
		MemoryAllocator, MemoryReleaseRule,
	},
};

/// Where a task body is running, handed to
/// [`Task::initialize`](crate::task::Task::initialize).
pub struct TaskInit<'a, In: TaskData, Out: TaskData> {
	pub(crate) pipeline_id: usize,
	pub(crate) num_pipelines: usize,
	pub(crate) address: &'a GraphAddress,
	pub(crate) input: Option<&'a Arc<Connector<In>>>,
	pub(crate) output: Option<&'a Arc<Connector<Out>>>,
	pub(crate) comm: Option<&'a CommunicatorHandle>,
}

impl<'a, In: TaskData, Out: TaskData> TaskInit<'a, In, Out> {
	/// The execution-pipeline replica this body belongs to, `0` outside
	/// of execution pipelines.
	pub fn pipeline_id(&self) -> usize {
		self.pipeline_id
	}

	/// How many sibling replicas exist, including this one.
	pub fn num_pipelines(&self) -> usize {
		self.num_pipelines
	}

	/// The address of the graph that owns this task.
	pub fn address(&self) -> &GraphAddress {
		self.address
	}

	/// The task's input edge, if it has one.
	pub fn input(&self) -> Option<&'a Arc<Connector<In>>> {
		self.input
	}

	/// The task's output edge, if it has one.
	pub fn output(&self) -> Option<&'a Arc<Connector<Out>>> {
		self.output
	}

	/// The graph's communicator, if one is running.
	pub fn communicator(&self) -> Option<&'a CommunicatorHandle> {
		self.comm
	}
}

/// A task body's window onto the graph during
/// [`Task::execute`](crate::task::Task::execute): emitting results,
/// getting and releasing pooled memory, and sending data packets.
pub struct TaskContext<'a, Out: TaskData> {
	pub(crate) output: Option<&'a Arc<Connector<Out>>>,
	pub(crate) memory: &'a MemoryEdgeMap,
	pub(crate) pipeline_id: usize,
	pub(crate) num_pipelines: usize,
	pub(crate) address: &'a GraphAddress,
	pub(crate) task_name: &'a TaskName,
	pub(crate) comm: Option<&'a CommunicatorHandle>,
}

impl<Out: TaskData> TaskContext<'_, Out> {
	/// Emit one result onto this task's output edge.
	/// Blocks while the edge is full. Results emitted by a task with no
	/// output edge are dropped.
	pub fn add_result(&mut self, data: Out) {
		self.add_result_arc(Arc::new(data));
	}

	/// Emit an already shared result onto this task's output edge.
	pub fn add_result_arc(&mut self, data: Arc<Out>) {
		match self.output {
			Some(output) => output.produce(data),
			None => {
				debug!(
					message = "Result emitted by a task with no output edge, dropping it",
					task = %self.task_name,
				);
			}
		}
	}

	/// The execution-pipeline replica this body belongs to, `0` outside
	/// of execution pipelines.
	pub fn pipeline_id(&self) -> usize {
		self.pipeline_id
	}

	/// How many sibling replicas exist, including this one.
	pub fn num_pipelines(&self) -> usize {
		self.num_pipelines
	}

	/// The address of the graph that owns this task.
	pub fn address(&self) -> &GraphAddress {
		self.address
	}

	/// This task's name.
	pub fn task_name(&self) -> &TaskName {
		self.task_name
	}

	/// Whether a memory edge with this name is attached to this task.
	pub fn has_memory_edge(&self, name: &str) -> bool {
		self.memory.contains_key(&EdgeName::new(name))
	}

	/// Get a handle from a Static memory edge, blocking until the pool
	/// has one free.
	///
	/// `rule` decides when the handle returns to its pool; see
	/// [`MemoryReleaseRule`]. Returns `None` if the edge is unknown,
	/// mistyped, or its manager has already shut down.
	pub fn get_memory<A: MemoryAllocator>(
		&self,
		name: &str,
		rule: Box<dyn MemoryReleaseRule>,
	) -> Option<Arc<MemoryData<A>>> {
		self.fetch_memory::<A>(name, PoolKind::Static, Some(rule), None)
	}

	/// Get a handle from a Dynamic memory edge and allocate storage for
	/// `elems` elements, blocking until the pool has a handle free.
	pub fn get_dynamic_memory<A: MemoryAllocator>(
		&self,
		name: &str,
		rule: Box<dyn MemoryReleaseRule>,
		elems: usize,
	) -> Option<Arc<MemoryData<A>>> {
		self.fetch_memory::<A>(name, PoolKind::Dynamic, Some(rule), Some(elems))
	}

	/// Get a sentinel handle from a UserManaged memory edge, blocking
	/// until one is free. The handle carries no storage; it only
	/// throttles how many user-owned allocations are outstanding.
	pub fn get_user_managed_memory<A: MemoryAllocator>(
		&self,
		name: &str,
	) -> Option<Arc<MemoryData<A>>> {
		self.fetch_memory::<A>(name, PoolKind::UserManaged, None, None)
	}

	/// Send a handle home to its pool.
	///
	/// The handle routes itself: it remembers which pipeline's manager it
	/// came from, so this works from any task the handle has traveled to,
	/// including across execution-pipeline replicas.
	pub fn release_memory<A: MemoryAllocator>(&self, handle: Arc<MemoryData<A>>) {
		handle.release();
	}

	/// Send a data packet to the task addressed by the packet's
	/// destination. Delivery is asynchronous; packets for unknown
	/// destinations are logged and dropped.
	pub fn send_data_packet(&self, packet: DataPacket) {
		match self.comm {
			Some(comm) => comm.produce_data_packet(packet),
			None => {
				warn!(
					message = "No communicator is running, dropping data packet",
					task = %self.task_name,
				);
			}
		}
	}

	/// This task's output edge, for machinery that needs non-blocking
	/// access.
	pub(crate) fn output_connector(&self) -> Option<&Arc<Connector<Out>>> {
		self.output
	}

	fn fetch_memory<A: MemoryAllocator>(
		&self,
		name: &str,
		kind: PoolKind,
		rule: Option<Box<dyn MemoryReleaseRule>>,
		elems: Option<usize>,
	) -> Option<Arc<MemoryData<A>>> {
		let edge = match self.memory.get(&EdgeName::new(name)) {
			Some(edge) => edge,
			None => {
				error!(
					message = "No memory edge with this name is attached to this task",
					task = %self.task_name,
					edge = name,
				);
				return None;
			}
		};

		if edge.kind != kind {
			error!(
				message = "Memory edge discipline mismatch",
				task = %self.task_name,
				edge = name,
				expected = ?edge.kind,
				requested = ?kind,
			);
			return None;
		}

		let get = match &edge.get {
			Some(get) => get.clone(),
			None => {
				error!(
					message = "This task releases on this memory edge but does not get from it",
					task = %self.task_name,
					edge = name,
				);
				return None;
			}
		};

		let get = match get.downcast::<Connector<MemoryData<A>>>() {
			Ok(get) => get,
			Err(_) => {
				error!(
					message = "Memory edge allocator type mismatch",
					task = %self.task_name,
					edge = name,
				);
				return None;
			}
		};

		let handle = get.consume()?;
		handle.set_release_rule(rule);
		if let Some(elems) = elems {
			handle.allocate_elems(elems);
		}
		Some(handle)
	}
}
