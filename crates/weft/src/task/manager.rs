//! The per-thread driver that owns a task body.

use std::{
	any::Any,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc,
	},
	time::{Duration, Instant},
};
use tracing::{debug, warn};

use super::{
	context::{TaskContext, TaskInit},
	task::Task,
};
use crate::{
	comm::CommunicatorHandle,
	data::TaskData,
	edge::{AnyConnector, Connector},
	errors::GraphError,
	labels::{EdgeName, GraphAddress, TaskName},
	memory::edges::{MemoryEdgeMap, MemoryEdgeRef},
	runtime::InitGate,
};

/// What one task thread did with its life.
///
/// Collected by the runtime when its threads are joined.
#[derive(Debug, Clone)]
pub struct TaskThreadProfile {
	/// The task's name
	pub task: TaskName,

	/// The pipeline replica the task ran in
	pub pipeline_id: usize,

	/// The thread's id within the task's replica group
	pub thread_id: usize,

	/// Total time spent inside the task body
	pub compute_time: Duration,

	/// Total time spent waiting for input
	pub wait_time: Duration,

	/// The largest input-queue size observed
	pub max_queue_size: usize,
}

/// The type-erased face of a [`TaskManager`], as stored in a graph.
pub(crate) trait AnyTaskManager: Send {
	fn name(&self) -> TaskName;
	fn num_threads(&self) -> usize;

	/// Clone this manager for an extra thread in the same replica group.
	/// The copy shares the original's edges.
	fn copy_for_thread(&self) -> Box<dyn AnyTaskManager>;

	/// Clone this manager for a copy of the whole graph. The copy has a
	/// fresh body and no edges; edge descriptors re-apply the wiring.
	fn copy_for_graph(
		&self,
		pipeline_id: usize,
		num_pipelines: usize,
		address: &GraphAddress,
	) -> Box<dyn AnyTaskManager>;

	/// Re-home this manager inside a different graph identity. Used when
	/// a wrapped graph is adopted by an outer graph; runs before threads
	/// spawn.
	fn update_graph_info(
		&mut self,
		pipeline_id: usize,
		num_pipelines: usize,
		address: GraphAddress,
	);

	fn set_thread(&mut self, thread_id: usize, threads_remaining: Arc<AtomicUsize>);
	fn set_stop_flag(&mut self, stop: Arc<AtomicBool>);
	fn set_init_gate(&mut self, gate: Arc<InitGate>);
	fn set_communicator(&mut self, comm: CommunicatorHandle);

	/// Rebind an input edge by type-erased reference. The connector must
	/// be an `Arc<Connector<In>>` for this manager's input type.
	fn set_input_erased(&mut self, connector: Arc<dyn Any + Send + Sync>) -> bool;

	/// Rebind an output edge by type-erased reference.
	fn set_output_erased(&mut self, connector: Arc<dyn Any + Send + Sync>) -> bool;

	fn input_any(&self) -> Option<Arc<dyn AnyConnector>>;

	/// Drive the task to completion on the calling thread.
	fn run(&mut self) -> TaskThreadProfile;

	fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Owns one task body and drives it on one thread.
///
/// A task declaring `t` threads gets `t` managers sharing its edges and a
/// shared threads-remaining counter; the last thread to see its task
/// terminate closes the group's output edge exactly once.
pub struct TaskManager<In: TaskData, Out: TaskData> {
	task: Box<dyn Task<In, Out>>,
	name: TaskName,

	input: Option<Arc<Connector<In>>>,
	output: Option<Arc<Connector<Out>>>,
	memory_edges: MemoryEdgeMap,

	pipeline_id: usize,
	num_pipelines: usize,
	address: GraphAddress,

	thread_id: usize,
	threads_remaining: Option<Arc<AtomicUsize>>,
	stop: Option<Arc<AtomicBool>>,
	init_gate: Option<Arc<InitGate>>,
	comm: Option<CommunicatorHandle>,

	/// Set when the body panics; the manager then drains as if its input
	/// had terminated.
	failed: bool,

	compute_time: Duration,
	wait_time: Duration,
}

impl<In: TaskData, Out: TaskData> TaskManager<In, Out> {
	pub(crate) fn new(
		task: Box<dyn Task<In, Out>>,
		pipeline_id: usize,
		num_pipelines: usize,
		address: GraphAddress,
	) -> Self {
		let name = task.name();
		Self {
			task,
			name,
			input: None,
			output: None,
			memory_edges: MemoryEdgeMap::new(),
			pipeline_id,
			num_pipelines,
			address,
			thread_id: 0,
			threads_remaining: None,
			stop: None,
			init_gate: None,
			comm: None,
			failed: false,
			compute_time: Duration::ZERO,
			wait_time: Duration::ZERO,
		}
	}

	pub(crate) fn set_input(&mut self, connector: Arc<Connector<In>>) {
		self.input = Some(connector);
	}

	pub(crate) fn set_output(&mut self, connector: Arc<Connector<Out>>) {
		self.output = Some(connector);
	}

	pub(crate) fn input(&self) -> Option<Arc<Connector<In>>> {
		self.input.clone()
	}

	pub(crate) fn task_mut(&mut self) -> &mut dyn Task<In, Out> {
		&mut *self.task
	}

	pub(crate) fn has_memory_edge(&self, name: &EdgeName) -> bool {
		self.memory_edges.contains_key(name)
	}

	pub(crate) fn attach_memory_edge(
		&mut self,
		name: EdgeName,
		edge: MemoryEdgeRef,
	) -> Result<(), GraphError> {
		if self.memory_edges.contains_key(&name) {
			return Err(GraphError::DuplicateMemoryEdge {
				name,
				task: self.name.clone(),
			});
		}
		self.memory_edges.insert(name, edge);
		Ok(())
	}

	fn initialize(&mut self) {
		let mut init = TaskInit {
			pipeline_id: self.pipeline_id,
			num_pipelines: self.num_pipelines,
			address: &self.address,
			input: self.input.as_ref(),
			output: self.output.as_ref(),
			comm: self.comm.as_ref(),
		};

		let task = &mut self.task;
		let result = catch_unwind(AssertUnwindSafe(|| task.initialize(&mut init)));
		if result.is_err() {
			warn!(
				message = "Task panicked during initialization",
				task = %self.name,
				pipeline = self.pipeline_id,
				thread = self.thread_id,
			);
			self.failed = true;
		}

		if let Some(gate) = &self.init_gate {
			gate.thread_ready();
		}
	}

	fn execute_body(&mut self, data: Option<Arc<In>>) {
		let mut ctx = TaskContext {
			output: self.output.as_ref(),
			memory: &self.memory_edges,
			pipeline_id: self.pipeline_id,
			num_pipelines: self.num_pipelines,
			address: &self.address,
			task_name: &self.name,
			comm: self.comm.as_ref(),
		};

		let started = Instant::now();
		let task = &mut self.task;
		let result = catch_unwind(AssertUnwindSafe(|| task.execute(data, &mut ctx)));
		self.compute_time += started.elapsed();

		if result.is_err() {
			warn!(
				message = "Task panicked, treating its input as terminated",
				task = %self.name,
				pipeline = self.pipeline_id,
				thread = self.thread_id,
			);
			self.failed = true;
		}
	}

	fn should_stop(&self) -> bool {
		self.stop
			.as_ref()
			.is_some_and(|stop| stop.load(Ordering::Relaxed))
	}

	/// Close the edges this task was a registered producer of, beyond its
	/// own output edge: the release channel of every attached memory
	/// edge. Runs on the replica group's last thread only.
	fn terminate_connections(&self) {
		for (name, edge) in &self.memory_edges {
			if let Some(release) = &edge.release {
				debug!(
					message = "Closing memory release channel",
					task = %self.name,
					edge = %name,
				);
				release.producer_finished();
				if release.is_input_terminated() {
					release.wakeup_consumer();
				}
			}
		}
	}

	fn profile(&self) -> TaskThreadProfile {
		TaskThreadProfile {
			task: self.name.clone(),
			pipeline_id: self.pipeline_id,
			thread_id: self.thread_id,
			compute_time: self.compute_time,
			wait_time: self.wait_time,
			max_queue_size: self
				.input
				.as_ref()
				.map_or(0, |input| input.max_queue_size()),
		}
	}
}

impl<In: TaskData, Out: TaskData> AnyTaskManager for TaskManager<In, Out> {
	fn name(&self) -> TaskName {
		self.name.clone()
	}

	fn num_threads(&self) -> usize {
		self.task.num_threads().max(1)
	}

	fn copy_for_thread(&self) -> Box<dyn AnyTaskManager> {
		let mut copy = TaskManager::new(
			self.task.copy(),
			self.pipeline_id,
			self.num_pipelines,
			self.address.clone(),
		);
		copy.input = self.input.clone();
		copy.output = self.output.clone();
		copy.memory_edges = self.memory_edges.clone();
		copy.comm = self.comm.clone();
		Box::new(copy)
	}

	fn copy_for_graph(
		&self,
		pipeline_id: usize,
		num_pipelines: usize,
		address: &GraphAddress,
	) -> Box<dyn AnyTaskManager> {
		Box::new(TaskManager::new(
			self.task.copy(),
			pipeline_id,
			num_pipelines,
			address.clone(),
		))
	}

	fn update_graph_info(
		&mut self,
		pipeline_id: usize,
		num_pipelines: usize,
		address: GraphAddress,
	) {
		self.pipeline_id = pipeline_id;
		self.num_pipelines = num_pipelines;
		self.address = address;
	}

	fn set_thread(&mut self, thread_id: usize, threads_remaining: Arc<AtomicUsize>) {
		self.thread_id = thread_id;
		self.threads_remaining = Some(threads_remaining);
	}

	fn set_stop_flag(&mut self, stop: Arc<AtomicBool>) {
		self.stop = Some(stop);
	}

	fn set_init_gate(&mut self, gate: Arc<InitGate>) {
		self.init_gate = Some(gate);
	}

	fn set_communicator(&mut self, comm: CommunicatorHandle) {
		self.comm = Some(comm);
	}

	fn set_input_erased(&mut self, connector: Arc<dyn Any + Send + Sync>) -> bool {
		match connector.downcast::<Connector<In>>() {
			Ok(connector) => {
				self.input = Some(connector);
				true
			}
			Err(_) => {
				warn!(
					message = "Input edge type mismatch, wiring unchanged",
					task = %self.name,
					expected = std::any::type_name::<In>(),
				);
				false
			}
		}
	}

	fn set_output_erased(&mut self, connector: Arc<dyn Any + Send + Sync>) -> bool {
		match connector.downcast::<Connector<Out>>() {
			Ok(connector) => {
				self.output = Some(connector);
				true
			}
			Err(_) => {
				warn!(
					message = "Output edge type mismatch, wiring unchanged",
					task = %self.name,
					expected = std::any::type_name::<Out>(),
				);
				false
			}
		}
	}

	fn input_any(&self) -> Option<Arc<dyn AnyConnector>> {
		self.input
			.clone()
			.map(|input| input as Arc<dyn AnyConnector>)
	}

	fn run(&mut self) -> TaskThreadProfile {
		debug!(
			message = "Task thread starting",
			task = %self.name,
			pipeline = self.pipeline_id,
			thread = self.thread_id,
			address = %self.address,
		);

		self.initialize();

		let mut start_pending = self.task.is_start_task() && !self.failed;
		let mut was_last_thread = false;

		loop {
			// Start tasks run once before their first input fetch
			if start_pending {
				start_pending = false;
				self.execute_body(None);
			}

			if self.failed || self.should_stop() || self.task.can_terminate(self.input.as_ref()) {
				let remaining = self
					.threads_remaining
					.as_ref()
					.map_or(1, |counter| counter.fetch_sub(1, Ordering::SeqCst));
				was_last_thread = remaining == 1;

				// Unblock sibling threads so they re-check termination
				if let Some(input) = &self.input {
					input.wakeup_consumer();
				}

				if was_last_thread {
					if let Some(output) = &self.output {
						output.producer_finished();
						output.wakeup_consumer();
					}
				}
				break;
			}

			let waited = Instant::now();
			let data = match (&self.input, self.task.poll_timeout()) {
				(None, _) => None,
				(Some(input), Some(timeout)) => input.poll(timeout),
				(Some(input), None) => input.consume(),
			};
			self.wait_time += waited.elapsed();

			match data {
				Some(data) => self.execute_body(Some(data)),
				None => {
					// Polling tasks see the expired tick; everyone else
					// just re-checks termination
					if self.task.poll_timeout().is_some() {
						self.execute_body(None);
					}
				}
			}
		}

		let task = &mut self.task;
		if catch_unwind(AssertUnwindSafe(|| task.shutdown())).is_err() {
			warn!(
				message = "Task panicked during shutdown",
				task = %self.name,
				pipeline = self.pipeline_id,
				thread = self.thread_id,
			);
		}

		if was_last_thread {
			self.terminate_connections();
		}

		debug!(
			message = "Task thread exiting",
			task = %self.name,
			pipeline = self.pipeline_id,
			thread = self.thread_id,
			last_thread = was_last_thread,
		);
		self.profile()
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}
