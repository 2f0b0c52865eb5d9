//! The graph configuration: tasks, edges, and lookup tables.

use std::{any::Any, marker::PhantomData, sync::Arc, time::Duration};
use tracing::{debug, warn};

use super::edges::{EdgeDescriptor, MemoryEdge, ProducerConsumerEdge, RuleEdge};
use crate::{
	bookkeeper::{rule::SharedRule, Bookkeeper, Rule},
	comm::CommunicatorHandle,
	data::{TaskData, VoidData},
	edge::{AnyConnector, Connector, EdgeConfig},
	errors::GraphError,
	labels::{EdgeName, GraphAddress, TaskName},
	memory::{data::PoolKind, MemoryAllocator},
	task::{
		manager::{AnyTaskManager, TaskManager},
		Task,
	},
};

/// A reference to a task inside the graph that created it.
///
/// Handles are plain indices; using one with a different graph is a wiring
/// error reported by that graph. They stay valid across
/// [`TaskGraph::copy`], which preserves task order.
pub struct TaskHandle<In: TaskData, Out: TaskData> {
	pub(crate) index: usize,
	_marker: PhantomData<fn(In) -> Out>,
}

impl<In: TaskData, Out: TaskData> TaskHandle<In, Out> {
	fn new(index: usize) -> Self {
		Self {
			index,
			_marker: PhantomData,
		}
	}
}

impl<In: TaskData, Out: TaskData> Clone for TaskHandle<In, Out> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<In: TaskData, Out: TaskData> Copy for TaskHandle<In, Out> {}

/// A reference to a bookkeeper inside the graph that created it.
pub struct BookkeeperHandle<In: TaskData> {
	pub(crate) index: usize,
	_marker: PhantomData<fn(In)>,
}

impl<In: TaskData> BookkeeperHandle<In> {
	/// This bookkeeper as an ordinary task handle, for use as an edge
	/// consumer or the graph consumer.
	pub fn as_task(&self) -> TaskHandle<In, VoidData> {
		TaskHandle::new(self.index)
	}
}

impl<In: TaskData> Clone for BookkeeperHandle<In> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<In: TaskData> Copy for BookkeeperHandle<In> {}

/// The type-independent part of a graph: its task managers and identity.
/// Edge descriptors work against this so they need not know the graph's
/// input and output types.
pub(crate) struct GraphCore {
	pub managers: Vec<Box<dyn AnyTaskManager>>,
	pub pipeline_id: usize,
	pub num_pipelines: usize,
	pub address: GraphAddress,
}

impl GraphCore {
	/// Resolve a handle to its typed manager.
	pub fn manager_mut<In: TaskData, Out: TaskData>(
		&mut self,
		index: usize,
	) -> Result<&mut TaskManager<In, Out>, GraphError> {
		let manager = self.managers.get_mut(index).ok_or(GraphError::UnknownTask)?;
		manager
			.as_any_mut()
			.downcast_mut::<TaskManager<In, Out>>()
			.ok_or(GraphError::UnknownTask)
	}
}

/// A task graph: the topology of tasks and edges, plus the graph's own
/// input and output edges.
///
/// `T` flows in through [`produce`](TaskGraph::produce) to the single
/// *graph consumer* task; `U` flows from the *graph producer* tasks out
/// through [`consume`](TaskGraph::consume). Hand a finished graph to a
/// [`Runtime`](crate::runtime::Runtime) to run it.
///
/// ```no_run
/// use std::sync::Arc;
/// use weft::data::TaskData;
/// use weft::graph::TaskGraph;
/// use weft::runtime::Runtime;
/// use weft::task::{Task, TaskContext};
///
/// struct Line(String);
/// impl TaskData for Line {}
/// struct Parsed(u64);
/// impl TaskData for Parsed {}
///
/// struct Parse;
/// impl Task<Line, Parsed> for Parse {
/// 	fn execute(&mut self, data: Option<Arc<Line>>, ctx: &mut TaskContext<'_, Parsed>) {
/// 		if let Some(line) = data {
/// 			ctx.add_result(Parsed(line.0.len() as u64));
/// 		}
/// 	}
/// 	fn copy(&self) -> Box<dyn Task<Line, Parsed>> {
/// 		Box::new(Parse)
/// 	}
/// }
///
/// let mut graph = TaskGraph::<Line, Parsed>::new();
/// let parse = graph.add_task(Parse);
/// graph.set_graph_consumer(parse)?;
/// graph.add_graph_producer(parse)?;
///
/// let mut runtime = Runtime::new(graph);
/// runtime.execute();
/// runtime.graph().produce(Line("hello".into()));
/// runtime.graph().finished_producing();
/// while let Some(parsed) = runtime.graph().consume() {
/// 	let _ = parsed;
/// }
/// runtime.wait();
/// # Ok::<(), weft::errors::GraphError>(())
/// ```
pub struct TaskGraph<T: TaskData, U: TaskData> {
	core: GraphCore,

	input: Arc<Connector<T>>,
	output: Arc<Connector<U>>,

	/// The one task consuming the graph's input
	graph_consumer: Option<usize>,

	/// The tasks producing the graph's output
	graph_producers: Vec<usize>,

	/// Recorded wiring, replayed on copy
	edges: Vec<Box<dyn EdgeDescriptor>>,
}

impl<T: TaskData, U: TaskData> TaskGraph<T, U> {
	/// Make an empty root graph.
	///
	/// The input edge starts with one producer: the caller. Call
	/// [`finished_producing`](TaskGraph::finished_producing) once all
	/// input has been fed in.
	pub fn new() -> Self {
		let input: Arc<Connector<T>> = Arc::new(Connector::new(EdgeConfig::fifo()));
		input.increment_producers();
		Self {
			core: GraphCore {
				managers: Vec::new(),
				pipeline_id: 0,
				num_pipelines: 1,
				address: GraphAddress::root(),
			},
			input,
			output: Arc::new(Connector::new(EdgeConfig::fifo())),
			graph_consumer: None,
			graph_producers: Vec::new(),
			edges: Vec::new(),
		}
	}

	/// The execution-pipeline replica this graph is, `0` for a root
	/// graph.
	pub fn pipeline_id(&self) -> usize {
		self.core.pipeline_id
	}

	/// How many sibling replicas of this graph exist, including itself.
	pub fn num_pipelines(&self) -> usize {
		self.core.num_pipelines
	}

	/// This graph's hierarchical address.
	pub fn address(&self) -> &GraphAddress {
		&self.core.address
	}

	/// Add a task to this graph.
	///
	/// The task is inert until it is wired to something and the graph is
	/// handed to a runtime.
	pub fn add_task<In: TaskData, Out: TaskData>(
		&mut self,
		task: impl Task<In, Out> + 'static,
	) -> TaskHandle<In, Out> {
		let index = self.core.managers.len();
		self.core.managers.push(Box::new(TaskManager::new(
			Box::new(task),
			self.core.pipeline_id,
			self.core.num_pipelines,
			self.core.address.clone(),
		)));
		TaskHandle::new(index)
	}

	/// Add a bookkeeper to this graph. Wire consumers to it with
	/// [`add_rule_edge`](TaskGraph::add_rule_edge).
	pub fn add_bookkeeper<In: TaskData>(
		&mut self,
		bookkeeper: Bookkeeper<In>,
	) -> BookkeeperHandle<In> {
		let handle = self.add_task(bookkeeper);
		BookkeeperHandle {
			index: handle.index,
			_marker: PhantomData,
		}
	}

	/// Connect `producer`'s output to `consumer`'s input with an
	/// unbounded FIFO edge.
	pub fn add_edge<PIn: TaskData, Mid: TaskData, COut: TaskData>(
		&mut self,
		producer: TaskHandle<PIn, Mid>,
		consumer: TaskHandle<Mid, COut>,
	) -> Result<(), GraphError> {
		self.add_edge_with_config(producer, consumer, EdgeConfig::fifo())
	}

	/// Connect `producer`'s output to `consumer`'s input with an
	/// explicitly configured edge.
	///
	/// If several edges share one consumer, the first edge added decides
	/// the queue configuration.
	pub fn add_edge_with_config<PIn: TaskData, Mid: TaskData, COut: TaskData>(
		&mut self,
		producer: TaskHandle<PIn, Mid>,
		consumer: TaskHandle<Mid, COut>,
		config: EdgeConfig<Mid>,
	) -> Result<(), GraphError> {
		self.record_edge(Box::new(ProducerConsumerEdge {
			producer,
			consumer,
			config,
		}))
	}

	/// Route messages from `bookkeeper` to `consumer` through `rule`.
	pub fn add_rule_edge<BIn: TaskData, Mid: TaskData, COut: TaskData>(
		&mut self,
		bookkeeper: BookkeeperHandle<BIn>,
		rule: impl Rule<BIn, Mid> + 'static,
		consumer: TaskHandle<Mid, COut>,
	) -> Result<(), GraphError> {
		self.add_shared_rule_edge(bookkeeper, Arc::new(std::sync::Mutex::new(rule)), consumer)
	}

	/// Route messages from `bookkeeper` to `consumer` through an already
	/// shared rule. Use this when one rule instance backs several edges.
	pub fn add_shared_rule_edge<BIn: TaskData, Mid: TaskData, COut: TaskData>(
		&mut self,
		bookkeeper: BookkeeperHandle<BIn>,
		rule: SharedRule<BIn, Mid>,
		consumer: TaskHandle<Mid, COut>,
	) -> Result<(), GraphError> {
		self.record_edge(Box::new(RuleEdge {
			bookkeeper: bookkeeper.index,
			rule,
			consumer,
			config: EdgeConfig::fifo(),
		}))
	}

	/// Attach a memory edge named `name` to `getter`, with `releaser`
	/// sending the handles home.
	///
	/// This creates a dedicated memory-manager task owning `pool_size`
	/// handles allocated through `allocator`. The getter obtains handles
	/// with the memory accessors on
	/// [`TaskContext`](crate::task::TaskContext); the releaser's
	/// termination closes the pool. A task may be its own releaser.
	///
	/// `name` must be unique among the memory edges of both tasks.
	pub fn add_memory_edge<GIn, GOut, RIn, ROut, A>(
		&mut self,
		name: &str,
		getter: TaskHandle<GIn, GOut>,
		releaser: TaskHandle<RIn, ROut>,
		allocator: A,
		pool_size: usize,
		kind: PoolKind,
	) -> Result<(), GraphError>
	where
		GIn: TaskData,
		GOut: TaskData,
		RIn: TaskData,
		ROut: TaskData,
		A: MemoryAllocator,
	{
		self.record_edge(Box::new(MemoryEdge {
			name: EdgeName::new(name),
			getter,
			releaser,
			allocator: Arc::new(allocator),
			pool_size,
			kind,
			manager_index: std::cell::Cell::new(None),
		}))
	}

	/// Designate the task that consumes this graph's input.
	///
	/// A graph has exactly one consumer; fan out behind a bookkeeper if
	/// several tasks need the input.
	pub fn set_graph_consumer<W: TaskData>(
		&mut self,
		task: TaskHandle<T, W>,
	) -> Result<(), GraphError> {
		if let Some(existing) = self.graph_consumer {
			return Err(GraphError::ConsumerAlreadySet {
				existing: self.core.managers[existing].name(),
			});
		}

		let input = self.input.clone();
		let manager = self.core.manager_mut::<T, W>(task.index)?;
		manager.set_input(input);
		self.graph_consumer = Some(task.index);
		Ok(())
	}

	/// Add a task whose output feeds this graph's output edge.
	/// Each producer adds one producer slot to the output edge.
	pub fn add_graph_producer<W: TaskData>(
		&mut self,
		task: TaskHandle<W, U>,
	) -> Result<(), GraphError> {
		let output = self.output.clone();
		let manager = self.core.manager_mut::<W, U>(task.index)?;
		manager.set_output(output);
		self.output.increment_producers();
		self.graph_producers.push(task.index);
		Ok(())
	}

	/// Feed one value into the graph.
	pub fn produce(&self, data: T) {
		self.input.produce(Arc::new(data));
	}

	/// Feed an already shared value into the graph.
	pub fn produce_arc(&self, data: Arc<T>) {
		self.input.produce(data);
	}

	/// Feed a batch of values into the graph, in order.
	pub fn produce_all(&self, data: impl IntoIterator<Item = T>) {
		for d in data {
			self.input.produce(Arc::new(d));
		}
	}

	/// Register one more producer feeding the graph's input, beyond the
	/// one the graph starts with.
	pub fn increment_graph_producers(&self) {
		self.input.increment_producers();
	}

	/// One input stream is done. Once every producer has finished, the
	/// graph drains and eventually terminates.
	pub fn finished_producing(&self) {
		self.input.producer_finished();
		if self.input.producer_count() == 0 {
			self.input.wakeup_consumer();
		}
	}

	/// Read one output value, blocking until output arrives or the graph
	/// output terminates. `None` means re-check
	/// [`is_output_terminated`](TaskGraph::is_output_terminated).
	pub fn consume(&self) -> Option<Arc<U>> {
		self.output.consume()
	}

	/// Read one output value, giving up after `timeout`.
	pub fn poll_output(&self, timeout: Duration) -> Option<Arc<U>> {
		self.output.poll(timeout)
	}

	/// Whether the graph's output edge will never again yield data.
	pub fn is_output_terminated(&self) -> bool {
		self.output.is_input_terminated()
	}

	/// This graph's input edge.
	pub fn input_connector(&self) -> &Arc<Connector<T>> {
		&self.input
	}

	/// This graph's output edge.
	pub fn output_connector(&self) -> &Arc<Connector<U>> {
		&self.output
	}

	/// Apply an edge to the live graph and record it for replay on
	/// copies.
	fn record_edge(&mut self, edge: Box<dyn EdgeDescriptor>) -> Result<(), GraphError> {
		edge.apply(&mut self.core)?;
		self.edges.push(edge);
		Ok(())
	}

	/// Copy this graph as execution-pipeline replica `pipeline_id` of
	/// `num_pipelines`.
	///
	/// The copy has fresh edges and fresh task bodies (via each body's
	/// `copy`), shares rule and allocator instances, and re-applies every
	/// recorded edge in order. Its address is this graph's address with
	/// `pipeline_id` appended.
	pub fn copy(&self, pipeline_id: usize, num_pipelines: usize) -> Self {
		let base = self.core.address.clone();
		self.copy_parts(pipeline_id, num_pipelines, None, None, &base)
	}

	/// Copy with explicit edges: execution pipelines pass each replica
	/// its own input edge and the shared output edge.
	pub(crate) fn copy_parts(
		&self,
		pipeline_id: usize,
		num_pipelines: usize,
		input: Option<Arc<Connector<T>>>,
		output: Option<Arc<Connector<U>>>,
		base_address: &GraphAddress,
	) -> Self {
		let address = base_address.child(pipeline_id);
		debug!(
			message = "Copying graph",
			address = %address,
			pipeline = pipeline_id,
			num_pipelines = num_pipelines,
		);

		let managers: Vec<Box<dyn AnyTaskManager>> = self
			.core
			.managers
			.iter()
			.map(|manager| manager.copy_for_graph(pipeline_id, num_pipelines, &address))
			.collect();

		let input = input.unwrap_or_else(|| {
			let connector: Arc<Connector<T>> = Arc::new(Connector::new(EdgeConfig::fifo()));
			connector.increment_producers();
			connector
		});
		let output =
			output.unwrap_or_else(|| Arc::new(Connector::new(EdgeConfig::fifo())));

		let mut copy = Self {
			core: GraphCore {
				managers,
				pipeline_id,
				num_pipelines,
				address,
			},
			input,
			output,
			graph_consumer: None,
			graph_producers: Vec::new(),
			edges: Vec::new(),
		};

		// Rewire the graph consumer and producers before replaying edges,
		// so shared input edges merge instead of being recreated
		if let Some(index) = self.graph_consumer {
			let connector: Arc<dyn Any + Send + Sync> = copy.input.clone();
			let _ = copy.core.managers[index].set_input_erased(connector);
			copy.graph_consumer = Some(index);
		}
		for &index in &self.graph_producers {
			let connector: Arc<dyn Any + Send + Sync> = copy.output.clone();
			let _ = copy.core.managers[index].set_output_erased(connector);
			copy.output.increment_producers();
			copy.graph_producers.push(index);
		}

		for edge in &self.edges {
			let edge = edge.clone_box();
			if let Err(error) = edge.apply(&mut copy.core) {
				// Cannot happen: the original apply validated the wiring
				warn!(
					message = "Edge descriptor failed to re-apply on a graph copy",
					error = %error,
				);
			}
			copy.edges.push(edge);
		}

		copy
	}

	/// Point this graph's input at `connector`: the graph consumer task
	/// reads from it directly. Used when a graph is embedded as a task.
	pub(crate) fn adopt_input_connector(&mut self, connector: Arc<Connector<T>>) {
		if let Some(index) = self.graph_consumer {
			let erased: Arc<dyn Any + Send + Sync> = connector.clone();
			let _ = self.core.managers[index].set_input_erased(erased);
		}
		self.input = connector;
	}

	/// Point this graph's output at `connector`, registering each graph
	/// producer on it. Used when a graph is embedded as a task.
	pub(crate) fn adopt_output_connector(&mut self, connector: Arc<Connector<U>>) {
		for &index in &self.graph_producers {
			let erased: Arc<dyn Any + Send + Sync> = connector.clone();
			let _ = self.core.managers[index].set_output_erased(erased);
			connector.increment_producers();
		}
		self.output = connector;
	}

	/// Re-home this graph under a new identity: the tasks of a wrapped
	/// graph belong to the graph that adopted it, so they take on its
	/// pipeline id and address. Runs before threads spawn.
	pub(crate) fn update_graph_info(
		&mut self,
		pipeline_id: usize,
		num_pipelines: usize,
		address: GraphAddress,
	) {
		self.core.pipeline_id = pipeline_id;
		self.core.num_pipelines = num_pipelines;
		self.core.address = address.clone();
		for manager in &mut self.core.managers {
			manager.update_graph_info(pipeline_id, num_pipelines, address.clone());
		}
	}

	/// Register this graph's tasks with the communicator and hand every
	/// manager its handle. Runs before threads spawn; the routing table
	/// is read-only afterwards.
	pub(crate) fn initialize(&mut self, comm: Option<&CommunicatorHandle>) {
		let comm = match comm {
			Some(comm) => comm,
			None => return,
		};

		let entries: Vec<(TaskName, Arc<dyn AnyConnector>)> = self
			.core
			.managers
			.iter()
			.filter_map(|manager| manager.input_any().map(|input| (manager.name(), input)))
			.collect();
		comm.register_graph(&self.core.address, entries);

		for manager in &mut self.core.managers {
			manager.set_communicator(comm.clone());
		}
	}

	/// The total number of threads this graph's tasks declare.
	pub(crate) fn thread_count(&self) -> usize {
		self.core
			.managers
			.iter()
			.map(|manager| manager.num_threads())
			.sum()
	}

	/// Move the task managers out for thread spawning.
	pub(crate) fn take_managers(&mut self) -> Vec<Box<dyn AnyTaskManager>> {
		std::mem::take(&mut self.core.managers)
	}
}
