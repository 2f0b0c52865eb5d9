//! Embedding one graph inside another as a single task.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
	data::TaskData,
	graph::TaskGraph,
	labels::TaskName,
	runtime::Runtime,
	task::{Task, TaskContext, TaskInit},
};

/// A whole task graph wrapped up as one task body.
///
/// When its thread initializes, the wrapper redirects the inner graph's
/// input and output to the edges the wrapper was wired to in the outer
/// graph, then spawns a nested runtime for it. The wrapper's own thread
/// terminates immediately afterwards; its `shutdown` blocks until the
/// inner graph drains, so the outer runtime's `wait` covers the inner
/// graph too.
pub struct SubgraphTask<T: TaskData, U: TaskData> {
	graph: Option<TaskGraph<T, U>>,
	runtime: Option<Runtime<T, U>>,
	name: TaskName,
	wait_for_initialization: bool,
}

impl<T: TaskData, U: TaskData> SubgraphTask<T, U> {
	/// Wrap `graph` as a task.
	pub fn new(graph: TaskGraph<T, U>) -> Self {
		Self::named(graph, "subgraph")
	}

	/// Wrap `graph` as a task with an explicit name.
	pub fn named(graph: TaskGraph<T, U>, name: &str) -> Self {
		Self {
			graph: Some(graph),
			runtime: None,
			name: TaskName::new(name),
			wait_for_initialization: true,
		}
	}

	/// Whether initialization should block until every thread of the
	/// inner graph has initialized. Defaults to true.
	pub fn wait_for_initialization(mut self, wait: bool) -> Self {
		self.wait_for_initialization = wait;
		self
	}
}

impl<T: TaskData, U: TaskData> Task<T, U> for SubgraphTask<T, U> {
	fn initialize(&mut self, init: &mut TaskInit<'_, T, U>) {
		let mut graph = match self.graph.take() {
			Some(graph) => graph,
			None => {
				warn!(
					message = "Subgraph task initialized twice, inner graph is already running",
					task = %self.name,
				);
				return;
			}
		};

		// The wrapped tasks belong to the outer graph now: same address,
		// same pipeline
		graph.update_graph_info(
			init.pipeline_id(),
			init.num_pipelines(),
			init.address().clone(),
		);

		if let Some(output) = init.output() {
			graph.adopt_output_connector(output.clone());
		}
		if let Some(input) = init.input() {
			if graph.input_connector().queue_size() > 0 {
				warn!(
					message = "Data produced directly into a wrapped graph is lost; produce into the outer graph instead",
					task = %self.name,
					queued = graph.input_connector().queue_size(),
				);
			}
			graph.adopt_input_connector(input.clone());
		}

		debug!(
			message = "Spawning wrapped graph",
			task = %self.name,
			address = %graph.address(),
		);
		let mut runtime = Runtime::new(graph);
		runtime.execute_nested(init.communicator().cloned());
		if self.wait_for_initialization {
			runtime.wait_for_initialization();
		}
		self.runtime = Some(runtime);
	}

	/// Never called: the wrapper terminates as soon as it starts, and the
	/// inner graph's consumer reads the input edge directly.
	fn execute(&mut self, _data: Option<Arc<T>>, _ctx: &mut TaskContext<'_, U>) {}

	fn can_terminate(&self, _input: Option<&Arc<crate::edge::Connector<T>>>) -> bool {
		true
	}

	fn shutdown(&mut self) {
		if let Some(runtime) = &mut self.runtime {
			runtime.wait();
		}
	}

	fn copy(&self) -> Box<dyn Task<T, U>> {
		let graph = self
			.graph
			.as_ref()
			.map(|graph| graph.copy(graph.pipeline_id(), graph.num_pipelines()));
		Box::new(Self {
			graph,
			runtime: None,
			name: self.name.clone(),
			wait_for_initialization: self.wait_for_initialization,
		})
	}

	fn name(&self) -> TaskName {
		self.name.clone()
	}
}
