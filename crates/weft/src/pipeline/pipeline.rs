//! The task that replicates a sub-graph.

use std::sync::Arc;
use tracing::{debug, warn};

use super::decomposition::{DecompositionRule, PipelineInputs};
use crate::{
	data::TaskData,
	edge::{Connector, EdgeConfig},
	graph::TaskGraph,
	labels::TaskName,
	runtime::Runtime,
	task::{Task, TaskContext, TaskInit},
};

/// Replicates a template sub-graph and routes input between the replicas.
///
/// An execution pipeline is one task in its owning graph. When its thread
/// initializes, it copies the template `K` times, each copy with its own
/// input edge, its own address (`parent:i`), and a nested runtime; all
/// copies share the pipeline's output edge. Each incoming message is
/// offered to every [`DecompositionRule`], which decides where it goes.
///
/// When the pipeline's input terminates, it closes every replica's input
/// edge and waits for the nested runtimes to drain.
pub struct ExecutionPipeline<T: TaskData, U: TaskData> {
	graph: Option<TaskGraph<T, U>>,
	num_pipelines: usize,
	rules: Vec<Arc<dyn DecompositionRule<T>>>,
	name: TaskName,

	inputs: Vec<Arc<Connector<T>>>,
	runtimes: Vec<Runtime<T, U>>,
}

impl<T: TaskData, U: TaskData> ExecutionPipeline<T, U> {
	/// Replicate `graph` `num_pipelines` times.
	/// Add at least one decomposition rule before running, or every
	/// message will be dropped.
	pub fn new(graph: TaskGraph<T, U>, num_pipelines: usize) -> Self {
		Self {
			graph: Some(graph),
			num_pipelines: num_pipelines.max(1),
			rules: Vec::new(),
			name: TaskName::new("execution-pipeline"),
			inputs: Vec::new(),
			runtimes: Vec::new(),
		}
	}

	/// Add an input decomposition rule. Rules see every message in the
	/// order they were added.
	pub fn add_decomposition_rule(&mut self, rule: impl DecompositionRule<T> + 'static) {
		self.rules.push(Arc::new(rule));
	}

	/// How many replicas this pipeline runs.
	pub fn num_pipelines(&self) -> usize {
		self.num_pipelines
	}
}

impl<T: TaskData, U: TaskData> Task<T, U> for ExecutionPipeline<T, U> {
	fn initialize(&mut self, init: &mut TaskInit<'_, T, U>) {
		let graph = match self.graph.take() {
			Some(graph) => graph,
			None => {
				warn!(
					message = "Execution pipeline initialized twice, replicas are already running",
					task = %self.name,
				);
				return;
			}
		};
		if self.rules.is_empty() {
			warn!(
				message = "Execution pipeline has no decomposition rules, all input will be dropped",
				task = %self.name,
			);
		}

		let output = init.output().cloned();
		for pipeline_id in 0..self.num_pipelines {
			let input: Arc<Connector<T>> = Arc::new(Connector::new(EdgeConfig::fifo()));
			// The pipeline task itself is each replica's one producer
			input.increment_producers();

			let replica = graph.copy_parts(
				pipeline_id,
				self.num_pipelines,
				Some(input.clone()),
				output.clone(),
				init.address(),
			);

			debug!(
				message = "Spawning pipeline replica",
				task = %self.name,
				address = %replica.address(),
			);
			let mut runtime = Runtime::new(replica);
			runtime.execute_nested(init.communicator().cloned());

			self.inputs.push(input);
			self.runtimes.push(runtime);
		}
	}

	fn execute(&mut self, data: Option<Arc<T>>, _ctx: &mut TaskContext<'_, U>) {
		let data = match data {
			Some(data) => data,
			None => return,
		};

		let inputs = PipelineInputs {
			inputs: &self.inputs,
		};
		for rule in &self.rules {
			rule.decompose(data.clone(), &inputs);
		}
	}

	fn shutdown(&mut self) {
		// Our input has terminated; drain the replicas
		for input in &self.inputs {
			input.producer_finished();
			if input.is_input_terminated() {
				input.wakeup_consumer();
			}
		}
		for runtime in &mut self.runtimes {
			runtime.wait();
		}
		debug!(
			message = "Execution pipeline drained",
			task = %self.name,
			replicas = self.runtimes.len(),
		);
	}

	fn copy(&self) -> Box<dyn Task<T, U>> {
		let graph = self
			.graph
			.as_ref()
			.map(|graph| graph.copy(graph.pipeline_id(), graph.num_pipelines()));
		Box::new(Self {
			graph,
			num_pipelines: self.num_pipelines,
			rules: self.rules.clone(),
			name: self.name.clone(),
			inputs: Vec::new(),
			runtimes: Vec::new(),
		})
	}

	fn name(&self) -> TaskName {
		self.name.clone()
	}
}
