//! How an execution pipeline splits its input between replicas.

use std::sync::Arc;
use tracing::warn;

use crate::{data::TaskData, edge::Connector, labels::TaskName};

/// The input edges of an execution pipeline's replicas, as seen by a
/// decomposition rule.
pub struct PipelineInputs<'a, T: TaskData> {
	pub(crate) inputs: &'a [Arc<Connector<T>>],
}

impl<T: TaskData> PipelineInputs<'_, T> {
	/// How many replicas this pipeline runs.
	pub fn num_pipelines(&self) -> usize {
		self.inputs.len()
	}

	/// Send `data` to replica `pipeline_id`'s input edge.
	/// Out-of-range ids are logged and the message is dropped.
	pub fn send(&self, pipeline_id: usize, data: Arc<T>) {
		match self.inputs.get(pipeline_id) {
			Some(input) => input.produce(data),
			None => {
				warn!(
					message = "Decomposition rule routed data to a pipeline that does not exist",
					pipeline = pipeline_id,
					num_pipelines = self.inputs.len(),
				);
			}
		}
	}
}

/// Decides which replicas of an execution pipeline receive each input
/// message.
///
/// A pipeline may hold several rules; each one sees every message and may
/// send it to zero or more replicas. Rules are shared across copies of the
/// pipeline, so stateful rules keep their state behind atomics or a lock.
pub trait DecompositionRule<T: TaskData>: Send + Sync {
	/// Route one message.
	fn decompose(&self, data: Arc<T>, inputs: &PipelineInputs<'_, T>);

	/// The rule's name, used in logs.
	fn name(&self) -> TaskName {
		TaskName::new("unnamed-decomposition-rule")
	}
}

/// Deal messages out one replica at a time, wrapping around.
pub struct RoundRobinRule {
	next: std::sync::atomic::AtomicUsize,
}

impl RoundRobinRule {
	/// Make a rule that starts at replica 0.
	pub fn new() -> Self {
		Self {
			next: std::sync::atomic::AtomicUsize::new(0),
		}
	}
}

impl<T: TaskData> DecompositionRule<T> for RoundRobinRule {
	fn decompose(&self, data: Arc<T>, inputs: &PipelineInputs<'_, T>) {
		let n = self
			.next
			.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
		inputs.send(n % inputs.num_pipelines().max(1), data);
	}

	fn name(&self) -> TaskName {
		TaskName::new("round-robin")
	}
}
