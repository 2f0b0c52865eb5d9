//! One rule bound to one output edge.

use std::sync::Arc;
use tracing::debug;

use super::rule::SharedRule;
use crate::{data::TaskData, edge::Connector, labels::TaskName};

/// The input-typed face of a rule manager, as held by a bookkeeper.
pub(crate) trait AnyRuleManager<In: TaskData>: Send {
	/// Forward one message through the rule.
	fn execute(&mut self, data: Arc<In>);

	/// Finalize the output edge if needed and shut the rule down.
	fn shutdown(&mut self);

	/// Re-home this manager when its bookkeeper learns its final
	/// pipeline id, just before threads run.
	fn set_pipeline_id(&mut self, pipeline_id: usize);
}

/// Owns one rule and the edge to that rule's consumer.
///
/// Rule managers are created by
/// [`TaskGraph::add_rule_edge`](crate::graph::TaskGraph::add_rule_edge) and
/// owned by their bookkeeper. Copying a graph creates fresh rule managers
/// around the same shared rule.
pub(crate) struct RuleManager<In: TaskData, Out: TaskData> {
	rule: SharedRule<In, Out>,
	connector: Arc<Connector<Out>>,
	pipeline_id: usize,
	name: TaskName,

	/// Latches once the output edge has been finalized
	terminated: bool,
}

impl<In: TaskData, Out: TaskData> RuleManager<In, Out> {
	pub fn new(
		rule: SharedRule<In, Out>,
		connector: Arc<Connector<Out>>,
		pipeline_id: usize,
	) -> Self {
		let name = rule.lock().unwrap().name();
		Self {
			rule,
			connector,
			pipeline_id,
			name,
			terminated: false,
		}
	}

	/// One-shot close of the output edge: drop this manager's producer
	/// slot and wake the consumer if that ended the edge.
	fn finalize(&mut self) {
		if self.terminated {
			return;
		}
		self.terminated = true;

		debug!(
			message = "Rule finished",
			rule = %self.name,
			pipeline = self.pipeline_id,
		);
		self.connector.producer_finished();
		if self.connector.is_input_terminated() {
			self.connector.wakeup_consumer();
		}
	}
}

impl<In: TaskData, Out: TaskData> AnyRuleManager<In> for RuleManager<In, Out> {
	fn execute(&mut self, data: Arc<In>) {
		let mut rule = self.rule.lock().unwrap();

		if self.terminated {
			return;
		}
		if rule.can_terminate(self.pipeline_id) {
			drop(rule);
			self.finalize();
			return;
		}

		let results = rule.apply(data, self.pipeline_id);
		for result in results {
			self.connector.produce(result);
		}

		if rule.can_terminate(self.pipeline_id) {
			drop(rule);
			self.finalize();
		}
	}

	fn shutdown(&mut self) {
		self.finalize();
		self.rule.lock().unwrap().shutdown(self.pipeline_id);
	}

	fn set_pipeline_id(&mut self, pipeline_id: usize) {
		self.pipeline_id = pipeline_id;
	}
}
