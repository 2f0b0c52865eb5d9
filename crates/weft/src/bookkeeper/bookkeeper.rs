//! The fan-out task.

use std::sync::Arc;

use super::manager::AnyRuleManager;
use crate::{
	data::{TaskData, VoidData},
	labels::TaskName,
	task::{Task, TaskContext, TaskInit},
};

/// Routes one input stream to many typed consumers.
///
/// A bookkeeper holds an ordered list of rule managers, one per rule edge
/// wired through it, and forwards every message to each of them in
/// registration order. It never emits on its own output edge.
///
/// Add one with
/// [`TaskGraph::add_bookkeeper`](crate::graph::TaskGraph::add_bookkeeper),
/// then wire consumers with
/// [`TaskGraph::add_rule_edge`](crate::graph::TaskGraph::add_rule_edge).
pub struct Bookkeeper<In: TaskData> {
	rule_managers: Vec<Box<dyn AnyRuleManager<In>>>,
}

impl<In: TaskData> Bookkeeper<In> {
	/// Make a bookkeeper with no rules.
	pub fn new() -> Self {
		Self {
			rule_managers: Vec::new(),
		}
	}

	pub(crate) fn add_rule_manager(&mut self, rule_manager: Box<dyn AnyRuleManager<In>>) {
		self.rule_managers.push(rule_manager);
	}
}

impl<In: TaskData> Task<In, VoidData> for Bookkeeper<In> {
	fn initialize(&mut self, init: &mut TaskInit<'_, In, VoidData>) {
		for rule_manager in &mut self.rule_managers {
			rule_manager.set_pipeline_id(init.pipeline_id());
		}
	}

	fn execute(&mut self, data: Option<Arc<In>>, _ctx: &mut TaskContext<'_, VoidData>) {
		let data = match data {
			Some(data) => data,
			None => return,
		};
		for rule_manager in &mut self.rule_managers {
			rule_manager.execute(data.clone());
		}
	}

	fn shutdown(&mut self) {
		for rule_manager in &mut self.rule_managers {
			rule_manager.shutdown();
		}
	}

	/// A fresh bookkeeper with no rule managers; the graph copy re-applies
	/// its rule edges.
	fn copy(&self) -> Box<dyn Task<In, VoidData>> {
		Box::new(Self::new())
	}

	fn name(&self) -> TaskName {
		TaskName::new("bookkeeper")
	}
}
