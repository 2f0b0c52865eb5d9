//! The predicate-and-emit functions a bookkeeper consults.

use std::sync::{Arc, Mutex};

use crate::{data::TaskData, labels::TaskName};

/// Decides, per message, what a bookkeeper forwards to one consumer.
///
/// A rule lives behind a [`SharedRule`] handle. When a graph is copied for
/// an execution pipeline, every replica's rule manager holds the *same*
/// rule instance; the handle's lock serializes calls, so state kept in a
/// rule (counts, matrices of received blocks) sees every pipeline's data.
/// `pipeline_id` tells the rule which replica each call is for.
pub trait Rule<In: TaskData, Out: TaskData>: Send {
	/// Process one message, returning whatever should be forwarded to
	/// this rule's consumer. Return an empty `Vec` to forward nothing.
	fn apply(&mut self, data: Arc<In>, pipeline_id: usize) -> Vec<Arc<Out>>;

	/// Whether this rule is finished for the given pipeline. Checked
	/// before and after every [`apply`](Rule::apply); once true, the
	/// rule's output edge is closed for that pipeline and the rule is
	/// never applied there again.
	///
	/// The default never terminates early; the edge closes when the
	/// bookkeeper itself drains.
	fn can_terminate(&self, pipeline_id: usize) -> bool {
		let _ = pipeline_id;
		false
	}

	/// Called once per pipeline when the rule's manager shuts down.
	fn shutdown(&mut self, pipeline_id: usize) {
		let _ = pipeline_id;
	}

	/// The rule's name, used in logs.
	fn name(&self) -> TaskName {
		TaskName::new("unnamed-rule")
	}
}

/// A shared-ownership handle to a rule.
///
/// The lock is the rule's mutex: rule managers in different pipeline
/// replicas acquire it around every call into the rule.
pub type SharedRule<In, Out> = Arc<Mutex<dyn Rule<In, Out>>>;
