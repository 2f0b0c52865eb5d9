//! The task body trait implemented by every vertex in a graph.

use std::{sync::Arc, time::Duration};

use super::context::{TaskContext, TaskInit};
use crate::{
	data::{AsAny, TaskData},
	edge::Connector,
	labels::TaskName,
};

/// A unit of work with one input type and one output type.
///
/// A task body never touches a thread or a queue itself. Its owning task
/// manager runs it on one or more dedicated threads, feeding it messages
/// from its input edge and collecting emissions through the
/// [`TaskContext`]. When a task declares more than one thread, the manager
/// clones the body once per thread via [`Task::copy`] and the clones share
/// the task's edges.
pub trait Task<In: TaskData, Out: TaskData>: AsAny + Send {
	/// Called once per thread before the first [`execute`](Task::execute).
	///
	/// The [`TaskInit`] describes where this body is running: pipeline id,
	/// graph address, and the edges it is attached to. Most tasks ignore
	/// it; the built-in memory manager, execution pipeline, and sub-graph
	/// wrapper bootstrap themselves from it.
	fn initialize(&mut self, init: &mut TaskInit<'_, In, Out>) {
		let _ = init;
	}

	/// Process one message, emitting results through
	/// [`TaskContext::add_result`].
	///
	/// `data` is `None` for the initial call to a
	/// [start task](Task::is_start_task) and for each expired tick of a
	/// [polling task](Task::poll_timeout).
	fn execute(&mut self, data: Option<Arc<In>>, ctx: &mut TaskContext<'_, Out>);

	/// Called once per thread after the execute loop exits.
	fn shutdown(&mut self) {}

	/// Whether this task is finished.
	///
	/// Consulted by the task manager before each input fetch. The default
	/// terminates when the input edge is terminated, or immediately if the
	/// task has no input edge; override it for tasks whose lifetime is not
	/// tied to their input, but make sure some condition eventually holds
	/// or the graph will not drain.
	fn can_terminate(&self, input: Option<&Arc<Connector<In>>>) -> bool {
		input.map_or(true, |edge| edge.is_input_terminated())
	}

	/// Clone this body for a replica thread or a graph copy.
	///
	/// The copy must be a fresh, independent instance; state that should
	/// be shared between replicas belongs behind an `Arc` inside the body.
	fn copy(&self) -> Box<dyn Task<In, Out>>;

	/// The number of threads driving this task. Each thread owns its own
	/// copy of the body.
	fn num_threads(&self) -> usize {
		1
	}

	/// Whether this task executes once with no input as soon as its
	/// thread starts.
	fn is_start_task(&self) -> bool {
		false
	}

	/// `Some(tick)` turns this task into a polling task: input fetches
	/// give up after `tick` and call [`execute`](Task::execute) with
	/// `None`, so the body can do periodic work and shutdown latency is
	/// capped at one tick plus one execute.
	fn poll_timeout(&self) -> Option<Duration> {
		None
	}

	/// The task's name, used in logs and as half of the data-packet
	/// routing key.
	fn name(&self) -> TaskName {
		TaskName::new("unnamed-task")
	}
}
