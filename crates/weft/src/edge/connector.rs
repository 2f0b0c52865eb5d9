//! The blocking queue that connects tasks.

use std::{
	any::Any,
	sync::{Arc, Condvar, Mutex},
	time::{Duration, Instant},
};
use tracing::{debug, warn};

use super::queue::{EdgeConfig, EdgeQueue};
use crate::data::TaskData;

struct ConnectorState<D: TaskData> {
	queue: EdgeQueue<D>,
	capacity: Option<usize>,

	/// The number of live upstream emitters. Non-increasing once the
	/// graph is running.
	producers: usize,

	/// The largest queue size observed so far
	max_queue_size: usize,
}

impl<D: TaskData> ConnectorState<D> {
	fn is_input_terminated(&self) -> bool {
		self.producers == 0 && self.queue.is_empty()
	}

	fn note_queue_size(&mut self) {
		if self.queue.len() > self.max_queue_size {
			self.max_queue_size = self.queue.len();
		}
	}
}

/// An edge between tasks: a blocking multi-producer, multi-consumer queue
/// with producer accounting.
///
/// A connector knows how many upstream emitters are still alive. Once that
/// count reaches zero and the queue is empty the connector is *input
/// terminated*; this is latching, since producer counts never grow while
/// the graph runs. A consumer that reads from a terminated connector gets
/// `None` and must re-check its own termination condition.
///
/// `None` is also used as a wakeup sentinel: [`Connector::wakeup_consumer`]
/// enqueues one to unblock a waiting consumer during shutdown cascades.
pub struct Connector<D: TaskData> {
	state: Mutex<ConnectorState<D>>,
	consumer_cv: Condvar,
	producer_cv: Condvar,
}

impl<D: TaskData> Connector<D> {
	/// Make a new connector with no producers.
	pub fn new(config: EdgeConfig<D>) -> Self {
		Self {
			state: Mutex::new(ConnectorState {
				queue: EdgeQueue::new(&config.ordering),
				capacity: config.capacity,
				producers: 0,
				max_queue_size: 0,
			}),
			consumer_cv: Condvar::new(),
			producer_cv: Condvar::new(),
		}
	}

	/// Enqueue one message. Blocks while a bounded connector is full.
	///
	/// Producing to a terminated connector is a wiring bug; the message is
	/// logged and dropped so the graph can keep draining.
	pub fn produce(&self, data: Arc<D>) {
		let mut state = self.state.lock().unwrap();
		if state.is_input_terminated() {
			warn!(
				message = "Produced to a terminated connector, dropping data",
				connector_type = std::any::type_name::<D>(),
			);
			return;
		}

		while let Some(capacity) = state.capacity {
			if state.queue.len() < capacity {
				break;
			}
			state = self.producer_cv.wait(state).unwrap();
		}

		state.queue.push(Some(data));
		state.note_queue_size();
		drop(state);

		self.consumer_cv.notify_one();
	}

	/// Enqueue every message in `data`, in order.
	pub fn produce_all(&self, data: impl IntoIterator<Item = Arc<D>>) {
		for d in data {
			self.produce(d);
		}
	}

	/// Enqueue one message without blocking.
	/// Returns `false` if the connector is full, in which case nothing was
	/// enqueued; callers that want to retry should pass a clone.
	pub fn try_produce(&self, data: Arc<D>) -> bool {
		let mut state = self.state.lock().unwrap();
		if let Some(capacity) = state.capacity {
			if state.queue.len() >= capacity {
				return false;
			}
		}
		state.queue.push(Some(data));
		state.note_queue_size();
		drop(state);

		self.consumer_cv.notify_one();
		return true;
	}

	/// Dequeue one message, blocking until data arrives or this connector
	/// becomes input terminated.
	///
	/// `None` either means "terminated" or is a shutdown wakeup; consumers
	/// must re-check their termination condition and try again.
	pub fn consume(&self) -> Option<Arc<D>> {
		let mut state = self.state.lock().unwrap();
		loop {
			if let Some(slot) = state.queue.pop() {
				drop(state);
				self.producer_cv.notify_one();
				return slot;
			}
			if state.producers == 0 {
				return None;
			}
			state = self.consumer_cv.wait(state).unwrap();
		}
	}

	/// Dequeue one message, giving up after `timeout`.
	pub fn poll(&self, timeout: Duration) -> Option<Arc<D>> {
		let deadline = Instant::now() + timeout;
		let mut state = self.state.lock().unwrap();
		loop {
			if let Some(slot) = state.queue.pop() {
				drop(state);
				self.producer_cv.notify_one();
				return slot;
			}
			if state.producers == 0 {
				return None;
			}

			let now = Instant::now();
			if now >= deadline {
				return None;
			}
			let (guard, _) = self
				.consumer_cv
				.wait_timeout(state, deadline - now)
				.unwrap();
			state = guard;
		}
	}

	/// Enqueue a wakeup sentinel to unblock one waiting consumer.
	pub fn wakeup_consumer(&self) {
		let mut state = self.state.lock().unwrap();
		// Sentinels bypass the capacity bound; a full queue must not
		// stall shutdown.
		state.queue.push(None);
		drop(state);
		self.consumer_cv.notify_one();
	}

	/// Register one more producer for this connector.
	pub fn increment_producers(&self) {
		let mut state = self.state.lock().unwrap();
		state.producers += 1;
	}

	/// One producer has finished. When the last producer finishes, every
	/// blocked consumer is woken so it can observe termination.
	pub fn producer_finished(&self) {
		let mut state = self.state.lock().unwrap();
		if state.producers == 0 {
			debug!(
				message = "producer_finished on a connector with no producers",
				connector_type = std::any::type_name::<D>(),
			);
			return;
		}
		state.producers -= 1;
		let done = state.producers == 0;
		drop(state);

		if done {
			self.consumer_cv.notify_all();
		}
	}

	/// The number of live producers.
	pub fn producer_count(&self) -> usize {
		self.state.lock().unwrap().producers
	}

	/// Whether this connector will never again yield data.
	pub fn is_input_terminated(&self) -> bool {
		self.state.lock().unwrap().is_input_terminated()
	}

	/// The number of queued messages, wakeup sentinels included.
	pub fn queue_size(&self) -> usize {
		self.state.lock().unwrap().queue.len()
	}

	/// The largest queue size observed so far.
	pub fn max_queue_size(&self) -> usize {
		self.state.lock().unwrap().max_queue_size
	}

	/// Take every queued message out of this connector, discarding wakeup
	/// sentinels. Used by the memory manager to reclaim unclaimed handles
	/// at shutdown.
	pub(crate) fn drain(&self) -> Vec<Arc<D>> {
		let mut state = self.state.lock().unwrap();
		let mut out = Vec::new();
		while let Some(slot) = state.queue.pop() {
			if let Some(data) = slot {
				out.push(data);
			}
		}
		drop(state);
		self.producer_cv.notify_all();
		return out;
	}
}

/// The type-erased face of a [`Connector`].
///
/// Cross-type collections, such as the task-name lookup table used for
/// data-packet routing, hold connectors through this trait. It exposes only
/// the operations that do not need the element type.
pub trait AnyConnector: Send + Sync {
	/// See [`Connector::increment_producers`]
	fn increment_producers(&self);

	/// See [`Connector::producer_finished`]
	fn producer_finished(&self);

	/// See [`Connector::producer_count`]
	fn producer_count(&self) -> usize;

	/// See [`Connector::wakeup_consumer`]
	fn wakeup_consumer(&self);

	/// See [`Connector::is_input_terminated`]
	fn is_input_terminated(&self) -> bool;

	/// See [`Connector::queue_size`]
	fn queue_size(&self) -> usize;

	/// See [`Connector::max_queue_size`]
	fn max_queue_size(&self) -> usize;

	/// Enqueue a type-erased message. If the payload is not this
	/// connector's element type, the message is logged and dropped.
	fn produce_any(&self, data: Arc<dyn Any + Send + Sync>);

	/// The name of this connector's element type, for diagnostics.
	fn element_type_name(&self) -> &'static str;
}

impl<D: TaskData> AnyConnector for Connector<D> {
	fn increment_producers(&self) {
		Connector::increment_producers(self)
	}

	fn producer_finished(&self) {
		Connector::producer_finished(self)
	}

	fn producer_count(&self) -> usize {
		Connector::producer_count(self)
	}

	fn wakeup_consumer(&self) {
		Connector::wakeup_consumer(self)
	}

	fn is_input_terminated(&self) -> bool {
		Connector::is_input_terminated(self)
	}

	fn queue_size(&self) -> usize {
		Connector::queue_size(self)
	}

	fn max_queue_size(&self) -> usize {
		Connector::max_queue_size(self)
	}

	fn produce_any(&self, data: Arc<dyn Any + Send + Sync>) {
		match data.downcast::<D>() {
			Ok(data) => self.produce(data),
			Err(_) => {
				warn!(
					message = "Dropping data with mismatched type",
					expected = std::any::type_name::<D>(),
				);
			}
		}
	}

	fn element_type_name(&self) -> &'static str {
		std::any::type_name::<D>()
	}
}
