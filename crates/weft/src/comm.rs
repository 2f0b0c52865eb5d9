//! Cross-task data packets, routed by (graph address, task name).
//!
//! A runtime spawns one communicator thread for its whole graph hierarchy.
//! Every graph registers a read-only table of its task names and input
//! edges while it initializes, before any task thread runs; packets are
//! then delivered straight onto the addressed task's input edge. Routing
//! failures are logged and the packet is dropped; the sender is never told.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::{
	any::Any,
	collections::HashMap,
	sync::{Arc, Mutex},
	thread::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
	data::TaskData,
	edge::AnyConnector,
	labels::{GraphAddress, TaskName},
};

/// A message addressed to a task rather than flowing along an edge.
///
/// The payload must match the element type of the destination task's input
/// edge, or it is dropped at delivery time.
pub struct DataPacket {
	/// The address of the graph the packet was sent from
	pub source_address: GraphAddress,

	/// The name of the task the packet was sent from
	pub source_task: TaskName,

	/// The address of the graph the packet is going to
	pub dest_address: GraphAddress,

	/// The name of the task the packet is going to
	pub dest_task: TaskName,

	payload: Arc<dyn Any + Send + Sync>,
}

impl DataPacket {
	/// Make a new data packet carrying `payload`.
	pub fn new<D: TaskData>(
		source_address: GraphAddress,
		source_task: TaskName,
		dest_address: GraphAddress,
		dest_task: TaskName,
		payload: Arc<D>,
	) -> Self {
		Self {
			source_address,
			source_task,
			dest_address,
			dest_task,
			payload,
		}
	}
}

enum CommMessage {
	Packet(DataPacket),
	Terminate,
}

type RoutingTable = HashMap<(GraphAddress, TaskName), Arc<dyn AnyConnector>>;

/// A clonable handle onto the communicator thread.
///
/// Task bodies reach this through
/// [`TaskContext::send_data_packet`](crate::task::TaskContext::send_data_packet)
/// and [`TaskInit::communicator`](crate::task::TaskInit::communicator).
#[derive(Clone)]
pub struct CommunicatorHandle {
	sender: Sender<CommMessage>,
	table: Arc<Mutex<RoutingTable>>,
}

impl CommunicatorHandle {
	/// Queue a packet for delivery.
	pub fn produce_data_packet(&self, packet: DataPacket) {
		if self.sender.send(CommMessage::Packet(packet)).is_err() {
			warn!(message = "Communicator is gone, dropping data packet");
		}
	}

	/// Record the (name, input edge) pairs of one graph.
	/// Called while the graph initializes; the table is effectively
	/// read-only once task threads are running.
	pub(crate) fn register_graph(
		&self,
		address: &GraphAddress,
		entries: impl IntoIterator<Item = (TaskName, Arc<dyn AnyConnector>)>,
	) {
		let mut table = self.table.lock().unwrap();
		for (name, connector) in entries {
			let key = (address.clone(), name);
			if table.contains_key(&key) {
				warn!(
					message = "Duplicate task name in graph, packet routing will reach only one of them",
					address = %key.0,
					task = %key.1,
				);
				continue;
			}
			table.insert(key, connector);
		}
	}
}

/// The communicator thread, owned by the root runtime.
pub(crate) struct Communicator {
	handle: CommunicatorHandle,
	thread: Option<JoinHandle<()>>,
}

impl Communicator {
	/// Spawn the delivery thread.
	pub fn spawn() -> Self {
		let (sender, receiver) = unbounded();
		let table: Arc<Mutex<RoutingTable>> = Arc::new(Mutex::new(HashMap::new()));

		let thread_table = table.clone();
		let thread = std::thread::Builder::new()
			.name("graph-communicator".into())
			.spawn(move || Self::run(receiver, thread_table))
			.unwrap();

		Self {
			handle: CommunicatorHandle { sender, table },
			thread: Some(thread),
		}
	}

	pub fn handle(&self) -> CommunicatorHandle {
		self.handle.clone()
	}

	/// Deliver queued packets, then stop the thread.
	pub fn terminate_gracefully(&mut self) {
		if let Some(thread) = self.thread.take() {
			let _ = self.handle.sender.send(CommMessage::Terminate);
			if thread.join().is_err() {
				warn!(message = "Communicator thread panicked");
			}
		}
	}

	fn run(receiver: Receiver<CommMessage>, table: Arc<Mutex<RoutingTable>>) {
		for message in receiver {
			let packet = match message {
				CommMessage::Packet(packet) => packet,
				CommMessage::Terminate => break,
			};

			let connector = {
				let table = table.lock().unwrap();
				table
					.get(&(packet.dest_address.clone(), packet.dest_task.clone()))
					.cloned()
			};

			match connector {
				Some(connector) => {
					debug!(
						message = "Delivering data packet",
						address = %packet.dest_address,
						task = %packet.dest_task,
						source = %packet.source_task,
					);
					connector.produce_any(packet.payload);
				}
				None => {
					warn!(
						message = "Dropping data packet for unknown destination",
						address = %packet.dest_address,
						task = %packet.dest_task,
						source = %packet.source_task,
					);
				}
			}
		}
	}
}

impl Drop for Communicator {
	fn drop(&mut self) {
		self.terminate_gracefully();
	}
}
