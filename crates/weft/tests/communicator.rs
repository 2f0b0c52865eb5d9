//! Data packets routed by (graph address, task name).

use std::{
	sync::{Arc, Mutex},
	time::{Duration, Instant},
};

use weft::{
	comm::DataPacket,
	data::{TaskData, VoidData},
	graph::TaskGraph,
	labels::{GraphAddress, TaskName},
	runtime::Runtime,
	task::{Task, TaskContext},
};

fn init_logging() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.try_init();
}

struct Num(u64);
impl TaskData for Num {}

/// Forwards every value and mirrors it to `sink` as a data packet,
/// offset so the sink can tell the two paths apart.
struct Mirror;

impl Task<Num, Num> for Mirror {
	fn execute(&mut self, data: Option<Arc<Num>>, ctx: &mut TaskContext<'_, Num>) {
		if let Some(data) = data {
			ctx.send_data_packet(DataPacket::new(
				ctx.address().clone(),
				ctx.task_name().clone(),
				ctx.address().clone(),
				TaskName::new("sink"),
				Arc::new(Num(data.0 + 1000)),
			));
			ctx.add_result_arc(data);
		}
	}

	fn copy(&self) -> Box<dyn Task<Num, Num>> {
		Box::new(Mirror)
	}

	fn name(&self) -> TaskName {
		TaskName::new("mirror")
	}
}

/// Collects everything that reaches it, from edges and packets alike.
struct Sink {
	seen: Arc<Mutex<Vec<u64>>>,
}

impl Task<Num, VoidData> for Sink {
	fn execute(&mut self, data: Option<Arc<Num>>, _ctx: &mut TaskContext<'_, VoidData>) {
		if let Some(data) = data {
			self.seen.lock().unwrap().push(data.0);
		}
	}

	fn copy(&self) -> Box<dyn Task<Num, VoidData>> {
		Box::new(Self {
			seen: self.seen.clone(),
		})
	}

	fn name(&self) -> TaskName {
		TaskName::new("sink")
	}
}

fn wait_for_count(seen: &Arc<Mutex<Vec<u64>>>, count: usize) {
	let deadline = Instant::now() + Duration::from_secs(10);
	while seen.lock().unwrap().len() < count {
		assert!(
			Instant::now() < deadline,
			"timed out waiting for {count} deliveries, got {}",
			seen.lock().unwrap().len()
		);
		std::thread::sleep(Duration::from_millis(1));
	}
}

#[test]
fn packets_reach_the_addressed_task() {
	init_logging();

	let seen = Arc::new(Mutex::new(Vec::new()));

	let mut graph = TaskGraph::<Num, VoidData>::new();
	let mirror = graph.add_task(Mirror);
	let sink = graph.add_task(Sink { seen: seen.clone() });
	graph.set_graph_consumer(mirror).unwrap();
	graph.add_edge(mirror, sink).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	for i in 0..10 {
		runtime.graph().produce(Num(i));
	}

	// Hold the input open until every packet has been delivered; once the
	// input closes, the mirror task and the sink's edge drain away.
	wait_for_count(&seen, 20);
	runtime.graph().finished_producing();
	runtime.wait();

	let seen = seen.lock().unwrap();
	let edge_values: Vec<u64> = seen.iter().copied().filter(|v| *v < 1000).collect();
	let mut packet_values: Vec<u64> = seen.iter().copied().filter(|v| *v >= 1000).collect();
	packet_values.sort_unstable();

	assert_eq!(edge_values, (0..10).collect::<Vec<u64>>());
	assert_eq!(packet_values, (1000..1010).collect::<Vec<u64>>());
}

#[test]
fn packets_for_unknown_destinations_are_dropped() {
	init_logging();

	let seen = Arc::new(Mutex::new(Vec::new()));

	let mut graph = TaskGraph::<Num, VoidData>::new();
	let sink = graph.add_task(Sink { seen: seen.clone() });
	graph.set_graph_consumer(sink).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	let comm = runtime.communicator().unwrap();

	// One packet for nobody, one for a wrong address, one that lands
	comm.produce_data_packet(DataPacket::new(
		GraphAddress::root(),
		TaskName::new("test"),
		GraphAddress::root(),
		TaskName::new("nobody"),
		Arc::new(Num(1)),
	));
	comm.produce_data_packet(DataPacket::new(
		GraphAddress::root(),
		TaskName::new("test"),
		GraphAddress::from("7:7"),
		TaskName::new("sink"),
		Arc::new(Num(2)),
	));
	comm.produce_data_packet(DataPacket::new(
		GraphAddress::root(),
		TaskName::new("test"),
		GraphAddress::root(),
		TaskName::new("sink"),
		Arc::new(Num(3)),
	));

	wait_for_count(&seen, 1);
	runtime.graph().finished_producing();
	runtime.wait();

	assert_eq!(*seen.lock().unwrap(), vec![3]);
}

#[test]
fn mistyped_payloads_are_dropped_at_delivery() {
	init_logging();

	struct Text(String);
	impl TaskData for Text {}

	let seen = Arc::new(Mutex::new(Vec::new()));

	let mut graph = TaskGraph::<Num, VoidData>::new();
	let sink = graph.add_task(Sink { seen: seen.clone() });
	graph.set_graph_consumer(sink).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	let comm = runtime.communicator().unwrap();

	comm.produce_data_packet(DataPacket::new(
		GraphAddress::root(),
		TaskName::new("test"),
		GraphAddress::root(),
		TaskName::new("sink"),
		Arc::new(Text("not a number".into())),
	));
	comm.produce_data_packet(DataPacket::new(
		GraphAddress::root(),
		TaskName::new("test"),
		GraphAddress::root(),
		TaskName::new("sink"),
		Arc::new(Num(9)),
	));

	wait_for_count(&seen, 1);
	runtime.graph().finished_producing();
	runtime.wait();

	assert_eq!(*seen.lock().unwrap(), vec![9]);
}
