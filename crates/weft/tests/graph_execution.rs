//! End-to-end graphs of plain tasks: chains, replica groups, polling, and
//! early termination.

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use weft::{
	data::TaskData,
	graph::TaskGraph,
	labels::TaskName,
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

/// Passes every input through, adding a constant.
struct AddConst {
	amount: u64,
}

impl Task<Num, Num> for AddConst {
	fn execute(&mut self, data: Option<Arc<Num>>, ctx: &mut TaskContext<'_, Num>) {
		if let Some(data) = data {
			ctx.add_result(Num(data.0 + self.amount));
		}
	}

	fn copy(&self) -> Box<dyn Task<Num, Num>> {
		Box::new(Self {
			amount: self.amount,
		})
	}

	fn name(&self) -> TaskName {
		TaskName::new("add-const")
	}
}

/// A replicated pass-through that counts items and shutdowns across all
/// of its threads.
struct Replicated {
	threads: usize,
	processed: Arc<AtomicUsize>,
	shutdowns: Arc<AtomicUsize>,
}

impl Task<Num, Num> for Replicated {
	fn execute(&mut self, data: Option<Arc<Num>>, ctx: &mut TaskContext<'_, Num>) {
		if let Some(data) = data {
			self.processed.fetch_add(1, Ordering::Relaxed);
			ctx.add_result_arc(data);
		}
	}

	fn shutdown(&mut self) {
		self.shutdowns.fetch_add(1, Ordering::Relaxed);
	}

	fn copy(&self) -> Box<dyn Task<Num, Num>> {
		Box::new(Self {
			threads: self.threads,
			processed: self.processed.clone(),
			shutdowns: self.shutdowns.clone(),
		})
	}

	fn num_threads(&self) -> usize {
		self.threads
	}

	fn name(&self) -> TaskName {
		TaskName::new("replicated")
	}
}

/// A polling pass-through that also counts expired ticks.
struct Polling {
	ticks: Arc<AtomicUsize>,
}

impl Task<Num, Num> for Polling {
	fn execute(&mut self, data: Option<Arc<Num>>, ctx: &mut TaskContext<'_, Num>) {
		match data {
			Some(data) => ctx.add_result_arc(data),
			None => {
				self.ticks.fetch_add(1, Ordering::Relaxed);
			}
		}
	}

	fn copy(&self) -> Box<dyn Task<Num, Num>> {
		Box::new(Self {
			ticks: self.ticks.clone(),
		})
	}

	fn poll_timeout(&self) -> Option<Duration> {
		Some(Duration::from_millis(2))
	}

	fn name(&self) -> TaskName {
		TaskName::new("polling")
	}
}

/// Panics on a chosen value, passes everything else through.
struct PanicsOn {
	value: u64,
}

impl Task<Num, Num> for PanicsOn {
	fn execute(&mut self, data: Option<Arc<Num>>, ctx: &mut TaskContext<'_, Num>) {
		if let Some(data) = data {
			assert_ne!(data.0, self.value, "poisoned value");
			ctx.add_result_arc(data);
		}
	}

	fn copy(&self) -> Box<dyn Task<Num, Num>> {
		Box::new(Self { value: self.value })
	}

	fn name(&self) -> TaskName {
		TaskName::new("panics-on")
	}
}

fn collect_outputs(runtime: &Runtime<Num, Num>) -> Vec<u64> {
	let mut out = Vec::new();
	while !runtime.graph().is_output_terminated() {
		if let Some(data) = runtime.graph().consume() {
			out.push(data.0);
		}
	}
	out
}

#[test]
fn linear_chain_preserves_count_and_order() {
	init_logging();

	let mut graph = TaskGraph::<Num, Num>::new();
	let t1 = graph.add_task(AddConst { amount: 1 });
	let t2 = graph.add_task(AddConst { amount: 10 });
	let t3 = graph.add_task(AddConst { amount: 100 });
	graph.set_graph_consumer(t1).unwrap();
	graph.add_edge(t1, t2).unwrap();
	graph.add_edge(t2, t3).unwrap();
	graph.add_graph_producer(t3).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	for i in 0..100 {
		runtime.graph().produce(Num(i));
	}
	runtime.graph().finished_producing();

	let out = collect_outputs(&runtime);
	runtime.wait();

	let expected: Vec<u64> = (0..100).map(|i| i + 111).collect();
	assert_eq!(out, expected);
	assert!(runtime.graph().is_output_terminated());
}

#[test]
fn replicated_task_processes_everything_once() {
	init_logging();

	let processed = Arc::new(AtomicUsize::new(0));
	let shutdowns = Arc::new(AtomicUsize::new(0));

	let mut graph = TaskGraph::<Num, Num>::new();
	let t1 = graph.add_task(AddConst { amount: 0 });
	let t2 = graph.add_task(Replicated {
		threads: 5,
		processed: processed.clone(),
		shutdowns: shutdowns.clone(),
	});
	let t3 = graph.add_task(AddConst { amount: 0 });
	graph.set_graph_consumer(t1).unwrap();
	graph.add_edge(t1, t2).unwrap();
	graph.add_edge(t2, t3).unwrap();
	graph.add_graph_producer(t3).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	for i in 0..100 {
		runtime.graph().produce(Num(i));
	}
	runtime.graph().finished_producing();

	let mut out = collect_outputs(&runtime);
	runtime.wait();

	// Replicas do not preserve global order, but nothing is lost or
	// duplicated
	out.sort_unstable();
	assert_eq!(out, (0..100).collect::<Vec<u64>>());
	assert_eq!(processed.load(Ordering::Relaxed), 100);

	// Every thread in the replica group shut down exactly once
	assert_eq!(shutdowns.load(Ordering::Relaxed), 5);
}

#[test]
fn polling_task_drains_and_sees_ticks() {
	init_logging();

	let ticks = Arc::new(AtomicUsize::new(0));

	let mut graph = TaskGraph::<Num, Num>::new();
	let t1 = graph.add_task(Polling {
		ticks: ticks.clone(),
	});
	graph.set_graph_consumer(t1).unwrap();
	graph.add_graph_producer(t1).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	for i in 0..10 {
		runtime.graph().produce(Num(i));
	}

	// Leave the input open long enough for the poll timeout to expire a
	// few times
	std::thread::sleep(Duration::from_millis(20));
	runtime.graph().finished_producing();

	let out = collect_outputs(&runtime);
	runtime.wait();

	assert_eq!(out.len(), 10);
	assert!(ticks.load(Ordering::Relaxed) > 0);
}

#[test]
fn terminate_all_stops_an_open_graph() {
	init_logging();

	let ticks = Arc::new(AtomicUsize::new(0));

	let mut graph = TaskGraph::<Num, Num>::new();
	let t1 = graph.add_task(Polling {
		ticks: ticks.clone(),
	});
	graph.set_graph_consumer(t1).unwrap();
	graph.add_graph_producer(t1).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();

	// The input is never closed; terminate_all is the only way out
	std::thread::sleep(Duration::from_millis(10));
	runtime.terminate_all();
	runtime.wait();

	assert!(runtime.graph().is_output_terminated());
}

#[test]
fn task_panic_drains_downstream() {
	init_logging();

	let mut graph = TaskGraph::<Num, Num>::new();
	let t1 = graph.add_task(PanicsOn { value: 3 });
	let t2 = graph.add_task(AddConst { amount: 0 });
	graph.set_graph_consumer(t1).unwrap();
	graph.add_edge(t1, t2).unwrap();
	graph.add_graph_producer(t2).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	for i in 0..10 {
		runtime.graph().produce(Num(i));
	}
	runtime.graph().finished_producing();

	let out = collect_outputs(&runtime);
	runtime.wait();

	// Items before the poisoned one made it through; the failure closed
	// the rest of the graph instead of wedging it
	assert_eq!(out, vec![0, 1, 2]);
	assert!(runtime.graph().is_output_terminated());
}

#[test]
fn profiles_cover_every_thread() {
	init_logging();

	let processed = Arc::new(AtomicUsize::new(0));
	let shutdowns = Arc::new(AtomicUsize::new(0));

	let mut graph = TaskGraph::<Num, Num>::new();
	let t1 = graph.add_task(AddConst { amount: 0 });
	let t2 = graph.add_task(Replicated {
		threads: 3,
		processed,
		shutdowns,
	});
	graph.set_graph_consumer(t1).unwrap();
	graph.add_edge(t1, t2).unwrap();
	graph.add_graph_producer(t2).unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	for i in 0..50 {
		runtime.graph().produce(Num(i));
	}
	runtime.graph().finished_producing();

	let _ = collect_outputs(&runtime);
	runtime.wait();

	let profiles = runtime.task_profiles();
	assert_eq!(profiles.len(), 4);
	assert_eq!(
		profiles
			.iter()
			.filter(|p| p.task == TaskName::new("replicated"))
			.count(),
		3
	);
}
