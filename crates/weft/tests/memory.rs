//! Memory edges: static, dynamic, and user-managed pools.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc, Mutex,
};

use weft::{
	data::TaskData,
	graph::TaskGraph,
	labels::TaskName,
	memory::{data::ReleaseAfterUses, MemoryAllocator, MemoryData, PoolKind},
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

/// Counts every allocation and free it performs.
struct CountingAlloc {
	allocs: Arc<AtomicUsize>,
	frees: Arc<AtomicUsize>,
	outstanding_peak: Arc<AtomicUsize>,
}

impl CountingAlloc {
	fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
		let allocs = Arc::new(AtomicUsize::new(0));
		let frees = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));
		(
			Self {
				allocs: allocs.clone(),
				frees: frees.clone(),
				outstanding_peak: peak.clone(),
			},
			allocs,
			frees,
			peak,
		)
	}
}

impl MemoryAllocator for CountingAlloc {
	type Memory = Vec<u8>;

	fn alloc(&self) -> Self::Memory {
		self.alloc_elems(self.size())
	}

	fn alloc_elems(&self, elems: usize) -> Self::Memory {
		let allocated = self.allocs.fetch_add(1, Ordering::SeqCst) + 1;
		let freed = self.frees.load(Ordering::SeqCst);
		let outstanding = allocated.saturating_sub(freed);
		self.outstanding_peak.fetch_max(outstanding, Ordering::SeqCst);
		vec![0; elems]
	}

	fn free(&self, memory: Self::Memory) {
		self.frees.fetch_add(1, Ordering::SeqCst);
		drop(memory);
	}

	fn size(&self) -> usize {
		64
	}
}

/// A value traveling with a memory handle attached.
struct Slab {
	value: u64,
	handle: Arc<MemoryData<CountingAlloc>>,
}

impl TaskData for Slab {}

/// Gets one handle per input value.
struct Getter {
	kind: PoolKind,
}

impl Task<Num, Slab> for Getter {
	fn execute(&mut self, data: Option<Arc<Num>>, ctx: &mut TaskContext<'_, Slab>) {
		let data = match data {
			Some(data) => data,
			None => return,
		};

		let handle = match self.kind {
			PoolKind::Static => {
				ctx.get_memory::<CountingAlloc>("scratch", Box::new(ReleaseAfterUses::new(1)))
			}
			PoolKind::Dynamic => ctx.get_dynamic_memory::<CountingAlloc>(
				"scratch",
				Box::new(ReleaseAfterUses::new(1)),
				(data.0 as usize) + 1,
			),
			PoolKind::UserManaged => ctx.get_user_managed_memory::<CountingAlloc>("scratch"),
		};

		let handle = match handle {
			Some(handle) => handle,
			None => return,
		};
		if self.kind == PoolKind::Static {
			assert!(handle.memory().is_some());
		}
		ctx.add_result(Slab {
			value: data.0,
			handle,
		});
	}

	fn copy(&self) -> Box<dyn Task<Num, Slab>> {
		Box::new(Self { kind: self.kind })
	}

	fn name(&self) -> TaskName {
		TaskName::new("getter")
	}
}

/// An intermediate hop, so handles are released two stages downstream.
struct Relay;

impl Task<Slab, Slab> for Relay {
	fn execute(&mut self, data: Option<Arc<Slab>>, ctx: &mut TaskContext<'_, Slab>) {
		if let Some(data) = data {
			ctx.add_result_arc(data);
		}
	}

	fn copy(&self) -> Box<dyn Task<Slab, Slab>> {
		Box::new(Relay)
	}

	fn name(&self) -> TaskName {
		TaskName::new("relay")
	}
}

/// Releases every handle it sees and forwards the value.
struct Releaser;

impl Task<Slab, Num> for Releaser {
	fn execute(&mut self, data: Option<Arc<Slab>>, ctx: &mut TaskContext<'_, Num>) {
		if let Some(data) = data {
			ctx.release_memory(data.handle.clone());
			ctx.add_result(Num(data.value));
		}
	}

	fn copy(&self) -> Box<dyn Task<Slab, Num>> {
		Box::new(Releaser)
	}

	fn name(&self) -> TaskName {
		TaskName::new("releaser")
	}
}

fn run_memory_graph(kind: PoolKind, pool_size: usize, items: u64) -> (Vec<u64>, CountingStats) {
	let (alloc, allocs, frees, peak) = CountingAlloc::new();

	let mut graph = TaskGraph::<Num, Num>::new();
	let getter = graph.add_task(Getter { kind });
	let relay = graph.add_task(Relay);
	let releaser = graph.add_task(Releaser);

	graph.set_graph_consumer(getter).unwrap();
	graph.add_edge(getter, relay).unwrap();
	graph.add_edge(relay, releaser).unwrap();
	graph.add_graph_producer(releaser).unwrap();
	graph
		.add_memory_edge("scratch", getter, releaser, alloc, pool_size, kind)
		.unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	for i in 0..items {
		runtime.graph().produce(Num(i));
	}
	runtime.graph().finished_producing();

	let mut out = Vec::new();
	while !runtime.graph().is_output_terminated() {
		if let Some(data) = runtime.graph().consume() {
			out.push(data.0);
		}
	}
	runtime.wait();

	(
		out,
		CountingStats {
			allocs: allocs.load(Ordering::SeqCst),
			frees: frees.load(Ordering::SeqCst),
			peak: peak.load(Ordering::SeqCst),
		},
	)
}

struct CountingStats {
	allocs: usize,
	frees: usize,
	peak: usize,
}

#[test]
fn static_pool_conserves_memory() {
	init_logging();

	let (out, stats) = run_memory_graph(PoolKind::Static, 4, 100);

	assert_eq!(out, (0..100).collect::<Vec<u64>>());

	// Pool size many allocations up front, all reclaimed at shutdown
	assert_eq!(stats.allocs, 4);
	assert_eq!(stats.frees, 4);
	assert_eq!(stats.peak, 4);
}

#[test]
fn dynamic_pool_allocates_per_get() {
	init_logging();

	let (out, stats) = run_memory_graph(PoolKind::Dynamic, 4, 50);

	assert_eq!(out, (0..50).collect::<Vec<u64>>());

	// One allocation per handle get, freed as each handle came home; at
	// most pool-size allocations were ever live
	assert_eq!(stats.allocs, 50);
	assert_eq!(stats.frees, 50);
	assert!(stats.peak <= 4);
}

#[test]
fn user_managed_pool_only_throttles() {
	init_logging();

	let (out, stats) = run_memory_graph(PoolKind::UserManaged, 2, 30);

	assert_eq!(out, (0..30).collect::<Vec<u64>>());

	// Sentinel handles never touch the allocator
	assert_eq!(stats.allocs, 0);
	assert_eq!(stats.frees, 0);
}

#[test]
fn getter_blocks_until_handles_come_home() {
	init_logging();

	// With a pool of 1 the getter cannot run ahead: every value must
	// complete the full get -> relay -> release cycle before the next
	// one starts, so output order is the input order even though three
	// tasks run concurrently.
	let (out, stats) = run_memory_graph(PoolKind::Static, 1, 20);

	assert_eq!(out, (0..20).collect::<Vec<u64>>());
	assert_eq!(stats.allocs, 1);
	assert_eq!(stats.frees, 1);
	assert_eq!(stats.peak, 1);
}

#[test]
fn release_rule_with_multiple_uses() {
	init_logging();

	// A handle released after two uses: send it home twice.
	struct DoubleReleaser {
		seen: Arc<Mutex<Vec<u64>>>,
	}
	impl Task<Slab, Num> for DoubleReleaser {
		fn execute(&mut self, data: Option<Arc<Slab>>, ctx: &mut TaskContext<'_, Num>) {
			if let Some(data) = data {
				self.seen.lock().unwrap().push(data.value);
				ctx.release_memory(data.handle.clone());
				ctx.release_memory(data.handle.clone());
				ctx.add_result(Num(data.value));
			}
		}

		fn copy(&self) -> Box<dyn Task<Slab, Num>> {
			Box::new(Self {
				seen: self.seen.clone(),
			})
		}

		fn name(&self) -> TaskName {
			TaskName::new("double-releaser")
		}
	}

	struct DoubleGetter;
	impl Task<Num, Slab> for DoubleGetter {
		fn execute(&mut self, data: Option<Arc<Num>>, ctx: &mut TaskContext<'_, Slab>) {
			if let Some(data) = data {
				let handle = ctx
					.get_memory::<CountingAlloc>("scratch", Box::new(ReleaseAfterUses::new(2)))
					.unwrap();
				ctx.add_result(Slab {
					value: data.0,
					handle,
				});
			}
		}

		fn copy(&self) -> Box<dyn Task<Num, Slab>> {
			Box::new(DoubleGetter)
		}

		fn name(&self) -> TaskName {
			TaskName::new("double-getter")
		}
	}

	let (alloc, allocs, frees, _peak) = CountingAlloc::new();
	let seen = Arc::new(Mutex::new(Vec::new()));

	let mut graph = TaskGraph::<Num, Num>::new();
	let getter = graph.add_task(DoubleGetter);
	let releaser = graph.add_task(DoubleReleaser { seen: seen.clone() });

	graph.set_graph_consumer(getter).unwrap();
	graph.add_edge(getter, releaser).unwrap();
	graph.add_graph_producer(releaser).unwrap();
	graph
		.add_memory_edge("scratch", getter, releaser, alloc, 2, PoolKind::Static)
		.unwrap();

	let mut runtime = Runtime::new(graph);
	runtime.execute();
	for i in 0..10 {
		runtime.graph().produce(Num(i));
	}
	runtime.graph().finished_producing();

	let mut out = Vec::new();
	while !runtime.graph().is_output_terminated() {
		if let Some(data) = runtime.graph().consume() {
			out.push(data.0);
		}
	}
	runtime.wait();

	assert_eq!(out, (0..10).collect::<Vec<u64>>());
	assert_eq!(seen.lock().unwrap().len(), 10);
	assert_eq!(allocs.load(Ordering::SeqCst), 2);
	assert_eq!(frees.load(Ordering::SeqCst), 2);
}
