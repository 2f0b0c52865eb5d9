//! Thread spawning and orderly shutdown for one graph.

use std::{
	sync::{
		atomic::{AtomicBool, AtomicUsize},
		Arc, Condvar, Mutex,
	},
	thread::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
	comm::{Communicator, CommunicatorHandle},
	data::TaskData,
	graph::TaskGraph,
	task::TaskThreadProfile,
};

struct GateState {
	ready: usize,
	expected: usize,
}

/// Counts task threads through initialization so callers can wait for the
/// whole graph to be ready.
pub(crate) struct InitGate {
	state: Mutex<GateState>,
	condvar: Condvar,
}

impl InitGate {
	fn new(expected: usize) -> Self {
		Self {
			state: Mutex::new(GateState { ready: 0, expected }),
			condvar: Condvar::new(),
		}
	}

	/// One thread has finished initializing its task.
	pub fn thread_ready(&self) {
		let mut state = self.state.lock().unwrap();
		state.ready += 1;
		if state.ready >= state.expected {
			self.condvar.notify_all();
		}
	}

	/// Block until every thread has initialized.
	fn wait_ready(&self) {
		let mut state = self.state.lock().unwrap();
		while state.ready < state.expected {
			state = self.condvar.wait(state).unwrap();
		}
	}
}

/// Runs a [`TaskGraph`]: spawns one OS thread per task replica, keeps the
/// shared thread counter per replica group, and joins everything.
///
/// A root runtime also owns the communicator thread for its whole graph
/// hierarchy. Nested runtimes, spawned inside execution pipelines and
/// sub-graph wrappers, share the root's communicator.
pub struct Runtime<T: TaskData, U: TaskData> {
	graph: TaskGraph<T, U>,
	threads: Vec<JoinHandle<TaskThreadProfile>>,
	stop: Arc<AtomicBool>,
	init_gate: Option<Arc<InitGate>>,
	communicator: Option<Communicator>,
	profiles: Vec<TaskThreadProfile>,
	executed: bool,
}

impl<T: TaskData, U: TaskData> Runtime<T, U> {
	/// Take ownership of `graph`. Nothing runs until
	/// [`execute`](Runtime::execute).
	pub fn new(graph: TaskGraph<T, U>) -> Self {
		Self {
			graph,
			threads: Vec::new(),
			stop: Arc::new(AtomicBool::new(false)),
			init_gate: None,
			communicator: None,
			profiles: Vec::new(),
			executed: false,
		}
	}

	/// The graph this runtime owns. Produce input and consume output
	/// through this while the runtime runs.
	pub fn graph(&self) -> &TaskGraph<T, U> {
		&self.graph
	}

	/// Spawn every task thread. Returns once all threads are launched;
	/// they may still be initializing, see
	/// [`wait_for_initialization`](Runtime::wait_for_initialization).
	pub fn execute(&mut self) {
		if self.executed {
			return;
		}
		let communicator = Communicator::spawn();
		let handle = communicator.handle();
		self.communicator = Some(communicator);
		self.spawn_threads(Some(handle));
	}

	/// Spawn every task thread, sharing an enclosing runtime's
	/// communicator instead of owning one.
	pub(crate) fn execute_nested(&mut self, comm: Option<CommunicatorHandle>) {
		if self.executed {
			return;
		}
		self.spawn_threads(comm);
	}

	fn spawn_threads(&mut self, comm: Option<CommunicatorHandle>) {
		self.graph.initialize(comm.as_ref());

		let gate = Arc::new(InitGate::new(self.graph.thread_count()));
		self.init_gate = Some(gate.clone());

		let managers = self.graph.take_managers();
		debug!(
			message = "Spawning task threads",
			address = %self.graph.address(),
			tasks = managers.len(),
		);

		for manager in managers {
			let num_threads = manager.num_threads();
			let threads_remaining = Arc::new(AtomicUsize::new(num_threads));

			let mut replicas = Vec::with_capacity(num_threads);
			for thread_id in 1..num_threads {
				let mut replica = manager.copy_for_thread();
				replica.set_thread(thread_id, threads_remaining.clone());
				replicas.push(replica);
			}
			let mut first = manager;
			first.set_thread(0, threads_remaining.clone());
			replicas.insert(0, first);

			for mut replica in replicas {
				replica.set_stop_flag(self.stop.clone());
				replica.set_init_gate(gate.clone());

				let thread = std::thread::Builder::new()
					.name(replica.name().to_string())
					.spawn(move || replica.run())
					.unwrap();
				self.threads.push(thread);
			}
		}

		self.executed = true;
	}

	/// Block until every thread spawned by this runtime has finished
	/// initializing its task.
	pub fn wait_for_initialization(&self) {
		if let Some(gate) = &self.init_gate {
			gate.wait_ready();
		}
	}

	/// Mark every thread to exit after the item it is currently
	/// processing. Threads blocked waiting for input are not interrupted;
	/// polling tasks notice within one tick.
	pub fn terminate_all(&self) {
		self.stop
			.store(true, std::sync::atomic::Ordering::Relaxed);
	}

	/// Join every task thread, then stop the communicator.
	///
	/// Make sure the graph's input has been closed with
	/// [`TaskGraph::finished_producing`] first, or this blocks forever.
	pub fn wait(&mut self) {
		let joined = self.threads.len();
		for thread in self.threads.drain(..) {
			match thread.join() {
				Ok(profile) => self.profiles.push(profile),
				Err(_) => warn!(message = "A task thread panicked outside its body"),
			}
		}

		if let Some(mut communicator) = self.communicator.take() {
			communicator.terminate_gracefully();
		}

		if joined > 0 {
			info!(
				message = "Runtime finished",
				address = %self.graph.address(),
				threads = self.profiles.len(),
			);
		}
	}

	/// Per-thread profiles, available after [`wait`](Runtime::wait).
	pub fn task_profiles(&self) -> &[TaskThreadProfile] {
		&self.profiles
	}

	/// A handle onto this runtime's communicator, for producing data
	/// packets from outside the graph. `None` before
	/// [`execute`](Runtime::execute) and on nested runtimes.
	pub fn communicator(&self) -> Option<CommunicatorHandle> {
		self.communicator
			.as_ref()
			.map(|communicator| communicator.handle())
	}
}

impl<T: TaskData, U: TaskData> Drop for Runtime<T, U> {
	fn drop(&mut self) {
		self.wait();
	}
}
