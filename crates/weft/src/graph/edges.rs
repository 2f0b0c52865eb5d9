//! Edge descriptors: recorded wiring operations.
//!
//! Every add-edge call on a [`super::TaskGraph`] records a descriptor as
//! well as applying it to the live graph. Copying a graph replays the
//! descriptors, in their original order, against the copied tasks; that is
//! what keeps copies isomorphic without sharing any queues.

use std::{any::Any, cell::Cell, sync::Arc};

use super::graph::{GraphCore, TaskHandle};
use crate::{
	bookkeeper::{bookkeeper::Bookkeeper, manager::RuleManager, rule::SharedRule},
	data::{AsAny, TaskData, VoidData},
	edge::{AnyConnector, Connector, EdgeConfig},
	errors::GraphError,
	labels::EdgeName,
	memory::{
		data::{MemoryData, PoolKind},
		edges::MemoryEdgeRef,
		manager::MemoryManager,
		MemoryAllocator,
	},
	task::manager::{AnyTaskManager, TaskManager},
};

/// One recorded wiring operation.
pub(crate) trait EdgeDescriptor: Send {
	/// Apply this edge to a graph. Called once when the edge is added and
	/// once per graph copy.
	fn apply(&self, core: &mut GraphCore) -> Result<(), GraphError>;

	/// Clone this descriptor for a graph copy. Task handles stay valid
	/// because copies keep task order; shared rule and allocator handles
	/// are shared intentionally.
	fn clone_box(&self) -> Box<dyn EdgeDescriptor>;
}

/// `producer`'s output becomes `consumer`'s input.
pub(crate) struct ProducerConsumerEdge<PIn: TaskData, Mid: TaskData, COut: TaskData> {
	pub producer: TaskHandle<PIn, Mid>,
	pub consumer: TaskHandle<Mid, COut>,
	pub config: EdgeConfig<Mid>,
}

impl<PIn: TaskData, Mid: TaskData, COut: TaskData> EdgeDescriptor
	for ProducerConsumerEdge<PIn, Mid, COut>
{
	fn apply(&self, core: &mut GraphCore) -> Result<(), GraphError> {
		// Resolve both ends before mutating anything
		core.manager_mut::<PIn, Mid>(self.producer.index)?;
		let consumer = core.manager_mut::<Mid, COut>(self.consumer.index)?;

		// A consumer fed by several producers shares one input edge; the
		// first edge to reach it decides the queue configuration
		let connector = match consumer.input() {
			Some(connector) => connector,
			None => {
				let connector = Arc::new(Connector::new(self.config.clone()));
				consumer.set_input(connector.clone());
				connector
			}
		};
		connector.increment_producers();

		let producer = core.manager_mut::<PIn, Mid>(self.producer.index)?;
		producer.set_output(connector);
		Ok(())
	}

	fn clone_box(&self) -> Box<dyn EdgeDescriptor> {
		Box::new(Self {
			producer: self.producer,
			consumer: self.consumer,
			config: self.config.clone(),
		})
	}
}

/// A rule manager wired from a bookkeeper to `consumer`.
pub(crate) struct RuleEdge<BIn: TaskData, Mid: TaskData, COut: TaskData> {
	pub bookkeeper: usize,
	pub rule: SharedRule<BIn, Mid>,
	pub consumer: TaskHandle<Mid, COut>,
	pub config: EdgeConfig<Mid>,
}

impl<BIn: TaskData, Mid: TaskData, COut: TaskData> RuleEdge<BIn, Mid, COut> {
	fn bookkeeper_mut<'a>(
		&self,
		core: &'a mut GraphCore,
	) -> Result<&'a mut Bookkeeper<BIn>, GraphError> {
		let manager = core.manager_mut::<BIn, VoidData>(self.bookkeeper)?;
		manager
			.task_mut()
			.as_any_mut()
			.downcast_mut::<Bookkeeper<BIn>>()
			.ok_or(GraphError::UnknownTask)
	}
}

impl<BIn: TaskData, Mid: TaskData, COut: TaskData> EdgeDescriptor for RuleEdge<BIn, Mid, COut> {
	fn apply(&self, core: &mut GraphCore) -> Result<(), GraphError> {
		// Resolve both ends before mutating anything
		self.bookkeeper_mut(core)?;
		let consumer = core.manager_mut::<Mid, COut>(self.consumer.index)?;

		let connector = match consumer.input() {
			Some(connector) => connector,
			None => {
				let connector = Arc::new(Connector::new(self.config.clone()));
				consumer.set_input(connector.clone());
				connector
			}
		};
		connector.increment_producers();

		let rule_manager = RuleManager::new(self.rule.clone(), connector, core.pipeline_id);
		self.bookkeeper_mut(core)
			.unwrap()
			.add_rule_manager(Box::new(rule_manager));
		Ok(())
	}

	fn clone_box(&self) -> Box<dyn EdgeDescriptor> {
		Box::new(Self {
			bookkeeper: self.bookkeeper,
			rule: self.rule.clone(),
			consumer: self.consumer,
			config: self.config.clone(),
		})
	}
}

/// A memory manager task plus its "get" and "release" channels, attached
/// to a getter and a releaser task.
pub(crate) struct MemoryEdge<
	GIn: TaskData,
	GOut: TaskData,
	RIn: TaskData,
	ROut: TaskData,
	A: MemoryAllocator,
> {
	pub name: EdgeName,
	pub getter: TaskHandle<GIn, GOut>,
	pub releaser: TaskHandle<RIn, ROut>,
	pub allocator: Arc<A>,
	pub pool_size: usize,
	pub kind: PoolKind,

	/// Where the manager task landed in the task list. Graph copies carry
	/// the manager at the same index, so re-applying rewires it instead
	/// of creating a second one.
	pub manager_index: Cell<Option<usize>>,
}

impl<GIn: TaskData, GOut: TaskData, RIn: TaskData, ROut: TaskData, A: MemoryAllocator>
	EdgeDescriptor for MemoryEdge<GIn, GOut, RIn, ROut, A>
{
	fn apply(&self, core: &mut GraphCore) -> Result<(), GraphError> {
		let same_task = self.getter.index == self.releaser.index;

		// Resolve both ends and reject duplicate names before mutating
		let getter = core.manager_mut::<GIn, GOut>(self.getter.index)?;
		if getter.has_memory_edge(&self.name) {
			return Err(GraphError::DuplicateMemoryEdge {
				name: self.name.clone(),
				task: getter.name(),
			});
		}
		let releaser = core.manager_mut::<RIn, ROut>(self.releaser.index)?;
		if !same_task && releaser.has_memory_edge(&self.name) {
			return Err(GraphError::DuplicateMemoryEdge {
				name: self.name.clone(),
				task: releaser.name(),
			});
		}

		// The get channel is bounded by the pool size; the manager is its
		// one producer. The release channel's producer slot belongs to
		// the releaser task and closes when its replica group exits.
		let get_connector: Arc<Connector<MemoryData<A>>> =
			Arc::new(Connector::new(EdgeConfig::fifo().bounded(self.pool_size)));
		let release_connector: Arc<Connector<MemoryData<A>>> =
			Arc::new(Connector::new(EdgeConfig::fifo()));
		get_connector.increment_producers();
		release_connector.increment_producers();

		let get_erased: Arc<dyn Any + Send + Sync> = get_connector.clone();
		let release_erased: Arc<dyn AnyConnector> = release_connector.clone();

		if same_task {
			let getter = core.manager_mut::<GIn, GOut>(self.getter.index)?;
			getter.attach_memory_edge(
				self.name.clone(),
				MemoryEdgeRef {
					kind: self.kind,
					get: Some(get_erased),
					release: Some(release_erased),
				},
			)?;
		} else {
			let getter = core.manager_mut::<GIn, GOut>(self.getter.index)?;
			getter.attach_memory_edge(
				self.name.clone(),
				MemoryEdgeRef {
					kind: self.kind,
					get: Some(get_erased),
					release: None,
				},
			)?;

			let releaser = core.manager_mut::<RIn, ROut>(self.releaser.index)?;
			releaser.attach_memory_edge(
				self.name.clone(),
				MemoryEdgeRef {
					kind: self.kind,
					get: None,
					release: Some(release_erased),
				},
			)?;
		}

		let mut manager_index = self.manager_index.get();
		if let Some(index) = manager_index {
			if core
				.manager_mut::<MemoryData<A>, MemoryData<A>>(index)
				.is_err()
			{
				manager_index = None;
			}
		}
		let manager_index = match manager_index {
			Some(index) => index,
			None => {
				let manager_task = MemoryManager::new(
					self.name.clone(),
					self.pool_size,
					self.allocator.clone(),
					self.kind,
				);
				let index = core.managers.len();
				core.managers
					.push(Box::new(TaskManager::<MemoryData<A>, MemoryData<A>>::new(
						Box::new(manager_task),
						core.pipeline_id,
						core.num_pipelines,
						core.address.clone(),
					)));
				self.manager_index.set(Some(index));
				index
			}
		};

		let manager = core
			.manager_mut::<MemoryData<A>, MemoryData<A>>(manager_index)
			.unwrap();
		manager.set_input(release_connector);
		manager.set_output(get_connector);

		Ok(())
	}

	fn clone_box(&self) -> Box<dyn EdgeDescriptor> {
		Box::new(Self {
			name: self.name.clone(),
			getter: self.getter,
			releaser: self.releaser,
			allocator: self.allocator.clone(),
			pool_size: self.pool_size,
			kind: self.kind,
			manager_index: self.manager_index.clone(),
		})
	}
}
