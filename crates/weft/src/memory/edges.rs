//! The per-task registry of attached memory edges.

use std::{any::Any, collections::HashMap, sync::Arc};

use super::data::PoolKind;
use crate::{edge::AnyConnector, labels::EdgeName};

/// One memory edge as seen from a task it is attached to.
#[derive(Clone)]
pub(crate) struct MemoryEdgeRef {
	pub kind: PoolKind,

	/// The manager's "get" channel, as `Arc<Connector<MemoryData<A>>>`.
	/// Present on the getter task only; downcast by the typed accessors
	/// on [`crate::task::TaskContext`].
	pub get: Option<Arc<dyn Any + Send + Sync>>,

	/// The manager's "release" channel, type-erased.
	/// Present on the releaser task; its producer count carries one slot
	/// for the releaser, closed when the releaser's last thread exits.
	pub release: Option<Arc<dyn AnyConnector>>,
}

/// The memory edges attached to one task, by name.
///
/// Names are unique per task; wiring rejects duplicates. Thread replicas of
/// a task share clones of this map, and the release-side close happens only
/// on the replica group's last thread.
pub(crate) type MemoryEdgeMap = HashMap<EdgeName, MemoryEdgeRef>;
