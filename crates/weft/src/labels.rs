//! Identifier types for tasks, memory edges, and graphs.

use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};
use std::fmt::Display;

/// A task's name.
///
/// Names are not required to be unique; the pair (graph address, task name)
/// is what the communicator routes by, and duplicate pairs are reported
/// when the graph initializes.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct TaskName {
	x: SmartString<LazyCompact>,
}

impl TaskName {
	/// Make a new task name
	pub fn new(name: &str) -> Self {
		Self { x: name.into() }
	}

	/// Get the name
	pub fn name(&self) -> &SmartString<LazyCompact> {
		&self.x
	}
}

impl Display for TaskName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.x.fmt(f)
	}
}

impl From<String> for TaskName {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

impl From<&str> for TaskName {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// A memory edge's name, unique among the memory edges attached to any one
/// task.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EdgeName {
	x: SmartString<LazyCompact>,
}

impl EdgeName {
	/// Make a new edge name
	pub fn new(name: &str) -> Self {
		Self { x: name.into() }
	}

	/// Get the name
	pub fn name(&self) -> &SmartString<LazyCompact> {
		&self.x
	}
}

impl Display for EdgeName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.x.fmt(f)
	}
}

impl From<String> for EdgeName {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

impl From<&str> for EdgeName {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// The hierarchical address of a graph.
///
/// The root graph is `"0"`. Replica `i` of a sub-graph owned by a graph
/// with address `A` is addressed `A:i`. Every task inherits the address of
/// the graph that owns it.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct GraphAddress {
	x: SmartString<LazyCompact>,
}

impl GraphAddress {
	/// The address of a root graph.
	pub fn root() -> Self {
		Self { x: "0".into() }
	}

	/// The address of pipeline replica `pipeline_id` spawned under this
	/// address.
	pub fn child(&self, pipeline_id: usize) -> Self {
		use std::fmt::Write;
		let mut x = self.x.clone();
		let _ = write!(x, ":{pipeline_id}");
		Self { x }
	}

	/// Get the address
	pub fn address(&self) -> &SmartString<LazyCompact> {
		&self.x
	}
}

impl Display for GraphAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.x.fmt(f)
	}
}

impl From<&str> for GraphAddress {
	fn from(value: &str) -> Self {
		Self { x: value.into() }
	}
}
