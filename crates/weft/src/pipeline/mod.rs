//! Horizontal replication of a whole sub-graph.

pub mod decomposition;
#[allow(clippy::module_inception)]
pub mod pipeline;

pub use decomposition::{DecompositionRule, PipelineInputs};
pub use pipeline::ExecutionPipeline;
