//! Typed edges between tasks.
//!
//! An edge is a [`connector::Connector`]: a blocking multi-producer,
//! multi-consumer queue with producer accounting. The queue behind it is
//! configured per edge with a [`queue::EdgeConfig`].

pub mod connector;
pub mod queue;

pub use connector::{AnyConnector, Connector};
pub use queue::{EdgeConfig, EdgeOrdering};
