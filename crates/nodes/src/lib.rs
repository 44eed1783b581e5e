//! `nodes` crate: the `ExecutableNode` trait and built-in node implementations.
//!
//! Every node must implement [`ExecutableNode`].  The host dispatches
//! execution through this trait object.

pub mod error;
pub mod traits;
pub mod mongodb;

pub use error::NodeError;
pub use traits::{ExecutableNode, ExecutionContext, Item, OutputItem};
pub use mongodb::MongoDbOperationsNode;
