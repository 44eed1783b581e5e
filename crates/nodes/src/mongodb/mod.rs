//! MongoDB operations node.
//!
//! Runs one of six document operations over a batch of items:
//!
//! | operation    | store calls                 | output                          |
//! |--------------|-----------------------------|---------------------------------|
//! | `find`       | one `find` per item         | all matches, or `{}` when none  |
//! | `aggregate`  | one `aggregate` per item    | all results, or `{}` when none  |
//! | `insert`     | one `insertMany` per batch  | the submitted documents         |
//! | `update`     | one `updateOne` per item    | the input items                 |
//! | `replaceOne` | one `replaceOne` per item   | the submitted replacements      |
//! | `deleteOne`  | one `deleteOne` per item    | the input items                 |
//!
//! Items are processed strictly one after another.  A failure aborts the
//! batch; with continue-on-failure set the whole output becomes a single
//! `{ "error": .. }` record.  Writes applied before the failure stay applied.

pub mod error;
pub mod operation;
pub mod options;
pub mod params;
pub mod outcome;
pub mod request;
pub mod executor;
pub mod packager;
pub mod node;

pub use error::ExecutorError;
pub use executor::{BatchOperationExecutor, ExecutorConfig};
pub use node::MongoDbOperationsNode;
pub use operation::OperationKind;
pub use options::QueryOptions;
pub use outcome::{ExecutionOutcome, ResultBatch};
pub use packager::package;
pub use params::{resolve_operation, NodeParameters, ParameterResolver};
pub use request::{plan, OperationRequest};

#[cfg(test)]
mod executor_tests;
