//! `db` crate: pure persistence layer.
//!
//! Provides the document-store traits the nodes crate programs against, the
//! MongoDB implementation of those traits, credential resolution, and an
//! in-memory store for tests and dry runs.  No node logic lives here.

pub mod error;
pub mod credentials;
pub mod pool;
pub mod store;
pub mod mongo;
pub mod memory;
mod matcher;

pub use error::DbError;
pub use credentials::{MongoCredentials, ResolvedConnection};
pub use pool::MongoConnector;
pub use store::{
    ConnectionProvider, DocumentCollection, DocumentDatabase, FindQuery, JsonDocument,
    UpdateModel, UpdateSettings, WriteSummary,
};
pub use memory::{MemoryConnector, MemoryDatabase, StoreCall};
