//! Document-store traits.
//!
//! The nodes crate only ever talks to these traits, so the same executor
//! runs against a live MongoDB deployment ([`crate::mongo`]) or the
//! in-memory store ([`crate::memory`]).  Documents cross the boundary as
//! JSON objects; BSON conversion is the implementation's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DbError, MongoCredentials};

/// A document as seen by the workflow: a JSON object.
pub type JsonDocument = Map<String, Value>;

// ---------------------------------------------------------------------------
// Find
// ---------------------------------------------------------------------------

/// A `find` call with its cursor modifiers.
///
/// Modifiers are set builder-style in whatever order the caller chooses;
/// the server always evaluates them as sort, then skip, then limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: JsonDocument,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub sort: Option<JsonDocument>,
}

impl FindQuery {
    pub fn new(filter: JsonDocument) -> Self {
        Self { filter, ..Self::default() }
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, sort: JsonDocument) -> Self {
        self.sort = Some(sort);
        self
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// The modification applied by `update_one`.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateModel {
    /// An update-operator document such as `{ "$set": { .. } }`.
    Document(JsonDocument),
    /// An aggregation-pipeline style update.
    Pipeline(Vec<JsonDocument>),
}

/// Options accepted by `update_one`, decoded from the `updateOptions`
/// parameter.  Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_filters: Option<Vec<JsonDocument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_document_validation: Option<bool>,
}

/// Counters reported by `update_one` and `replace_one`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One named collection.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Run the query and materialize every matching document.
    async fn find(&self, query: FindQuery) -> Result<Vec<JsonDocument>, DbError>;

    /// Run the pipeline and materialize every resulting document.
    async fn aggregate(&self, pipeline: Vec<JsonDocument>) -> Result<Vec<JsonDocument>, DbError>;

    /// Insert all documents in one bulk write; returns the inserted count.
    async fn insert_many(&self, documents: Vec<JsonDocument>) -> Result<usize, DbError>;

    async fn update_one(
        &self,
        filter: JsonDocument,
        update: UpdateModel,
        settings: UpdateSettings,
    ) -> Result<WriteSummary, DbError>;

    async fn replace_one(
        &self,
        filter: JsonDocument,
        replacement: JsonDocument,
    ) -> Result<WriteSummary, DbError>;

    /// Delete the first matching document; returns the deleted count.
    async fn delete_one(&self, filter: JsonDocument) -> Result<u64, DbError>;
}

/// A connected database handle.
///
/// The handle is owned by exactly one node invocation and must be closed
/// by it once the batch has finished, whatever the result.
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    fn name(&self) -> &str;

    fn collection(&self, name: &str) -> Box<dyn DocumentCollection>;

    /// Release the underlying connection resources.
    async fn close(&self);
}

/// Yields a live database handle from credentials.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn connect(
        &self,
        credentials: &MongoCredentials,
    ) -> Result<Box<dyn DocumentDatabase>, DbError>;
}
