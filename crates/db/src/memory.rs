//! `MemoryDatabase`: an in-process test double for [`DocumentDatabase`].
//!
//! Useful in unit tests and dry runs where a MongoDB deployment is either
//! unavailable or irrelevant.  Every call is recorded, failures can be
//! injected at a given call position, and closes are counted so tests can
//! assert the connection was released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::matcher::{apply_pipeline_update, apply_update, matches, single_stage, sort_documents};
use crate::{
    ConnectionProvider, DbError, DocumentCollection, DocumentDatabase, FindQuery, JsonDocument,
    MongoCredentials, UpdateModel, UpdateSettings, WriteSummary,
};

/// One recorded store call, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Find { collection: String, query: FindQuery },
    Aggregate { collection: String, pipeline: Vec<JsonDocument> },
    InsertMany { collection: String, documents: Vec<JsonDocument> },
    UpdateOne { collection: String, filter: JsonDocument, update: UpdateModel },
    ReplaceOne { collection: String, filter: JsonDocument, replacement: JsonDocument },
    DeleteOne { collection: String, filter: JsonDocument },
}

#[derive(Default)]
struct State {
    collections: HashMap<String, Vec<JsonDocument>>,
    calls: Vec<StoreCall>,
    /// Call position → error message.
    failures: HashMap<usize, String>,
    closes: usize,
}

/// Shared in-memory database.  Clones share the same state.
#[derive(Clone)]
pub struct MemoryDatabase {
    name: String,
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append documents to a collection.  Non-object values are skipped.
    pub fn seed(&self, collection: &str, documents: impl IntoIterator<Item = Value>) {
        let mut state = self.state();
        let target = state.collections.entry(collection.to_owned()).or_default();
        target.extend(documents.into_iter().filter_map(|doc| match doc {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }

    /// Current contents of a collection, in storage order.
    pub fn documents(&self, collection: &str) -> Vec<JsonDocument> {
        self.state().collections.get(collection).cloned().unwrap_or_default()
    }

    /// All calls received so far, in call order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Number of times [`DocumentDatabase::close`] was called.
    pub fn close_count(&self) -> usize {
        self.state().closes
    }

    /// Make the call at zero-based position `call_index` fail with `message`.
    /// The call is still recorded; it just has no effect.
    pub fn fail_call(&self, call_index: usize, message: impl Into<String>) {
        self.state().failures.insert(call_index, message.into());
    }

    /// Record a call and report whether it was scheduled to fail.
    fn record(&self, call: StoreCall) -> Result<MutexGuard<'_, State>, DbError> {
        let mut state = self.state();
        let position = state.calls.len();
        state.calls.push(call);
        match state.failures.remove(&position) {
            Some(message) => Err(DbError::Query(message)),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Box<dyn DocumentCollection> {
        Box::new(MemoryCollection {
            name: name.to_owned(),
            database: self.clone(),
        })
    }

    async fn close(&self) {
        self.state().closes += 1;
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

pub struct MemoryCollection {
    name: String,
    database: MemoryDatabase,
}

impl MemoryCollection {
    fn filtered(docs: &[JsonDocument], filter: &JsonDocument) -> Result<Vec<JsonDocument>, DbError> {
        let mut out = Vec::new();
        for doc in docs {
            if matches(doc, filter)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }

    fn first_match(docs: &[JsonDocument], filter: &JsonDocument) -> Result<Option<usize>, DbError> {
        for (i, doc) in docs.iter().enumerate() {
            if matches(doc, filter)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    async fn find(&self, query: FindQuery) -> Result<Vec<JsonDocument>, DbError> {
        let state = self.database.record(StoreCall::Find {
            collection: self.name.clone(),
            query: query.clone(),
        })?;
        let docs = state.collections.get(&self.name).map(Vec::as_slice).unwrap_or_default();

        // Server semantics: sort, then skip, then limit.
        let mut found = Self::filtered(docs, &query.filter)?;
        if let Some(sort) = &query.sort {
            sort_documents(&mut found, sort)?;
        }
        let skip = query.skip.unwrap_or(0) as usize;
        let limit = match query.limit.map(i64::unsigned_abs) {
            Some(0) | None => usize::MAX,
            Some(n) => n as usize,
        };
        Ok(found.into_iter().skip(skip).take(limit).collect())
    }

    async fn aggregate(&self, pipeline: Vec<JsonDocument>) -> Result<Vec<JsonDocument>, DbError> {
        let state = self.database.record(StoreCall::Aggregate {
            collection: self.name.clone(),
            pipeline: pipeline.clone(),
        })?;
        let mut docs = state.collections.get(&self.name).cloned().unwrap_or_default();
        drop(state);

        for stage in &pipeline {
            docs = match single_stage(stage)? {
                ("$match", Value::Object(filter)) => Self::filtered(&docs, filter)?,
                ("$sort", Value::Object(spec)) => {
                    sort_documents(&mut docs, spec)?;
                    docs
                }
                ("$skip", n) => {
                    let n = non_negative(n, "$skip")?;
                    docs.into_iter().skip(n).collect()
                }
                ("$limit", n) => match non_negative(n, "$limit")? {
                    0 => return Err(DbError::Query("the limit must be positive".into())),
                    n => docs.into_iter().take(n).collect(),
                },
                ("$count", Value::String(field)) => {
                    let mut counted = JsonDocument::new();
                    counted.insert(field.clone(), Value::from(docs.len()));
                    vec![counted]
                }
                (name @ ("$match" | "$sort" | "$count"), _) => {
                    return Err(DbError::Query(format!("the {name} stage has an invalid specification")))
                }
                (name, _) => {
                    return Err(DbError::Query(format!("Unrecognized pipeline stage name: '{name}'")))
                }
            };
        }
        Ok(docs)
    }

    async fn insert_many(&self, documents: Vec<JsonDocument>) -> Result<usize, DbError> {
        let mut state = self.database.record(StoreCall::InsertMany {
            collection: self.name.clone(),
            documents: documents.clone(),
        })?;
        let count = documents.len();
        state.collections.entry(self.name.clone()).or_default().extend(documents);
        Ok(count)
    }

    async fn update_one(
        &self,
        filter: JsonDocument,
        update: UpdateModel,
        settings: UpdateSettings,
    ) -> Result<WriteSummary, DbError> {
        let mut state = self.database.record(StoreCall::UpdateOne {
            collection: self.name.clone(),
            filter: filter.clone(),
            update: update.clone(),
        })?;
        let docs = state.collections.entry(self.name.clone()).or_default();

        let apply = |doc: &mut JsonDocument| match &update {
            UpdateModel::Document(ops) => apply_update(doc, ops),
            UpdateModel::Pipeline(stages) => apply_pipeline_update(doc, stages),
        };

        match Self::first_match(docs, &filter)? {
            Some(i) => {
                let mut updated = docs[i].clone();
                let modified = apply(&mut updated)?;
                docs[i] = updated;
                Ok(WriteSummary { matched: 1, modified: u64::from(modified), upserted: false })
            }
            None if settings.upsert == Some(true) => {
                let mut seeded: JsonDocument = filter
                    .iter()
                    .filter(|(k, v)| !k.starts_with('$') && !v.is_object())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                apply(&mut seeded)?;
                docs.push(seeded);
                Ok(WriteSummary { matched: 0, modified: 0, upserted: true })
            }
            None => Ok(WriteSummary::default()),
        }
    }

    async fn replace_one(
        &self,
        filter: JsonDocument,
        replacement: JsonDocument,
    ) -> Result<WriteSummary, DbError> {
        if replacement.keys().any(|k| k.starts_with('$')) {
            return Err(DbError::Query("Replacement document must not contain atomic operators".into()));
        }
        let mut state = self.database.record(StoreCall::ReplaceOne {
            collection: self.name.clone(),
            filter: filter.clone(),
            replacement: replacement.clone(),
        })?;
        let docs = state.collections.entry(self.name.clone()).or_default();

        match Self::first_match(docs, &filter)? {
            Some(i) => {
                let mut next = replacement;
                if let Some(id) = docs[i].get("_id") {
                    next.insert("_id".into(), id.clone());
                }
                let modified = docs[i] != next;
                docs[i] = next;
                Ok(WriteSummary { matched: 1, modified: u64::from(modified), upserted: false })
            }
            None => Ok(WriteSummary::default()),
        }
    }

    async fn delete_one(&self, filter: JsonDocument) -> Result<u64, DbError> {
        let mut state = self.database.record(StoreCall::DeleteOne {
            collection: self.name.clone(),
            filter: filter.clone(),
        })?;
        let docs = state.collections.entry(self.name.clone()).or_default();

        match Self::first_match(docs, &filter)? {
            Some(i) => {
                docs.remove(i);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

fn non_negative(value: &Value, stage: &str) -> Result<usize, DbError> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| DbError::Query(format!("invalid argument to {stage} stage: {value}")))
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Hands out the same [`MemoryDatabase`] on every connect, or fails as if
/// the host were unreachable.
#[derive(Clone)]
pub struct MemoryConnector {
    database: MemoryDatabase,
    unreachable: Option<String>,
}

impl MemoryConnector {
    pub fn new(database: MemoryDatabase) -> Self {
        Self { database, unreachable: None }
    }

    /// A connector whose every connect attempt fails with `message`.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            database: MemoryDatabase::new("unreachable"),
            unreachable: Some(message.into()),
        }
    }
}

#[async_trait]
impl ConnectionProvider for MemoryConnector {
    async fn connect(
        &self,
        credentials: &MongoCredentials,
    ) -> Result<Box<dyn DocumentDatabase>, DbError> {
        credentials.resolve()?;
        if let Some(message) = &self.unreachable {
            return Err(DbError::Unreachable(message.clone()));
        }
        Ok(Box::new(self.database.clone()))
    }
}
