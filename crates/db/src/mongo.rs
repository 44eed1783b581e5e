//! [`DocumentDatabase`] backed by the official MongoDB driver.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document};
use mongodb::options::{UpdateModifications, UpdateOptions};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use tracing::debug;

use crate::{
    DbError, DocumentCollection, DocumentDatabase, FindQuery, JsonDocument, UpdateModel,
    UpdateSettings, WriteSummary,
};

pub struct MongoDatabase {
    client: Client,
    database: Database,
}

impl MongoDatabase {
    pub fn new(client: Client, database: &str) -> Self {
        let database = client.database(database);
        Self { client, database }
    }
}

#[async_trait]
impl DocumentDatabase for MongoDatabase {
    fn name(&self) -> &str {
        self.database.name()
    }

    fn collection(&self, name: &str) -> Box<dyn DocumentCollection> {
        Box::new(MongoCollection {
            inner: self.database.collection::<Document>(name),
        })
    }

    async fn close(&self) {
        debug!("Shutting down MongoDB client");
        self.client.clone().shutdown().await;
    }
}

pub struct MongoCollection {
    inner: Collection<Document>,
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    async fn find(&self, query: FindQuery) -> Result<Vec<JsonDocument>, DbError> {
        let mut find = self.inner.find(to_document(query.filter)?);
        if let Some(skip) = query.skip {
            find = find.skip(skip);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit);
        }
        if let Some(sort) = query.sort {
            find = find.sort(to_document(sort)?);
        }

        let docs: Vec<Document> = find.await?.try_collect().await?;
        docs.into_iter().map(from_document).collect()
    }

    async fn aggregate(&self, pipeline: Vec<JsonDocument>) -> Result<Vec<JsonDocument>, DbError> {
        let stages = pipeline
            .into_iter()
            .map(to_document)
            .collect::<Result<Vec<_>, _>>()?;

        let docs: Vec<Document> = self.inner.aggregate(stages).await?.try_collect().await?;
        docs.into_iter().map(from_document).collect()
    }

    async fn insert_many(&self, documents: Vec<JsonDocument>) -> Result<usize, DbError> {
        let docs = documents
            .into_iter()
            .map(to_document)
            .collect::<Result<Vec<_>, _>>()?;

        let result = self.inner.insert_many(docs).await?;
        Ok(result.inserted_ids.len())
    }

    async fn update_one(
        &self,
        filter: JsonDocument,
        update: UpdateModel,
        settings: UpdateSettings,
    ) -> Result<WriteSummary, DbError> {
        let modifications = match update {
            UpdateModel::Document(doc) => UpdateModifications::Document(to_document(doc)?),
            UpdateModel::Pipeline(stages) => UpdateModifications::Pipeline(
                stages.into_iter().map(to_document).collect::<Result<_, _>>()?,
            ),
        };

        let mut options = UpdateOptions::default();
        options.upsert = settings.upsert;
        options.bypass_document_validation = settings.bypass_document_validation;
        options.array_filters = settings
            .array_filters
            .map(|filters| filters.into_iter().map(to_document).collect::<Result<_, _>>())
            .transpose()?;

        let result = self
            .inner
            .update_one(to_document(filter)?, modifications)
            .with_options(options)
            .await?;

        Ok(WriteSummary {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: result.upserted_id.is_some(),
        })
    }

    async fn replace_one(
        &self,
        filter: JsonDocument,
        replacement: JsonDocument,
    ) -> Result<WriteSummary, DbError> {
        let result = self
            .inner
            .replace_one(to_document(filter)?, to_document(replacement)?)
            .await?;

        Ok(WriteSummary {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: result.upserted_id.is_some(),
        })
    }

    async fn delete_one(&self, filter: JsonDocument) -> Result<u64, DbError> {
        let result = self.inner.delete_one(to_document(filter)?).await?;
        Ok(result.deleted_count)
    }
}

// ---------------------------------------------------------------------------
// JSON <-> BSON
// ---------------------------------------------------------------------------

/// Convert a JSON object into a BSON document, honouring extended JSON
/// such as `{ "$oid": ".." }` and `{ "$date": ".." }`.
pub fn to_document(json: JsonDocument) -> Result<Document, DbError> {
    let bson = Bson::try_from(Value::Object(json))
        .map_err(|e| DbError::Conversion(format!("JSON to BSON error: {e}")))?;

    match bson {
        Bson::Document(doc) => Ok(doc),
        other => Err(DbError::Conversion(format!(
            "expected a BSON document, got {:?}",
            other.element_type()
        ))),
    }
}

/// Convert a BSON document into relaxed extended JSON.
pub fn from_document(doc: Document) -> Result<JsonDocument, DbError> {
    match Bson::Document(doc).into_relaxed_extjson() {
        Value::Object(map) => Ok(map),
        other => Err(DbError::Conversion(format!(
            "BSON to JSON error: expected an object, got {other}"
        ))),
    }
}
