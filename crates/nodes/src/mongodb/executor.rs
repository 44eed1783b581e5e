//! Batch document-operation executor.
//!
//! `BatchOperationExecutor` is the heart of the MongoDB node:
//! 1. Dispatches on the operation kind (one handler per variant).
//! 2. Resolves each item's parameters right before that item's call.
//! 3. Awaits store calls strictly in item order.
//! 4. Accumulates one [`ResultBatch`].
//! 5. Applies the continue-on-failure policy to any error.

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use db::{DocumentDatabase, FindQuery, JsonDocument};

use crate::mongodb::params::{ItemParams, DOCUMENT, QUERY};
use crate::mongodb::{ExecutionOutcome, ExecutorError, OperationKind, ParameterResolver, ResultBatch};
use crate::Item;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Turn configuration and operation failures into a single
    /// `{ "error": .. }` record instead of returning them.
    pub continue_on_fail: bool,
}

// ---------------------------------------------------------------------------
// BatchOperationExecutor
// ---------------------------------------------------------------------------

/// Runs one operation over a batch of items against a connected database.
///
/// The executor neither opens nor closes the database; the caller owns the
/// handle for the duration of [`BatchOperationExecutor::execute`].
pub struct BatchOperationExecutor {
    config: ExecutorConfig,
}

impl BatchOperationExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run `operation` over `items`.
    ///
    /// There is no rollback: when item `k` fails, the writes of items
    /// `0..k` stay applied and only the reported result changes.
    ///
    /// # Errors
    /// Returns the failure unless continue-on-failure is set, in which case
    /// the outcome is [`ExecutionOutcome::Failure`].
    #[instrument(skip(self, items, params, database), fields(operation = %operation, items = items.len()))]
    pub async fn execute(
        &self,
        operation: OperationKind,
        items: &[Item],
        params: &dyn ParameterResolver,
        database: &dyn DocumentDatabase,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        info!("running {} over {} items", operation, items.len());

        let result = match operation {
            OperationKind::Update => self.update(items, params, database).await,
            OperationKind::Find => self.find(items, params, database).await,
            OperationKind::Aggregate => self.aggregate(items, params, database).await,
            OperationKind::Insert => self.insert(items, params, database).await,
            OperationKind::ReplaceOne => self.replace_one(items, params, database).await,
            OperationKind::DeleteOne => self.delete_one(items, params, database).await,
        };

        match result {
            Ok(batch) => {
                info!("{} succeeded", operation);
                Ok(ExecutionOutcome::Success(batch))
            }
            Err(err) => self.recover(err),
        }
    }

    /// Apply the continue-on-failure policy to an error raised while the
    /// batch was being processed.  Connection errors always propagate.
    pub fn recover(&self, err: ExecutorError) -> Result<ExecutionOutcome, ExecutorError> {
        if self.config.continue_on_fail && !matches!(err, ExecutorError::Connection(_)) {
            warn!("continuing after failure: {}", err);
            Ok(ExecutionOutcome::Failure { message: err.message() })
        } else {
            error!("batch failed: {}", err);
            Err(err)
        }
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    async fn update(
        &self,
        items: &[Item],
        params: &dyn ParameterResolver,
        database: &dyn DocumentDatabase,
    ) -> Result<ResultBatch, ExecutorError> {
        for i in 0..items.len() {
            let p = ItemParams::new(params, i);
            let filter = p.object(QUERY)?;
            let update = p.update()?;
            let settings = p.update_settings()?;
            let collection = p.collection()?;

            let summary = database
                .collection(&collection)
                .update_one(filter, update, settings)
                .await
                .map_err(|source| ExecutorError::operation(OperationKind::Update, Some(i), source))?;

            debug!(item = i, matched = summary.matched, modified = summary.modified, upserted = summary.upserted, "updated");
        }

        Ok(echo(items))
    }

    async fn find(
        &self,
        items: &[Item],
        params: &dyn ParameterResolver,
        database: &dyn DocumentDatabase,
    ) -> Result<ResultBatch, ExecutorError> {
        let mut rows = Vec::new();

        for i in 0..items.len() {
            let p = ItemParams::new(params, i);
            let collection = p.collection()?;
            let filter = p.object(QUERY)?;
            let options = p.query_options()?;

            // Fixed order: skip, limit, sort.
            let mut query = FindQuery::new(filter);
            if options.skip > 0 {
                query = query.skip(options.skip);
            }
            if options.limit > 0 {
                query = query.limit(i64::try_from(options.limit).unwrap_or(i64::MAX));
            }
            if let Some(sort) = options.sort {
                query = query.sort(sort);
            }

            let found = database
                .collection(&collection)
                .find(query)
                .await
                .map_err(|source| {
                    warn!(item = i, "find failed: {}", source);
                    ExecutorError::operation(OperationKind::Find, Some(i), source)
                })?;

            debug!(item = i, found = found.len(), "find");
            rows.extend(found.into_iter().map(Value::Object));
        }

        Ok(ResultBatch::rows(rows))
    }

    async fn aggregate(
        &self,
        items: &[Item],
        params: &dyn ParameterResolver,
        database: &dyn DocumentDatabase,
    ) -> Result<ResultBatch, ExecutorError> {
        let mut rows = Vec::new();

        for i in 0..items.len() {
            let p = ItemParams::new(params, i);
            let collection = p.collection()?;
            let mut pipeline = p.pipeline()?;
            let options = p.query_options()?;

            // Stages are appended in the order skip, limit, sort, so the
            // window is taken before the final sort.
            if options.skip > 0 {
                pipeline.push(stage("$skip", Value::from(options.skip)));
            }
            if options.limit > 0 {
                pipeline.push(stage("$limit", Value::from(options.limit)));
            }
            if let Some(sort) = options.sort {
                pipeline.push(stage("$sort", Value::Object(sort)));
            }

            let found = database
                .collection(&collection)
                .aggregate(pipeline)
                .await
                .map_err(|source| {
                    warn!(item = i, "aggregate failed: {}", source);
                    ExecutorError::operation(OperationKind::Aggregate, Some(i), source)
                })?;

            debug!(item = i, found = found.len(), "aggregate");
            rows.extend(found.into_iter().map(Value::Object));
        }

        Ok(ResultBatch::rows(rows))
    }

    /// One bulk write for the whole batch.  The collection name is read
    /// from the first item only; per-item collection values are ignored.
    async fn insert(
        &self,
        items: &[Item],
        params: &dyn ParameterResolver,
        database: &dyn DocumentDatabase,
    ) -> Result<ResultBatch, ExecutorError> {
        if items.is_empty() {
            return Ok(ResultBatch::Documents(Vec::new()));
        }

        let collection = ItemParams::new(params, 0).collection()?;
        let documents = (0..items.len())
            .map(|i| ItemParams::new(params, i).object(DOCUMENT))
            .collect::<Result<Vec<_>, _>>()?;

        let inserted = database
            .collection(&collection)
            .insert_many(documents.clone())
            .await
            .map_err(|source| ExecutorError::operation(OperationKind::Insert, None, source))?;

        debug!(collection = %collection, inserted, "insert");
        Ok(ResultBatch::Documents(documents.into_iter().map(Value::Object).collect()))
    }

    async fn replace_one(
        &self,
        items: &[Item],
        params: &dyn ParameterResolver,
        database: &dyn DocumentDatabase,
    ) -> Result<ResultBatch, ExecutorError> {
        let mut replaced = Vec::with_capacity(items.len());

        for i in 0..items.len() {
            let p = ItemParams::new(params, i);
            let collection = p.collection()?;
            let filter = p.object(QUERY)?;
            let document = p.object(DOCUMENT)?;

            let summary = database
                .collection(&collection)
                .replace_one(filter, document.clone())
                .await
                .map_err(|source| ExecutorError::operation(OperationKind::ReplaceOne, Some(i), source))?;

            debug!(item = i, matched = summary.matched, modified = summary.modified, "replaced");
            replaced.push(Value::Object(document));
        }

        Ok(ResultBatch::Documents(replaced))
    }

    async fn delete_one(
        &self,
        items: &[Item],
        params: &dyn ParameterResolver,
        database: &dyn DocumentDatabase,
    ) -> Result<ResultBatch, ExecutorError> {
        for i in 0..items.len() {
            let p = ItemParams::new(params, i);
            let collection = p.collection()?;
            let filter = p.object(QUERY)?;

            let deleted = database
                .collection(&collection)
                .delete_one(filter)
                .await
                .map_err(|source| ExecutorError::operation(OperationKind::DeleteOne, Some(i), source))?;

            debug!(item = i, deleted, "deleted");
        }

        Ok(echo(items))
    }
}

fn echo(items: &[Item]) -> ResultBatch {
    ResultBatch::Documents(items.iter().map(|item| item.json.clone()).collect())
}

fn stage(name: &str, body: Value) -> JsonDocument {
    let mut doc = JsonDocument::new();
    doc.insert(name.to_owned(), body);
    doc
}
