//! The MongoDB operations node: connection scope around the executor.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, instrument};

use db::{ConnectionProvider, MongoConnector, MongoCredentials};

use crate::mongodb::{
    package, resolve_operation, BatchOperationExecutor, ExecutionOutcome, ExecutorConfig,
    ExecutorError, NodeParameters,
};
use crate::{ExecutableNode, ExecutionContext, Item, NodeError, OutputItem};

pub struct MongoDbOperationsNode {
    connector: Arc<dyn ConnectionProvider>,
}

impl MongoDbOperationsNode {
    pub fn new(connector: Arc<dyn ConnectionProvider>) -> Self {
        Self { connector }
    }

    /// A node connecting to real deployments with default client settings.
    pub fn with_mongo() -> Self {
        Self::new(Arc::new(MongoConnector::default()))
    }

    /// Connect, run the batch, and close the connection.
    ///
    /// The connection is closed exactly once on every path out of the
    /// batch: success, a returned failure, or a panic, which is resumed
    /// once the handle is released.  Connection errors are returned as is:
    /// there is nothing to close.
    #[instrument(skip_all, fields(execution_id = %ctx.execution_id, items = items.len()))]
    pub async fn run(
        &self,
        items: &[Item],
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let credentials =
            MongoCredentials::from_secrets(&ctx.secrets).map_err(ExecutorError::Connection)?;
        let database = self
            .connector
            .connect(&credentials)
            .await
            .map_err(ExecutorError::Connection)?;
        info!("connected to database '{}'", database.name());

        let params = NodeParameters::new(ctx.parameters.clone(), items);
        let executor = BatchOperationExecutor::new(ExecutorConfig {
            continue_on_fail: ctx.continue_on_fail,
        });

        let dispatch = async {
            match resolve_operation(&params) {
                Ok(operation) => executor.execute(operation, items, &params, database.as_ref()).await,
                Err(err) => executor.recover(err),
            }
        };
        let outcome = AssertUnwindSafe(dispatch).catch_unwind().await;

        database.close().await;
        match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                error!("batch panicked, connection released");
                panic::resume_unwind(payload)
            }
        }
    }
}

#[async_trait]
impl ExecutableNode for MongoDbOperationsNode {
    async fn execute(
        &self,
        items: Vec<Item>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<OutputItem>, NodeError> {
        let outcome = self.run(&items, ctx).await?;
        Ok(package(outcome, items.len()))
    }
}
