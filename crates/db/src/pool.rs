//! MongoDB client bootstrap.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::Client;
use tracing::{info, instrument};

use crate::mongo::MongoDatabase;
use crate::{ConnectionProvider, DbError, DocumentDatabase, MongoCredentials};

/// Opens one client per node invocation.
///
/// The client's own pool is capped by `max_pool_size`; the executor only
/// ever has one operation in flight, so a small ceiling is enough.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    pub app_name: String,
    pub connect_timeout: Duration,
    pub max_pool_size: u32,
}

impl Default for MongoConnector {
    fn default() -> Self {
        Self {
            app_name: "rusty-automation/mongodb-operations".into(),
            connect_timeout: Duration::from_secs(10),
            max_pool_size: 2,
        }
    }
}

#[async_trait]
impl ConnectionProvider for MongoConnector {
    /// Connect and ping `admin`, so that an unreachable host fails here
    /// rather than on the first operation of the batch.
    #[instrument(skip(self, credentials), fields(database = credentials.database()))]
    async fn connect(
        &self,
        credentials: &MongoCredentials,
    ) -> Result<Box<dyn DocumentDatabase>, DbError> {
        let resolved = credentials.resolve()?;

        let mut options = ClientOptions::parse(&resolved.connection_string).await?;
        options.app_name = Some(self.app_name.clone());
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);
        options.max_pool_size = Some(self.max_pool_size);

        info!("Connecting to MongoDB (max_pool_size={})", self.max_pool_size);
        let client = Client::with_options(options)?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DbError::Unreachable(e.to_string()))?;

        Ok(Box::new(MongoDatabase::new(client, &resolved.database)))
    }
}
