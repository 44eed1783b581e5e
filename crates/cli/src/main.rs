//! `mongodb-operations` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`: run the MongoDB operations node against a deployment.
//! - `validate`: resolve a parameter file against items without a database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nodes::mongodb::{plan, resolve_operation, NodeParameters};
use nodes::{ExecutableNode, ExecutionContext, Item, MongoDbOperationsNode, NodeError, OutputItem};

#[derive(Parser)]
#[command(
    name = "mongodb-operations",
    about = "Run MongoDB document operations over a batch of workflow items",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node against a MongoDB deployment.
    Run {
        /// JSON file holding the node parameters.
        #[arg(long)]
        params: PathBuf,
        /// JSON file holding the input items (an array of payloads).
        #[arg(long)]
        items: Option<PathBuf>,
        #[arg(long, env = "MONGODB_CONNECTION_STRING")]
        connection_string: String,
        #[arg(long, env = "MONGODB_DATABASE")]
        database: String,
        /// Report failures as an `{ "error": .. }` record instead of exiting.
        #[arg(long)]
        continue_on_fail: bool,
        /// Retries for connection failures.
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        /// Base delay for exponential back-off between retries.
        #[arg(long, default_value_t = 500)]
        retry_delay_ms: u64,
    },
    /// Resolve every item's request and print it.
    Validate {
        #[arg(long)]
        params: PathBuf,
        #[arg(long)]
        items: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            params,
            items,
            connection_string,
            database,
            continue_on_fail,
            max_retries,
            retry_delay_ms,
        } => {
            let secrets: HashMap<String, String> = [
                ("configurationType", "connectionString".to_owned()),
                ("connectionString", connection_string),
                ("database", database),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();

            let ctx = ExecutionContext {
                workflow_id: uuid::Uuid::new_v4(),
                execution_id: uuid::Uuid::new_v4(),
                parameters: load_parameters(&params)?,
                secrets,
                continue_on_fail,
            };
            let items = load_items(items.as_deref())?;
            info!("Running node over {} items", items.len());

            let node = MongoDbOperationsNode::with_mongo();
            let retry = RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(retry_delay_ms),
            };
            let output = execute_with_retry(&node, items, &ctx, &retry).await?;

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Validate { params, items } => {
            let parameters = load_parameters(&params)?;
            let items = load_items(items.as_deref())?;
            let resolver = NodeParameters::new(parameters, &items);

            let requests = resolve_operation(&resolver)
                .and_then(|operation| plan(operation, items.len(), &resolver));
            match requests {
                Ok(requests) => {
                    eprintln!("✅ Parameters are valid for {} items.", items.len());
                    println!("{}", serde_json::to_string_pretty(&requests)?);
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Input files
// ---------------------------------------------------------------------------

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn load_parameters(path: &Path) -> anyhow::Result<Map<String, Value>> {
    match read_json(path)? {
        Value::Object(params) => Ok(params),
        _ => bail!("{} must contain a JSON object of node parameters", path.display()),
    }
}

/// Without a file the node runs once, over a single empty item.
fn load_items(path: Option<&Path>) -> anyhow::Result<Vec<Item>> {
    let Some(path) = path else {
        return Ok(Item::batch([Value::Object(Map::new())]));
    };
    Ok(parse_items(read_json(path)?))
}

fn parse_items(value: Value) -> Vec<Item> {
    match value {
        Value::Array(payloads) => Item::batch(payloads),
        single => Item::batch([single]),
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

/// Execute the node, retrying `NodeError::Retryable` with exponential
/// back-off.  Only connection failures are retryable, and those happen
/// before any write, so a re-run never applies a write twice.
async fn execute_with_retry(
    node: &dyn ExecutableNode,
    items: Vec<Item>,
    ctx: &ExecutionContext,
    policy: &RetryPolicy,
) -> Result<Vec<OutputItem>, NodeError> {
    let mut attempts = 0u32;

    loop {
        match node.execute(items.clone(), ctx).await {
            Ok(output) => return Ok(output),

            Err(NodeError::Retryable(msg)) if attempts < policy.max_retries => {
                attempts += 1;
                let delay = policy.base_delay * 2u32.pow(attempts - 1);

                warn!(
                    "retryable error (attempt {}/{}), retrying in {:?}: {}",
                    attempts, policy.max_retries, delay, msg
                );

                tokio::time::sleep(delay).await;
            }

            Err(e) => return Err(e),
        }
    }
}
