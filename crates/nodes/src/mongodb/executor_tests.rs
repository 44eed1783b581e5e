//! Tests for the batch executor and the node wrapping it.
//!
//! Everything runs against `db::MemoryDatabase`, so no MongoDB deployment
//! is required.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use async_trait::async_trait;

use db::{
    ConnectionProvider, DbError, DocumentCollection, DocumentDatabase, FindQuery, JsonDocument,
    MemoryConnector, MemoryDatabase, MongoCredentials, StoreCall, UpdateModel, UpdateSettings,
    WriteSummary,
};

use crate::mongodb::{
    BatchOperationExecutor, ExecutionOutcome, ExecutorConfig, ExecutorError, MongoDbOperationsNode,
    NodeParameters, OperationKind, ResultBatch,
};
use crate::{ExecutableNode, ExecutionContext, Item, NodeError};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn executor(continue_on_fail: bool) -> BatchOperationExecutor {
    BatchOperationExecutor::new(ExecutorConfig { continue_on_fail })
}

/// Ten people aged 20..=29.
fn people_db() -> MemoryDatabase {
    let db = MemoryDatabase::new("test");
    db.seed("people", (0..10).map(|i| json!({ "name": format!("p{i}"), "age": 20 + i })));
    db
}

async fn run(
    operation: OperationKind,
    parameters: Value,
    payloads: Vec<Value>,
    db: &MemoryDatabase,
    continue_on_fail: bool,
) -> Result<ExecutionOutcome, ExecutorError> {
    let items = Item::batch(payloads);
    let params = NodeParameters::new(object(parameters), &items);
    executor(continue_on_fail).execute(operation, &items, &params, db).await
}

fn documents(outcome: ExecutionOutcome) -> Vec<Value> {
    match outcome {
        ExecutionOutcome::Success(ResultBatch::Documents(docs)) => docs,
        other => panic!("expected documents, got {other:?}"),
    }
}

// ============================================================
// find / aggregate
// ============================================================

#[tokio::test]
async fn find_concatenates_matches_of_every_item() {
    let db = people_db();
    let outcome = run(
        OperationKind::Find,
        json!({ "collection": "people", "query": "{ \"age\": {{ $json.age }} }" }),
        vec![json!({ "age": 21 }), json!({ "age": 99 }), json!({ "age": 25 })],
        &db,
        false,
    )
    .await
    .expect("find succeeds");

    let names: Vec<_> = documents(outcome).into_iter().map(|d| d["name"].clone()).collect();
    assert_eq!(names, vec![json!("p1"), json!("p5")]);
    assert_eq!(db.call_count(), 3);
}

#[tokio::test]
async fn find_with_no_matches_yields_an_empty_object() {
    let db = people_db();
    let outcome = run(
        OperationKind::Find,
        json!({ "collection": "people", "query": "{\"age\": 100}" }),
        vec![json!({}), json!({})],
        &db,
        false,
    )
    .await
    .unwrap();

    assert_eq!(outcome, ExecutionOutcome::Success(ResultBatch::Single(json!({}))));
}

#[tokio::test]
async fn find_skip_limit_sort_returns_ranks_three_to_five() {
    let db = people_db();
    let outcome = run(
        OperationKind::Find,
        json!({
            "collection": "people",
            "query": "{}",
            "options": { "skip": 2, "limit": 3, "sort": "{\"age\": -1}" }
        }),
        vec![json!({})],
        &db,
        false,
    )
    .await
    .unwrap();

    let ages: Vec<_> = documents(outcome).into_iter().map(|d| d["age"].clone()).collect();
    assert_eq!(ages, vec![json!(27), json!(26), json!(25)]);

    let expected = FindQuery::new(Map::new()).skip(2).limit(3).sort(object(json!({ "age": -1 })));
    assert_eq!(db.calls(), vec![StoreCall::Find { collection: "people".into(), query: expected }]);
}

#[tokio::test]
async fn find_defaults_to_a_limit_of_fifty_and_zero_means_unlimited() {
    let db = MemoryDatabase::new("test");
    db.seed("numbers", (0..60).map(|n| json!({ "n": n })));

    let limited = run(OperationKind::Find, json!({ "collection": "numbers" }), vec![json!({})], &db, false)
        .await
        .unwrap();
    assert_eq!(documents(limited).len(), 50);

    let unlimited = run(
        OperationKind::Find,
        json!({ "collection": "numbers", "options": { "limit": 0 } }),
        vec![json!({})],
        &db,
        false,
    )
    .await
    .unwrap();
    assert_eq!(documents(unlimited).len(), 60);
}

#[tokio::test]
async fn find_ignores_array_sort() {
    let db = people_db();
    run(
        OperationKind::Find,
        json!({ "collection": "people", "options": { "sort": "[[\"age\", -1]]" } }),
        vec![json!({})],
        &db,
        false,
    )
    .await
    .unwrap();

    match &db.calls()[0] {
        StoreCall::Find { query, .. } => assert_eq!(query.sort, None),
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test]
async fn find_failure_stops_iteration_and_collapses_the_batch() {
    let db = people_db();
    let outcome = run(
        OperationKind::Find,
        json!({ "collection": "people", "query": "{{ $json.q }}" }),
        vec![
            json!({ "q": "{\"age\": 20}" }),
            json!({ "q": "{\"age\": {\"$bogus\": 1}}" }),
            json!({ "q": "{\"age\": 22}" }),
        ],
        &db,
        true,
    )
    .await
    .expect("continue-on-failure converts the error");

    assert_eq!(outcome, ExecutionOutcome::Failure { message: "unknown operator: $bogus".into() });
    assert_eq!(db.call_count(), 2, "the third item must not run");
}

#[tokio::test]
async fn aggregate_appends_skip_limit_sort_stages_in_that_order() {
    let db = people_db();
    let outcome = run(
        OperationKind::Aggregate,
        json!({
            "collection": "people",
            "query": "[{\"$match\": {\"age\": {\"$gte\": 22}}}]",
            "options": { "skip": 1, "limit": 3, "sort": { "age": -1 } }
        }),
        vec![json!({})],
        &db,
        false,
    )
    .await
    .unwrap();

    // The window (23, 24, 25) is taken in storage order, then sorted.
    let ages: Vec<_> = documents(outcome).into_iter().map(|d| d["age"].clone()).collect();
    assert_eq!(ages, vec![json!(25), json!(24), json!(23)]);

    match &db.calls()[0] {
        StoreCall::Aggregate { pipeline, .. } => {
            let stages: Vec<_> = pipeline.iter().flat_map(|s| s.keys().cloned()).collect();
            assert_eq!(stages, vec!["$match", "$skip", "$limit", "$sort"]);
        }
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test]
async fn aggregate_results_of_all_items_are_flattened() {
    let db = people_db();
    let outcome = run(
        OperationKind::Aggregate,
        json!({
            "collection": "people",
            "query": "[{\"$match\": {\"age\": {\"$lt\": {{ $json.below }}}}}, {\"$count\": \"n\"}]",
        }),
        vec![json!({ "below": 22 }), json!({ "below": 25 })],
        &db,
        false,
    )
    .await
    .unwrap();

    assert_eq!(documents(outcome), vec![json!({ "n": 2 }), json!({ "n": 5 })]);
}

#[tokio::test]
async fn aggregate_rejects_a_non_array_query() {
    let db = people_db();
    let err = run(
        OperationKind::Aggregate,
        json!({ "collection": "people", "query": "{}" }),
        vec![json!({})],
        &db,
        false,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExecutorError::Configuration { ref parameter, .. } if parameter == "query"));
    assert_eq!(db.call_count(), 0);
}

#[tokio::test]
async fn aggregate_failure_stops_iteration_and_collapses_the_batch() {
    let db = people_db();
    let outcome = run(
        OperationKind::Aggregate,
        json!({ "collection": "people", "query": "{{ $json.pipeline }}" }),
        vec![
            json!({ "pipeline": "[{\"$match\": {\"age\": 20}}]" }),
            json!({ "pipeline": "[{\"$lookup\": {\"from\": \"teams\"}}]" }),
            json!({ "pipeline": "[{\"$match\": {\"age\": 22}}]" }),
        ],
        &db,
        true,
    )
    .await
    .expect("continue-on-failure converts the error");

    assert_eq!(
        outcome,
        ExecutionOutcome::Failure { message: "Unrecognized pipeline stage name: '$lookup'".into() }
    );
    assert_eq!(db.call_count(), 2, "the third item must not run");
}

#[tokio::test]
async fn aggregate_failure_without_continue_on_fail_names_the_item() {
    let db = people_db();
    db.fail_call(1, "PlanExecutor error during aggregation");

    let err = run(
        OperationKind::Aggregate,
        json!({ "collection": "people", "query": "[]" }),
        vec![json!({}), json!({}), json!({})],
        &db,
        false,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExecutorError::Operation { operation: OperationKind::Aggregate, item: Some(1), .. }));
    assert_eq!(err.message(), "PlanExecutor error during aggregation");
    assert_eq!(db.call_count(), 2);
}

// ============================================================
// insert
// ============================================================

#[tokio::test]
async fn insert_is_one_bulk_write_into_the_first_items_collection() {
    let db = MemoryDatabase::new("test");
    let outcome = run(
        OperationKind::Insert,
        json!({ "collection": "{{ $json.target }}", "document": "{{ $json.doc }}" }),
        vec![
            json!({ "target": "first", "doc": { "n": 1 } }),
            json!({ "target": "second", "doc": { "n": 2 } }),
            json!({ "target": "third", "doc": { "n": 3 } }),
        ],
        &db,
        false,
    )
    .await
    .unwrap();

    let submitted = vec![json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })];
    assert_eq!(documents(outcome), submitted);

    // Known quirk: the collection comes from item 0 only.
    assert_eq!(db.call_count(), 1);
    assert_eq!(db.documents("first").len(), 3);
    assert!(db.documents("second").is_empty());
    assert!(matches!(&db.calls()[0], StoreCall::InsertMany { collection, documents } if collection == "first" && documents.len() == 3));
}

#[tokio::test]
async fn insert_failure_is_batch_wide() {
    let db = MemoryDatabase::new("test");
    db.fail_call(0, "E11000 duplicate key error collection: test.people");

    let err = run(
        OperationKind::Insert,
        json!({ "collection": "people", "document": "{\"n\": 1}" }),
        vec![json!({}), json!({})],
        &db,
        false,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ExecutorError::Operation { operation: OperationKind::Insert, item: None, .. }));
}

#[tokio::test]
async fn insert_failure_with_continue_on_fail_is_one_error_record() {
    let db = MemoryDatabase::new("test");
    db.fail_call(0, "E11000 duplicate key error collection: test.people");

    let outcome = run(
        OperationKind::Insert,
        json!({ "collection": "people", "document": "{\"n\": 1}" }),
        vec![json!({}), json!({})],
        &db,
        true,
    )
    .await
    .expect("continue-on-failure converts the error");

    assert_eq!(
        outcome.into_records(),
        vec![json!({ "error": "E11000 duplicate key error collection: test.people" })]
    );
    assert_eq!(db.call_count(), 1);
}

// ============================================================
// update / replaceOne / deleteOne
// ============================================================

#[tokio::test]
async fn update_echoes_input_regardless_of_matches() {
    let db = people_db();
    let payloads = vec![json!({ "name": "p1" }), json!({ "name": "nobody" }), json!({ "name": "p3" })];
    let outcome = run(
        OperationKind::Update,
        json!({
            "collection": "people",
            "query": "{ \"name\": \"{{ $json.name }}\" }",
            "update": "{ \"$set\": { \"seen\": true } }",
        }),
        payloads.clone(),
        &db,
        false,
    )
    .await
    .unwrap();

    assert_eq!(documents(outcome), payloads);
    let seen = db.documents("people").iter().filter(|d| d.contains_key("seen")).count();
    assert_eq!(seen, 2);
}

#[tokio::test]
async fn update_passes_options_and_pipeline_updates_through() {
    let db = MemoryDatabase::new("test");
    run(
        OperationKind::Update,
        json!({
            "collection": "people",
            "query": "{\"name\": \"Ada\"}",
            "update": "[{\"$set\": {\"age\": 36}}]",
            "updateOptions": "{\"upsert\": true}",
        }),
        vec![json!({})],
        &db,
        false,
    )
    .await
    .unwrap();

    assert_eq!(db.documents("people"), vec![object(json!({ "name": "Ada", "age": 36 }))]);
    assert!(matches!(&db.calls()[0], StoreCall::UpdateOne { update: UpdateModel::Pipeline(_), .. }));
}

fn five_updates() -> (Value, Vec<Value>) {
    (
        json!({
            "collection": "people",
            "query": "{ \"name\": \"p{{ $index }}\" }",
            "update": "{ \"$set\": { \"touched\": true } }",
        }),
        (0..5).map(|i| json!({ "i": i })).collect(),
    )
}

#[tokio::test]
async fn update_failure_with_continue_on_fail_keeps_earlier_writes() {
    let db = people_db();
    db.fail_call(3, "E11000 duplicate key error");
    let (params, payloads) = five_updates();

    let outcome = run(OperationKind::Update, params, payloads, &db, true).await.unwrap();

    assert_eq!(outcome.clone().into_records(), vec![json!({ "error": "E11000 duplicate key error" })]);
    assert_eq!(db.call_count(), 4, "item 4 must not run");

    let touched: Vec<_> = db
        .documents("people")
        .into_iter()
        .filter(|d| d.contains_key("touched"))
        .map(|d| d["name"].clone())
        .collect();
    assert_eq!(touched, vec![json!("p0"), json!("p1"), json!("p2")]);
}

#[tokio::test]
async fn update_failure_without_continue_on_fail_is_returned() {
    let db = people_db();
    db.fail_call(3, "E11000 duplicate key error");
    let (params, payloads) = five_updates();

    let err = run(OperationKind::Update, params, payloads, &db, false).await.unwrap_err();

    assert!(matches!(err, ExecutorError::Operation { operation: OperationKind::Update, item: Some(3), .. }));
    assert_eq!(err.message(), "E11000 duplicate key error");
    assert_eq!(db.documents("people").iter().filter(|d| d.contains_key("touched")).count(), 3);
}

#[tokio::test]
async fn update_without_operators_reports_the_store_message() {
    let db = people_db();
    let outcome = run(
        OperationKind::Update,
        json!({ "collection": "people", "query": "{\"name\": \"p0\"}", "update": "{\"name\": \"x\"}" }),
        vec![json!({})],
        &db,
        true,
    )
    .await
    .unwrap();

    assert_eq!(
        outcome,
        ExecutionOutcome::Failure { message: "update document requires atomic operators".into() }
    );
}

#[tokio::test]
async fn replace_one_returns_the_submitted_documents_one_call_per_item() {
    let db = people_db();
    let outcome = run(
        OperationKind::ReplaceOne,
        json!({
            "collection": "people",
            "query": "{ \"name\": \"{{ $json.name }}\" }",
            "document": "{ \"name\": \"{{ $json.name }}\", \"age\": {{ $json.age }} }",
        }),
        vec![json!({ "name": "p0", "age": 1 }), json!({ "name": "p1", "age": 2 })],
        &db,
        false,
    )
    .await
    .unwrap();

    assert_eq!(documents(outcome), vec![json!({ "name": "p0", "age": 1 }), json!({ "name": "p1", "age": 2 })]);
    assert_eq!(db.call_count(), 2);
    assert!(db.calls().iter().all(|c| matches!(c, StoreCall::ReplaceOne { .. })));
}

#[tokio::test]
async fn delete_one_echoes_input_and_deletes_one_per_item() {
    let db = people_db();
    let payloads = vec![json!({ "max": 25 }), json!({ "max": 25 })];
    let outcome = run(
        OperationKind::DeleteOne,
        json!({ "collection": "people", "query": "{ \"age\": { \"$lt\": {{ $json.max }} } }" }),
        payloads.clone(),
        &db,
        false,
    )
    .await
    .unwrap();

    assert_eq!(documents(outcome), payloads);
    assert_eq!(db.documents("people").len(), 8);
}

#[tokio::test]
async fn per_item_collections_are_honoured_outside_insert() {
    let db = MemoryDatabase::new("test");
    db.seed("a", [json!({ "k": 1 })]);
    db.seed("b", [json!({ "k": 1 })]);

    run(
        OperationKind::DeleteOne,
        json!({ "collection": "{{ $json.c }}", "query": "{\"k\": 1}" }),
        vec![json!({ "c": "a" }), json!({ "c": "b" })],
        &db,
        false,
    )
    .await
    .unwrap();

    assert!(db.documents("a").is_empty());
    assert!(db.documents("b").is_empty());
}

// ============================================================
// Configuration errors and empty input
// ============================================================

#[tokio::test]
async fn malformed_json_obeys_continue_on_fail() {
    let db = people_db();
    let params = json!({ "collection": "people", "query": "{ \"name\": " });

    let outcome = run(OperationKind::DeleteOne, params.clone(), vec![json!({})], &db, true).await.unwrap();
    match outcome {
        ExecutionOutcome::Failure { message } => assert!(message.starts_with("EOF while parsing"), "{message}"),
        other => panic!("expected failure, got {other:?}"),
    }

    let err = run(OperationKind::DeleteOne, params, vec![json!({})], &db, false).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Configuration { item: 0, .. }));
    assert_eq!(db.call_count(), 0);
}

#[tokio::test]
async fn empty_input_makes_no_store_calls() {
    let params = json!({ "collection": "people", "query": "{}", "document": "{}" });

    for op in OperationKind::ALL {
        let db = people_db();
        let outcome = run(op, params.clone(), vec![], &db, false).await.unwrap();

        let expected = match op {
            OperationKind::Find | OperationKind::Aggregate => ResultBatch::Single(json!({})),
            _ => ResultBatch::Documents(vec![]),
        };
        assert_eq!(outcome, ExecutionOutcome::Success(expected), "{op}");
        assert_eq!(db.call_count(), 0, "{op}");
    }
}

#[tokio::test]
async fn update_overflow_is_an_operation_error_not_a_panic() {
    let db = MemoryDatabase::new("test");
    db.seed("counters", [json!({ "_id": "c", "n": i64::MAX })]);

    let outcome = run(
        OperationKind::Update,
        json!({ "collection": "counters", "query": "{\"_id\": \"c\"}", "update": "{\"$inc\": {\"n\": 1}}" }),
        vec![json!({})],
        &db,
        true,
    )
    .await
    .expect("continue-on-failure converts the error");

    assert!(matches!(outcome, ExecutionOutcome::Failure { ref message } if message.contains("overflow")));
    assert_eq!(db.documents("counters")[0]["n"], json!(i64::MAX));
}

// ============================================================
// Node: connection scope and packaging
// ============================================================

fn context(parameters: Value, continue_on_fail: bool) -> ExecutionContext {
    let secrets: HashMap<String, String> = [
        ("configurationType", "connectionString"),
        ("connectionString", "mongodb://localhost:27017"),
        ("database", "test"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    ExecutionContext {
        workflow_id: uuid::Uuid::new_v4(),
        execution_id: uuid::Uuid::new_v4(),
        parameters: object(parameters),
        secrets,
        continue_on_fail,
    }
}

#[tokio::test]
async fn node_closes_the_connection_after_success() {
    let db = people_db();
    let node = MongoDbOperationsNode::new(Arc::new(MemoryConnector::new(db.clone())));
    let ctx = context(json!({ "operation": "find", "collection": "people", "query": "{\"age\": 20}" }), false);

    let out = node.execute(Item::batch(vec![json!({}), json!({})]), &ctx).await.unwrap();

    // Two items, two matches: counts line up, so pairing is one to one.
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].paired_item, vec![0]);
    assert_eq!(db.close_count(), 1);
}

#[tokio::test]
async fn node_closes_the_connection_when_the_failure_is_returned() {
    let db = people_db();
    db.fail_call(0, "connection reset by peer");
    let node = MongoDbOperationsNode::new(Arc::new(MemoryConnector::new(db.clone())));
    let ctx = context(json!({ "operation": "deleteOne", "collection": "people" }), false);

    let err = node.execute(Item::batch(vec![json!({})]), &ctx).await.unwrap_err();

    assert_eq!(err, NodeError::Fatal("deleteOne failed: connection reset by peer".into()));
    assert_eq!(db.close_count(), 1);
}

#[tokio::test]
async fn node_error_record_is_paired_with_every_item() {
    let db = people_db();
    db.fail_call(1, "boom");
    let node = MongoDbOperationsNode::new(Arc::new(MemoryConnector::new(db.clone())));
    let ctx = context(json!({ "operation": "find", "collection": "people" }), true);

    let out = node.execute(Item::batch(vec![json!({}), json!({}), json!({})]), &ctx).await.unwrap();

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].json, json!({ "error": "boom" }));
    assert_eq!(out[0].paired_item, vec![0, 1, 2]);
    assert_eq!(db.close_count(), 1);
}

#[tokio::test]
async fn unknown_operation_is_a_configuration_error() {
    let db = people_db();
    let node = MongoDbOperationsNode::new(Arc::new(MemoryConnector::new(db.clone())));

    let ctx = context(json!({ "operation": "dropDatabase", "collection": "people" }), true);
    let out = node.execute(Item::batch(vec![json!({})]), &ctx).await.unwrap();
    assert!(out[0].json["error"].as_str().unwrap().contains("dropDatabase"));

    let ctx = context(json!({ "operation": "dropDatabase", "collection": "people" }), false);
    let err = node.execute(Item::batch(vec![json!({})]), &ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Fatal(_)));
    assert_eq!(db.close_count(), 2);
}

#[tokio::test]
async fn connection_errors_propagate_even_with_continue_on_fail() {
    let node = MongoDbOperationsNode::new(Arc::new(MemoryConnector::unreachable("server selection timeout")));
    let ctx = context(json!({ "operation": "find", "collection": "people" }), true);

    let err = node.execute(Item::batch(vec![json!({})]), &ctx).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn missing_credentials_are_fatal() {
    let node = MongoDbOperationsNode::new(Arc::new(MemoryConnector::new(people_db())));
    let mut ctx = context(json!({ "collection": "people" }), true);
    ctx.secrets.remove("database");

    let err = node.execute(Item::batch(vec![json!({})]), &ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Fatal(msg) if msg.contains("database name must be set")));
}

/// Hands out collections whose every call panics; close is delegated to
/// the wrapped memory store so it can be counted.
struct PanickingConnector {
    database: MemoryDatabase,
}

struct PanickingDatabase {
    inner: MemoryDatabase,
}

struct PanickingCollection;

#[async_trait]
impl ConnectionProvider for PanickingConnector {
    async fn connect(&self, _credentials: &MongoCredentials) -> Result<Box<dyn DocumentDatabase>, DbError> {
        Ok(Box::new(PanickingDatabase { inner: self.database.clone() }))
    }
}

#[async_trait]
impl DocumentDatabase for PanickingDatabase {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn collection(&self, _name: &str) -> Box<dyn DocumentCollection> {
        Box::new(PanickingCollection)
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[async_trait]
impl DocumentCollection for PanickingCollection {
    async fn find(&self, _query: FindQuery) -> Result<Vec<JsonDocument>, DbError> {
        panic!("driver bug in find")
    }

    async fn aggregate(&self, _pipeline: Vec<JsonDocument>) -> Result<Vec<JsonDocument>, DbError> {
        panic!("driver bug in aggregate")
    }

    async fn insert_many(&self, _documents: Vec<JsonDocument>) -> Result<usize, DbError> {
        panic!("driver bug in insert_many")
    }

    async fn update_one(
        &self,
        _filter: JsonDocument,
        _update: UpdateModel,
        _settings: UpdateSettings,
    ) -> Result<WriteSummary, DbError> {
        panic!("driver bug in update_one")
    }

    async fn replace_one(&self, _filter: JsonDocument, _replacement: JsonDocument) -> Result<WriteSummary, DbError> {
        panic!("driver bug in replace_one")
    }

    async fn delete_one(&self, _filter: JsonDocument) -> Result<u64, DbError> {
        panic!("driver bug in delete_one")
    }
}

#[tokio::test]
async fn node_closes_the_connection_when_a_store_call_panics() {
    let db = MemoryDatabase::new("test");
    let node = MongoDbOperationsNode::new(Arc::new(PanickingConnector { database: db.clone() }));
    let ctx = context(json!({ "operation": "update", "collection": "counters", "update": "{\"$inc\": {\"n\": 1}}" }), true);

    let handle = tokio::spawn(async move { node.execute(Item::batch(vec![json!({})]), &ctx).await });
    let err = handle.await.expect_err("the panic is resumed after closing");

    assert!(err.is_panic());
    assert_eq!(db.close_count(), 1);
}
