//! Parameter hydration through fetch providers

use serde_json::json;
use std::sync::Arc;

use super::helpers::*;
use crate::dsl::fetch::providers::tests::FakeStore;
use crate::errors::{self, WorkflowError};

fn summarize_workflow(on_not_found: &str) -> serde_json::Value {
    json!({
        "name": "summarize_document",
        "activities": [{
            "name": "summarize",
            "fetch": {
                "doc": {
                    "type": "document",
                    "query": { "id": "${objectId}" },
                    "limit": 1,
                    "select": "text",
                    "onNotFound": on_not_found
                }
            },
            "output": "result"
        }]
    })
}

#[tokio::test]
async fn test_fetch_hydrates_single_record() {
    let executor = executor();
    let store = Arc::new(FakeStore {
        records: vec![json!({ "_id": "d1", "text": "twelve chars" })],
        ..Default::default()
    });
    let engine = engine_with_store(&executor, store.clone());

    let mut run = payload(summarize_workflow("ignore"), json!({}));
    run.object_ids = Some(vec!["d1".to_string(), "d2".to_string()]);
    let outcome = engine.run(run).await.unwrap();

    assert_eq!(outcome.result, json!({ "length": 12, "token": "token-123" }));
    assert_eq!(
        executor.params(0),
        json!({ "doc": { "_id": "d1", "text": "twelve chars" } })
    );

    let requests = store.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (collection, find, token) = &requests[0];
    assert_eq!(collection, "objects");
    assert_eq!(serde_json::Value::Object(find.query.clone()), json!({ "_id": "d1" }));
    assert_eq!(find.select.as_deref(), Some("text"));
    assert_eq!(token, "token-123");
}

#[tokio::test]
async fn test_fetch_without_limit_hydrates_list() {
    let executor = executor();
    let store = Arc::new(FakeStore {
        records: vec![
            json!({ "_id": "t1", "name": "Invoice", "schema": {} }),
            json!({ "_id": "t2", "name": "Receipt", "schema": {} }),
        ],
        ..Default::default()
    });
    let engine = engine_with_store(&executor, store);
    let workflow = json!({
        "name": "types",
        "activities": [{
            "name": "hello",
            "fetch": { "types": { "type": "document_type", "select": "name" } },
            "output": "result"
        }]
    });

    engine.run(payload(workflow, json!({}))).await.unwrap();

    assert_eq!(
        executor.params(0),
        json!({ "types": [{ "name": "Invoice" }, { "name": "Receipt" }] })
    );
}

#[tokio::test]
async fn test_missing_record_is_null_when_ignored() {
    let executor = executor();
    let engine = engine_with_store(&executor, Arc::new(FakeStore::default()));

    let err = engine
        .run(payload(summarize_workflow("ignore"), json!({})))
        .await
        .unwrap_err();

    // `summarize` requires `doc`, so a null hydration fails inside the activity
    assert!(matches!(
        err,
        WorkflowError::ActivityFailed { ref error_type, .. } if error_type == errors::PARAM_NOT_FOUND
    ));
    assert_eq!(executor.params(0), json!({ "doc": null }));
}

#[tokio::test]
async fn test_missing_record_throws_before_the_activity() {
    let executor = executor();
    let engine = engine_with_store(&executor, Arc::new(FakeStore::default()));

    let err = engine
        .run(payload(summarize_workflow("throw"), json!({})))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::ParamNotFound { ref activity, ref param }
            if activity == "summarize" && param == "doc"
    ));
    assert_eq!(executor.count("summarize"), 0);
}

#[tokio::test]
async fn test_unknown_provider_is_rejected_before_running() {
    let executor = executor();
    let engine = engine(&executor);
    let workflow = json!({
        "name": "wf",
        "activities": [
            { "name": "hello", "output": "result" },
            { "name": "world", "fetch": { "hello": { "type": "invoice" } } }
        ]
    });

    let err = engine.run(payload(workflow, json!({}))).await.unwrap_err();

    assert_eq!(err.code(), errors::VALIDATION_ERROR);
    assert_eq!(err.metadata().get("rules"), Some(&json!(["known-providers"])));
    assert_eq!(executor.count("hello"), 0);
}

#[tokio::test]
async fn test_store_failure_is_fetch_failed() {
    let executor = executor();
    // No store configured
    let engine = engine(&executor);

    let err = engine
        .run(payload(summarize_workflow("ignore"), json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::FetchFailed { ref provider, .. } if provider == "document"));
    assert!(err.is_retryable());
}
