//! Unit tests for the MongoDB adapter.

use super::*;
use crate::adapters::{BackendAdapter, ScopedAdapter};
use crate::classify::{ErrorKind, classify};
use crate::models::ConnectionOptions;
use futures::stream;
use mongodb::bson::oid::ObjectId;
use std::time::Duration;

fn documents(count: usize) -> Vec<Result<Document, std::io::Error>> {
    (0..count)
        .map(|n| Ok(doc! { "_id": i64::try_from(n).unwrap(), "kind": "event" }))
        .collect()
}

#[tokio::test]
async fn test_collect_documents_caps_at_limit() {
    let rows = collect_documents(stream::iter(documents(5000)), DOCUMENT_ROW_CAP)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1000);
    assert_eq!(rows[0]["_id"], 0);
    assert_eq!(rows[999]["_id"], 999);
}

#[tokio::test]
async fn test_collect_documents_under_limit() {
    let rows = collect_documents(stream::iter(documents(3)), DOCUMENT_ROW_CAP)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_collect_documents_propagates_cursor_error() {
    let mut items = documents(2);
    items.push(Err(std::io::Error::other("cursor killed")));
    items.extend(documents(2));

    let err = collect_documents(stream::iter(items), DOCUMENT_ROW_CAP)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "cursor killed");
}

#[test]
fn test_document_to_row_keeps_field_order() {
    let row = document_to_row(&doc! { "zeta": 1, "alpha": "a", "active": true });
    let keys: Vec<&str> = row.keys().map(String::as_str).collect();
    assert_eq!(keys, ["zeta", "alpha", "active"]);
    assert_eq!(row["zeta"], 1);
    assert_eq!(row["alpha"], "a");
    assert_eq!(row["active"], true);
}

#[test]
fn test_document_to_row_nested_values() {
    let row = document_to_row(&doc! {
        "profile": { "firstName": "Ada" },
        "tags": ["rust", "mongodb"]
    });
    assert_eq!(row["profile"]["firstName"], "Ada");
    assert!(row["tags"].is_array());
}

#[test]
fn test_document_to_row_object_id() {
    let id = ObjectId::new();
    let row = document_to_row(&doc! { "_id": id });
    assert_eq!(row["_id"]["$oid"], id.to_hex());
}

#[test]
fn test_connector_kind() {
    assert_eq!(MongoConnector.kind(), DatabaseKind::Document);
}

#[tokio::test]
async fn test_literal_connection_string_scheme_checked() {
    let mut descriptor = ConnectionDescriptor::new(DatabaseKind::Document, "", "events")
        .with_options(ConnectionOptions {
            ssl: false,
            use_connection_string: true,
        });
    descriptor.host = "mysql://root@localhost/events".to_string();

    let err = MongoConnector
        .connect(&descriptor, &AdapterConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::InvalidTarget { .. }));
}

#[tokio::test]
async fn test_unreachable_server_fails_within_deadline() {
    let descriptor = ConnectionDescriptor::new(DatabaseKind::Document, "127.0.0.1", "events")
        .with_port(1)
        .with_credentials("reader", Some("not-a-real-password".to_string()));
    let adapter = ScopedAdapter::new(
        MongoConnector,
        AdapterConfig {
            connect_timeout: Duration::from_secs(1),
            query_timeout: Some(Duration::from_secs(1)),
        },
    );

    let err = adapter.test_reachability(&descriptor).await.unwrap_err();
    let classified = classify(&err);
    assert!(
        matches!(
            classified.kind,
            ErrorKind::ConnectionRefused | ErrorKind::Timeout
        ),
        "unexpected kind: {:?}",
        classified.kind
    );
    assert!(!classified.message.contains("not-a-real-password"));
}
