//! End-to-end gateway tests against scripted in-process adapters.
//!
//! Covers the request state machine from validation to normalization, the
//! saved-connection flow through the vault and store, resource release on
//! every exit path, and that no credential ever reaches a response.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use querygate_core::adapters::mock::{
    ConnectScript, FetchScript, ScriptedConnector, SessionStats, row,
};
use querygate_core::adapters::{AdapterConfig, ScopedAdapter};
use querygate_core::error::FailureSignal;
use querygate_core::{
    AdapterSet, ConnectionDescriptor, ConnectionId, ConnectionStore, ConnectionTarget,
    CredentialVault, DatabaseKind, ErrorKind, GatewayConfig, InMemoryConnectionStore,
    MasterSecret, QueryGateway, StoredConnection, VaultParams,
};
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const PASSWORD: &str = "correct-horse-battery";

/// Store wrapper that counts lookups.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryConnectionStore,
    gets: AtomicUsize,
}

#[async_trait]
impl ConnectionStore for CountingStore {
    async fn get(&self, id: ConnectionId) -> querygate_core::Result<Option<StoredConnection>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(id).await
    }

    async fn put(&self, record: StoredConnection) -> querygate_core::Result<()> {
        self.inner.put(record).await
    }

    async fn remove(&self, id: ConnectionId) -> querygate_core::Result<bool> {
        self.inner.remove(id).await
    }

    async fn list(&self) -> querygate_core::Result<Vec<ConnectionId>> {
        self.inner.list().await
    }
}

struct Harness {
    gateway: QueryGateway,
    store: Arc<CountingStore>,
    sql: Arc<SessionStats>,
    document: Arc<SessionStats>,
}

fn vault() -> CredentialVault {
    CredentialVault::with_params(
        MasterSecret::new("gateway-test-master-secret").unwrap(),
        VaultParams::with_iterations(1_000),
    )
}

fn harness(sql: ScriptedConnector, document: ScriptedConnector) -> Harness {
    let config = GatewayConfig::default();
    let sql_stats = sql.stats();
    let document_stats = document.stats();
    let adapters = AdapterSet::empty()
        .with_adapter(Arc::new(ScopedAdapter::new(sql, config.adapter_config())))
        .with_adapter(Arc::new(ScopedAdapter::new(document, config.adapter_config())));
    let store = Arc::new(CountingStore::default());

    Harness {
        gateway: QueryGateway::new(vault(), store.clone(), config).with_adapters(adapters),
        store,
        sql: sql_stats,
        document: document_stats,
    }
}

fn default_harness() -> Harness {
    harness(
        ScriptedConnector::new(DatabaseKind::SqlTable)
            .with_connect(ConnectScript::RequirePassword(PASSWORD.to_string()))
            .with_fetch(FetchScript::Rows(vec![row(json!({"1": 1}))])),
        ScriptedConnector::new(DatabaseKind::Document).with_fetch(FetchScript::numbered(5000)),
    )
}

fn sql_descriptor(password: &str) -> ConnectionDescriptor {
    ConnectionDescriptor::new(DatabaseKind::SqlTable, "db.internal", "sales")
        .with_name("sales-replica")
        .with_credentials("report", Some(password.to_string()))
}

fn document_descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::new(DatabaseKind::Document, "mongo.internal", "events")
}

#[tokio::test]
async fn test_select_one_succeeds() {
    let h = default_harness();

    let response = h
        .gateway
        .execute_query(sql_descriptor(PASSWORD), "SELECT 1")
        .await;

    assert!(response.success);
    assert_eq!(response.columns, Some(vec!["1".to_string()]));
    assert_eq!(response.rows.unwrap()[0]["1"], 1);
    assert!(response.message.is_none());
    assert_eq!(h.sql.closes(), 1);
}

#[tokio::test]
async fn test_wrong_password_is_authentication_failed() {
    let h = default_harness();
    let wrong = "definitely-wrong-password";

    let response = h
        .gateway
        .execute_query(sql_descriptor(wrong), "SELECT 1")
        .await;

    assert!(!response.success);
    assert_eq!(response.kind, Some(ErrorKind::AuthenticationFailed));
    assert_eq!(
        response.message.as_deref(),
        Some("Authentication failed. Please check your credentials.")
    );
    let json = serde_json::to_string(&response).unwrap();
    assert!(!json.contains(wrong));
    assert!(!json.contains("report"));
    assert!(!json.contains("db.internal"));
}

#[tokio::test]
async fn test_rejected_operation_touches_nothing() {
    let h = default_harness();
    let id = h.gateway.save_connection(sql_descriptor(PASSWORD)).await.unwrap();
    let connects_after_save = h.sql.connects();
    let gets_before = h.store.gets.load(Ordering::SeqCst);

    for operation in ["DROP TABLE users", "drop table users", "delete from t"] {
        let err = h.gateway.run_query(id, operation).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Rejected);
    }

    assert_eq!(h.store.gets.load(Ordering::SeqCst), gets_before);
    assert_eq!(h.sql.connects(), connects_after_save);
    assert_eq!(h.sql.fetches(), 0);
}

#[tokio::test]
async fn test_saved_connection_roundtrip() {
    let h = default_harness();

    let id = h.gateway.save_connection(sql_descriptor(PASSWORD)).await.unwrap();
    assert_eq!(h.sql.pings(), 1);

    let result = h.gateway.run_query(id, "SELECT 1").await.unwrap();
    assert_eq!(result.columns, vec!["1"]);
    assert_eq!(h.sql.open_sessions(), 0);

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.kind, DatabaseKind::SqlTable);
    assert_eq!(record.name.as_deref(), Some("sales-replica"));
    let stored = serde_json::to_string(&record).unwrap();
    assert!(!stored.contains(PASSWORD));
}

#[tokio::test]
async fn test_tampered_blob_is_credentials_corrupt() {
    let h = default_harness();
    let id = h.gateway.save_connection(sql_descriptor(PASSWORD)).await.unwrap();

    let mut record = h.store.get(id).await.unwrap().unwrap();
    record.blob.authentication_tag[0] ^= 0xff;
    h.store.put(record).await.unwrap();

    let err = h.gateway.run_query(id, "SELECT 1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CredentialsCorrupt);
    assert!(!err.kind.is_retryable());
    assert_eq!(h.sql.fetches(), 0);

    let response = h.gateway.test_saved_connection(id).await;
    assert!(!response.success);
    assert_eq!(
        response.message,
        "Stored connection details could not be decrypted."
    );
}

#[tokio::test]
async fn test_unknown_connection_id() {
    let h = default_harness();
    let err = h
        .gateway
        .run_query(ConnectionTarget::Saved(uuid::Uuid::new_v4()), "SELECT 1")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionNotFound);
}

#[tokio::test]
async fn test_failed_verification_stores_nothing() {
    let h = default_harness();

    let err = h
        .gateway
        .save_connection(sql_descriptor("wrong"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
    assert!(h.store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_save_without_verification() {
    let sql = ScriptedConnector::new(DatabaseKind::SqlTable);
    let stats = sql.stats();
    let config = GatewayConfig {
        verify_on_save: false,
        ..GatewayConfig::default()
    };
    let adapters = AdapterSet::empty()
        .with_adapter(Arc::new(ScopedAdapter::new(sql, config.adapter_config())));
    let gateway = QueryGateway::new(vault(), Arc::new(InMemoryConnectionStore::new()), config)
        .with_adapters(adapters);

    gateway.save_connection(sql_descriptor("x")).await.unwrap();
    assert_eq!(stats.connects(), 0);
}

#[tokio::test]
async fn test_descriptor_only_gateway_needs_no_vault() {
    let sql = ScriptedConnector::new(DatabaseKind::SqlTable)
        .with_fetch(FetchScript::Rows(vec![row(json!({"1": 1}))]));
    let stats = sql.stats();
    let config = GatewayConfig::default();
    let adapters = AdapterSet::empty()
        .with_adapter(Arc::new(ScopedAdapter::new(sql, config.adapter_config())));
    let gateway = QueryGateway::for_descriptors(config).with_adapters(adapters);

    let response = gateway.execute_query(sql_descriptor("x"), "SELECT 1").await;
    assert!(response.success);

    let err = gateway
        .run_query(ConnectionTarget::Saved(uuid::Uuid::new_v4()), "SELECT 1")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionNotFound);

    let err = gateway.save_connection(sql_descriptor("x")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unknown);
    assert_eq!(stats.connects(), 1);
}

#[tokio::test]
async fn test_remove_connection() {
    let h = default_harness();
    let id = h.gateway.save_connection(sql_descriptor(PASSWORD)).await.unwrap();

    h.gateway.remove_connection(id).await.unwrap();
    let err = h.gateway.remove_connection(id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionNotFound);
}

#[tokio::test]
async fn test_document_scan_capped_at_1000() {
    let h = default_harness();

    let result = h
        .gateway
        .run_query(document_descriptor(), "events")
        .await
        .unwrap();

    assert_eq!(result.row_count(), 1000);
    assert_eq!(result.columns, vec!["_id", "name"]);
    assert_eq!(h.document.closes(), 1);
}

#[tokio::test]
async fn test_close_once_when_execute_fails_after_connect() {
    let h = harness(
        ScriptedConnector::new(DatabaseKind::SqlTable).with_fetch(FetchScript::fail(
            FailureSignal::code("1064"),
            "You have an error in your SQL syntax",
        )),
        ScriptedConnector::new(DatabaseKind::Document),
    );

    let response = h
        .gateway
        .execute_query(sql_descriptor("x"), "SELEC 1")
        .await;

    assert!(!response.success);
    assert_eq!(response.kind, Some(ErrorKind::Unknown));
    assert!(!response.message.unwrap().contains("syntax"));
    assert_eq!(h.sql.connects(), 1);
    assert_eq!(h.sql.closes(), 1);
}

#[tokio::test]
async fn test_close_once_when_execute_panics_after_connect() {
    let h = harness(
        ScriptedConnector::new(DatabaseKind::SqlTable),
        ScriptedConnector::new(DatabaseKind::Document).with_fetch(FetchScript::Panic),
    );

    let err = h
        .gateway
        .run_query(document_descriptor(), "events")
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Unknown);
    assert_eq!(h.document.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_host_times_out() {
    let h = harness(
        ScriptedConnector::new(DatabaseKind::SqlTable).with_connect(ConnectScript::Hang),
        ScriptedConnector::new(DatabaseKind::Document),
    );

    let started = tokio::time::Instant::now();
    let response = h.gateway.test_connection(&sql_descriptor("x")).await;

    assert!(!response.success);
    assert_eq!(
        response.message,
        "Connection timed out. Please verify the host and port are correct."
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_long_query_hits_query_timeout() {
    let h = harness(
        ScriptedConnector::new(DatabaseKind::SqlTable).with_fetch(FetchScript::Hang),
        ScriptedConnector::new(DatabaseKind::Document),
    );

    let err = h
        .gateway
        .run_query(sql_descriptor("x"), "SELECT SLEEP(3600)")
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(err.kind.is_retryable());
    assert_eq!(h.sql.closes(), 1);
}

#[tokio::test]
async fn test_refused_connection() {
    let h = harness(
        ScriptedConnector::new(DatabaseKind::SqlTable).with_connect(ConnectScript::fail(
            FailureSignal::io(io::ErrorKind::ConnectionRefused),
            "Connection refused (os error 111)",
        )),
        ScriptedConnector::new(DatabaseKind::Document),
    );

    let response = h.gateway.test_connection(&sql_descriptor("x")).await;
    assert!(!response.success);
    assert!(response.message.starts_with("Connection refused."));
}

#[tokio::test]
async fn test_host_not_found_from_driver_text() {
    let h = harness(
        ScriptedConnector::new(DatabaseKind::SqlTable),
        ScriptedConnector::new(DatabaseKind::Document).with_connect(ConnectScript::fail(
            FailureSignal::default(),
            "failed to lookup address information: Name or service not known",
        )),
    );

    let response = h.gateway.test_connection(&document_descriptor()).await;
    assert_eq!(
        response.message,
        "Host not found. Please check your connection string or host address."
    );
}

#[tokio::test]
async fn test_connection_success_messages() {
    let h = default_harness();

    let sql = h.gateway.test_connection(&sql_descriptor(PASSWORD)).await;
    assert!(sql.success);
    assert_eq!(sql.message, "Successfully connected to MySQL database");

    let document = h.gateway.test_connection(&document_descriptor()).await;
    assert!(document.success);
    assert_eq!(document.message, "Successfully connected to MongoDB database");
}

#[tokio::test]
async fn test_missing_adapter_is_unsupported_backend() {
    let sql = ScriptedConnector::new(DatabaseKind::SqlTable);
    let adapters = AdapterSet::empty().with_adapter(Arc::new(ScopedAdapter::new(
        sql,
        AdapterConfig::default(),
    )));
    let gateway = QueryGateway::new(
        vault(),
        Arc::new(InMemoryConnectionStore::new()),
        GatewayConfig::default(),
    )
    .with_adapters(adapters);

    let err = gateway
        .run_query(document_descriptor(), "events")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedBackendKind);
}

#[tokio::test]
async fn test_invalid_descriptor_never_connects() {
    let h = default_harness();
    let mut descriptor = sql_descriptor(PASSWORD);
    descriptor.host = "  ".to_string();
    descriptor.database = String::new();

    let err = h.gateway.run_query(descriptor, "SELECT 1").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidDescriptor);
    assert!(err.message.contains("database"));
    assert!(err.message.contains("host"));
    assert_eq!(h.sql.connects(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_are_independent() {
    let h = Arc::new(default_harness());

    let tasks: Vec<_> = (0..16)
        .map(|n| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let password = if n % 2 == 0 { PASSWORD } else { "wrong" };
                h.gateway
                    .execute_query(sql_descriptor(password), "SELECT 1")
                    .await
                    .success
            })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 8);
    assert_eq!(h.sql.open_sessions(), 0);
}
