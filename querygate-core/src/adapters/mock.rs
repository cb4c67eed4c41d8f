//! Scripted in-process connector for testing.
//!
//! Behaves like a driver without touching the network: each connect, probe,
//! fetch and close follows a script and is counted, so tests can observe
//! that sessions are released exactly once on every path.

use super::{AdapterConfig, Connector, Session};
use crate::error::{AdapterError, AdapterResult, FailureSignal};
use crate::models::{ConnectionDescriptor, DatabaseKind};
use crate::normalize::Row;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Driver-like error raised by scripted failures.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ScriptedFailure(String);

/// How a scripted connection attempt resolves.
#[derive(Debug, Clone, Default)]
pub enum ConnectScript {
    /// Always opens a session
    #[default]
    Accept,
    /// Opens a session only when the descriptor carries this password
    RequirePassword(String),
    /// Fails with the given signal and driver text
    Fail {
        /// Engine signal attached to the error
        signal: FailureSignal,
        /// Driver error text
        message: String,
    },
    /// Opens a session after the given delay
    Delay(Duration),
    /// Never completes
    Hang,
    /// Panics inside the connector
    Panic,
}

impl ConnectScript {
    /// Scripted connect failure.
    pub fn fail(signal: FailureSignal, message: impl Into<String>) -> Self {
        Self::Fail {
            signal,
            message: message.into(),
        }
    }
}

/// How a scripted operation resolves.
#[derive(Debug, Clone)]
pub enum FetchScript {
    /// Returns these rows
    Rows(Vec<Row>),
    /// Fails with the given signal and driver text
    Fail {
        /// Engine signal attached to the error
        signal: FailureSignal,
        /// Driver error text
        message: String,
    },
    /// Never completes
    Hang,
    /// Panics after the session is open
    Panic,
}

impl Default for FetchScript {
    fn default() -> Self {
        Self::Rows(Vec::new())
    }
}

impl FetchScript {
    /// Scripted operation failure.
    pub fn fail(signal: FailureSignal, message: impl Into<String>) -> Self {
        Self::Fail {
            signal,
            message: message.into(),
        }
    }

    /// `count` rows shaped `{"_id": n, "name": "item-n"}`.
    pub fn numbered(count: usize) -> Self {
        Self::Rows(
            (0..count)
                .map(|n| {
                    let mut row = Row::new();
                    row.insert("_id".to_string(), Value::from(n));
                    row.insert("name".to_string(), Value::from(format!("item-{n}")));
                    row
                })
                .collect(),
        )
    }
}

/// Call counters shared between a connector and its sessions.
#[derive(Debug, Default)]
pub struct SessionStats {
    connects: AtomicUsize,
    pings: AtomicUsize,
    fetches: AtomicUsize,
    closes: AtomicUsize,
}

impl SessionStats {
    /// Sessions successfully opened.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Liveness probes issued.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Operations issued.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Close calls observed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Sessions opened but not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.connects().saturating_sub(self.closes())
    }
}

/// Connector whose behavior is fixed at construction.
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    kind: DatabaseKind,
    connect: ConnectScript,
    fetch: FetchScript,
    ping_hangs: bool,
    close_fails: bool,
    stats: Arc<SessionStats>,
}

impl ScriptedConnector {
    /// Connector for `kind` that accepts every connection and returns no rows.
    pub fn new(kind: DatabaseKind) -> Self {
        Self {
            kind,
            connect: ConnectScript::default(),
            fetch: FetchScript::default(),
            ping_hangs: false,
            close_fails: false,
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Sets the connect behavior.
    #[must_use]
    pub fn with_connect(mut self, script: ConnectScript) -> Self {
        self.connect = script;
        self
    }

    /// Sets the operation behavior.
    #[must_use]
    pub fn with_fetch(mut self, script: FetchScript) -> Self {
        self.fetch = script;
        self
    }

    /// Makes every ping hang (after being counted).
    #[must_use]
    pub fn with_hanging_ping(mut self) -> Self {
        self.ping_hangs = true;
        self
    }

    /// Makes every close call report an error (after being counted).
    #[must_use]
    pub fn with_failing_close(mut self) -> Self {
        self.close_fails = true;
        self
    }

    /// Shared counters for this connector and its sessions.
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    fn login_rejected(&self, descriptor: &ConnectionDescriptor) -> AdapterError {
        let user = descriptor
            .credentials
            .as_ref()
            .map_or("", |creds| creds.username());
        let (signal, text) = match self.kind {
            DatabaseKind::SqlTable => (
                FailureSignal::code("1045"),
                format!(
                    "Access denied for user '{user}'@'{}' (using password: YES)",
                    descriptor.host
                ),
            ),
            DatabaseKind::Document => (
                FailureSignal::code("18"),
                format!("Authentication failed for user {user}"),
            ),
        };
        AdapterError::connect("authenticating", signal, ScriptedFailure(text))
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        _config: &AdapterConfig,
    ) -> AdapterResult<ScriptedSession> {
        match &self.connect {
            ConnectScript::Accept => {}
            ConnectScript::RequirePassword(expected) => {
                let given = descriptor
                    .credentials
                    .as_ref()
                    .and_then(|creds| creds.expose_password());
                if given != Some(expected.as_str()) {
                    return Err(self.login_rejected(descriptor));
                }
            }
            ConnectScript::Fail { signal, message } => {
                return Err(AdapterError::connect(
                    "opening scripted connection",
                    signal.clone(),
                    ScriptedFailure(message.clone()),
                ));
            }
            ConnectScript::Delay(delay) => tokio::time::sleep(*delay).await,
            ConnectScript::Hang => futures::future::pending::<()>().await,
            #[allow(clippy::panic)]
            ConnectScript::Panic => panic!("scripted connector fault"),
        }

        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            fetch: self.fetch.clone(),
            ping_hangs: self.ping_hangs,
            close_fails: self.close_fails,
            stats: Arc::clone(&self.stats),
        })
    }
}

/// Session opened by [`ScriptedConnector`].
#[derive(Debug)]
pub struct ScriptedSession {
    fetch: FetchScript,
    ping_hangs: bool,
    close_fails: bool,
    stats: Arc<SessionStats>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn ping(&mut self) -> AdapterResult<()> {
        self.stats.pings.fetch_add(1, Ordering::SeqCst);
        if self.ping_hangs {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn fetch(&mut self, _operation: &str) -> AdapterResult<Vec<Row>> {
        self.stats.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.fetch {
            FetchScript::Rows(rows) => Ok(rows.clone()),
            FetchScript::Fail { signal, message } => Err(AdapterError::execute(
                "running scripted operation",
                signal.clone(),
                ScriptedFailure(message.clone()),
            )),
            FetchScript::Hang => futures::future::pending().await,
            #[allow(clippy::panic)]
            FetchScript::Panic => panic!("scripted session fault"),
        }
    }

    async fn close(self) -> AdapterResult<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        if self.close_fails {
            return Err(AdapterError::execute(
                "closing scripted connection",
                FailureSignal::default(),
                ScriptedFailure("connection reset by peer".to_string()),
            ));
        }
        Ok(())
    }
}

/// Builds a [`Row`] from a JSON object; any other value becomes `{"value": v}`.
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(password: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new(DatabaseKind::SqlTable, "db.internal", "app")
            .with_credentials("reader", Some(password.to_string()))
    }

    #[tokio::test]
    async fn test_require_password() {
        let connector = ScriptedConnector::new(DatabaseKind::SqlTable)
            .with_connect(ConnectScript::RequirePassword("right".to_string()));
        let config = AdapterConfig::default();

        assert!(connector.connect(&descriptor("right"), &config).await.is_ok());

        let err = connector
            .connect(&descriptor("wrong"), &config)
            .await
            .unwrap_err();
        assert_eq!(err.signal(), Some(&FailureSignal::code("1045")));
        assert!(!err.to_string().contains("wrong"));
        assert_eq!(connector.stats().connects(), 1);
    }

    #[tokio::test]
    async fn test_session_counters() {
        let connector = ScriptedConnector::new(DatabaseKind::Document)
            .with_fetch(FetchScript::Rows(vec![row(json!({"a": 1}))]));
        let stats = connector.stats();

        let mut session = connector
            .connect(&descriptor("x"), &AdapterConfig::default())
            .await
            .unwrap();
        session.ping().await.unwrap();
        assert_eq!(session.fetch("things").await.unwrap().len(), 1);
        assert_eq!(stats.open_sessions(), 1);
        session.close().await.unwrap();

        assert_eq!(stats.pings(), 1);
        assert_eq!(stats.fetches(), 1);
        assert_eq!(stats.open_sessions(), 0);
    }

    #[test]
    fn test_row_helper() {
        assert_eq!(row(json!({"a": 1}))["a"], 1);
        assert_eq!(row(json!(5))["value"], 5);
    }

    #[test]
    fn test_numbered_rows() {
        let FetchScript::Rows(rows) = FetchScript::numbered(3) else {
            unreachable!("numbered always yields rows");
        };
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2]["name"], "item-2");
    }
}
