//! Backend adapters with scoped, one-shot connections.
//!
//! An adapter opens a fresh connection per call, runs exactly one operation
//! (a liveness probe or the caller's statement), and closes the connection
//! before returning. There is no pool and no state shared between calls.
//!
//! Drivers plug in through two small traits:
//! - [`Connector`] turns a descriptor into an open [`Session`]
//! - [`Session`] runs a probe or a fetch and can be closed
//!
//! [`ScopedAdapter`] wraps any connector into a [`BackendAdapter`] and owns
//! the deadlines and the release path, so driver code never has to.
//!
//! # Security Guarantees
//! - Every opened session is closed exactly once, on success, on error, on
//!   timeout and when the operation panics
//! - Connection URIs are only logged after redaction
//!
//! # Module Structure
//! - `uri`: descriptor to connection URI builder
//! - `mock`: scripted in-process connector (`test-util` feature)
//! - Engine modules (`mysql`, `mongodb`), feature-gated

use crate::error::{AdapterError, AdapterResult, Stage};
use crate::models::{ConnectionDescriptor, DatabaseKind};
use crate::normalize::Row;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod uri;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use uri::{ConnectionUri, build_uri};

/// Hard ceiling on rows returned by a document scan.
pub const DOCUMENT_ROW_CAP: usize = 1000;

/// Deadlines applied to one adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Single budget covering connection establishment and the liveness ping
    pub connect_timeout: Duration,
    /// Bound on the caller's operation; `None` disables the deadline
    pub query_timeout: Option<Duration>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            query_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// One backend family, as seen by the gateway.
///
/// Object safe; the gateway holds adapters as `Arc<dyn BackendAdapter>`.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Backend family served by this adapter.
    fn kind(&self) -> DatabaseKind;

    /// Opens a connection, runs a liveness probe, and closes it.
    ///
    /// # Errors
    /// Returns the raw adapter failure; the gateway classifies it.
    async fn test_reachability(&self, descriptor: &ConnectionDescriptor) -> AdapterResult<()>;

    /// Opens a connection, runs one operation, and closes it.
    ///
    /// For the sql_table kind `operation` is a full statement; for the
    /// document kind it is a collection name.
    ///
    /// # Errors
    /// Returns the raw adapter failure; the gateway classifies it.
    async fn execute(
        &self,
        descriptor: &ConnectionDescriptor,
        operation: &str,
    ) -> AdapterResult<Vec<Row>>;
}

/// Opens driver sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open connection type.
    type Session: Session;

    /// Backend family this connector speaks.
    fn kind(&self) -> DatabaseKind;

    /// Establishes a connection for `descriptor`.
    ///
    /// # Errors
    /// Returns `AdapterError::Connect` or `AdapterError::InvalidTarget`.
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &AdapterConfig,
    ) -> AdapterResult<Self::Session>;
}

/// One open backend connection.
#[async_trait]
pub trait Session: Send + Sized + 'static {
    /// Lightweight liveness probe.
    async fn ping(&mut self) -> AdapterResult<()>;

    /// Runs one operation and returns engine-ordered rows.
    async fn fetch(&mut self, operation: &str) -> AdapterResult<Vec<Row>>;

    /// Releases the connection.
    async fn close(self) -> AdapterResult<()>;
}

/// What a scoped call does with its session.
#[derive(Debug, Clone, Copy)]
enum SessionOp<'a> {
    Ping,
    Fetch(&'a str),
}

impl SessionOp<'_> {
    const fn stage(&self) -> Stage {
        match self {
            Self::Ping => Stage::Connect,
            Self::Fetch(_) => Stage::Execute,
        }
    }
}

/// Adapter that owns connect, deadline and release for a [`Connector`].
#[derive(Debug, Clone)]
pub struct ScopedAdapter<C> {
    connector: C,
    config: AdapterConfig,
}

impl<C: Connector> ScopedAdapter<C> {
    /// Wraps a connector with the given deadlines.
    pub fn new(connector: C, config: AdapterConfig) -> Self {
        Self { connector, config }
    }

    /// Deadlines in effect.
    pub fn config(&self) -> AdapterConfig {
        self.config
    }

    /// Underlying connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    async fn run(
        &self,
        descriptor: &ConnectionDescriptor,
        op: SessionOp<'_>,
    ) -> AdapterResult<Vec<Row>> {
        let kind = self.connector.kind();
        let connect_timeout = self.config.connect_timeout;
        // Connect and ping share one budget.
        let connect_deadline = Instant::now()
            .checked_add(connect_timeout)
            .unwrap_or_else(far_future);

        let connecting = AssertUnwindSafe(self.connector.connect(descriptor, &self.config));
        let mut session =
            match tokio::time::timeout_at(connect_deadline, connecting.catch_unwind()).await {
                Err(_) => return Err(AdapterError::timeout(Stage::Connect, connect_timeout)),
                Ok(Err(_)) => {
                    tracing::warn!(backend = %kind, "Connector panicked while connecting");
                    return Err(AdapterError::Fault {
                        stage: Stage::Connect,
                    });
                }
                Ok(Ok(result)) => result?,
            };
        tracing::debug!(backend = %kind, "Session opened");

        let stage = op.stage();
        let (deadline, limit) = match op {
            SessionOp::Ping => (Some(connect_deadline), connect_timeout),
            SessionOp::Fetch(_) => match self.config.query_timeout {
                Some(limit) => (
                    Some(Instant::now().checked_add(limit).unwrap_or_else(far_future)),
                    limit,
                ),
                None => (None, Duration::ZERO),
            },
        };

        let outcome = {
            let work = AssertUnwindSafe(async {
                match op {
                    SessionOp::Ping => session.ping().await.map(|()| Vec::new()),
                    SessionOp::Fetch(operation) => session.fetch(operation).await,
                }
            })
            .catch_unwind();

            match deadline {
                Some(at) => tokio::time::timeout_at(at, work)
                    .await
                    .unwrap_or_else(|_| Ok(Err(AdapterError::timeout(stage, limit)))),
                None => work.await,
            }
        };

        let outcome = outcome.unwrap_or_else(|_| {
            tracing::warn!(backend = %kind, %stage, "Session panicked");
            Err(AdapterError::Fault { stage })
        });

        match AssertUnwindSafe(session.close()).catch_unwind().await {
            Ok(Ok(())) => tracing::debug!(backend = %kind, "Session closed"),
            Ok(Err(e)) => tracing::warn!(backend = %kind, error = %e, "Session close failed"),
            Err(_) => tracing::warn!(backend = %kind, "Session panicked while closing"),
        }

        let mut rows = outcome?;
        if kind == DatabaseKind::Document && rows.len() > DOCUMENT_ROW_CAP {
            rows.truncate(DOCUMENT_ROW_CAP);
        }
        Ok(rows)
    }
}

#[async_trait]
impl<C: Connector> BackendAdapter for ScopedAdapter<C> {
    fn kind(&self) -> DatabaseKind {
        self.connector.kind()
    }

    async fn test_reachability(&self, descriptor: &ConnectionDescriptor) -> AdapterResult<()> {
        self.run(descriptor, SessionOp::Ping).await.map(|_| ())
    }

    async fn execute(
        &self,
        descriptor: &ConnectionDescriptor,
        operation: &str,
    ) -> AdapterResult<Vec<Row>> {
        self.run(descriptor, SessionOp::Fetch(operation)).await
    }
}

/// Deadline used when `now + timeout` overflows the clock.
fn far_future() -> Instant {
    Instant::now()
        .checked_add(Duration::from_secs(31_536_000))
        .unwrap_or_else(Instant::now)
}

/// One adapter slot per backend kind.
///
/// A kind with no adapter (feature compiled out, or not injected) is
/// reported by the gateway as `UnsupportedBackendKind`.
#[derive(Clone, Default)]
pub struct AdapterSet {
    sql_table: Option<Arc<dyn BackendAdapter>>,
    document: Option<Arc<dyn BackendAdapter>>,
}

impl AdapterSet {
    /// Set with no adapters.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set holding every driver compiled into this build.
    pub fn native(config: AdapterConfig) -> Self {
        #[allow(unused_mut)]
        let mut set = Self::empty();
        #[cfg(feature = "mysql")]
        {
            set = set.with_adapter(Arc::new(ScopedAdapter::new(self::mysql::MySqlConnector, config)));
        }
        #[cfg(feature = "mongodb")]
        {
            set = set.with_adapter(Arc::new(ScopedAdapter::new(self::mongodb::MongoConnector, config)));
        }
        #[cfg(not(any(feature = "mysql", feature = "mongodb")))]
        let _ = config;
        set
    }

    /// Installs `adapter` in the slot for its kind, replacing any previous one.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        match adapter.kind() {
            DatabaseKind::SqlTable => self.sql_table = Some(adapter),
            DatabaseKind::Document => self.document = Some(adapter),
        }
        self
    }

    /// Adapter for `kind`, if one is installed.
    pub fn get(&self, kind: DatabaseKind) -> Option<&Arc<dyn BackendAdapter>> {
        match kind {
            DatabaseKind::SqlTable => self.sql_table.as_ref(),
            DatabaseKind::Document => self.document.as_ref(),
        }
    }

    /// Kinds with an installed adapter.
    pub fn kinds(&self) -> Vec<DatabaseKind> {
        DatabaseKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_some())
            .collect()
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}
