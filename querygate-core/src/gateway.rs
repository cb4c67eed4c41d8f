//! Query gateway: the single entry point other layers call.
//!
//! Every request walks a fixed state machine:
//!
//! ```text
//! Validating -> Decrypting -> Connecting -> Executing -> Normalizing -> Done
//!      \             \             \             \             \
//!       +-------------+-------------+-------------+-------------+--> Failed(kind)
//! ```
//!
//! The validator runs first, so a rejected operation never touches the store,
//! the vault or the network. Every failure leaves the gateway as a
//! [`ClassifiedError`]; raw driver errors never do.

use crate::adapters::{AdapterConfig, AdapterSet, BackendAdapter};
use crate::classify::{ClassifiedError, ErrorKind, classify};
use crate::error::QueryGateError;
use crate::models::ConnectionDescriptor;
use crate::normalize::{NormalizedResult, Row, normalize};
use crate::security::{CredentialVault, EncryptedBlob};
use crate::store::{ConnectionId, ConnectionStore, InMemoryConnectionStore, StoredConnection};
use crate::validation::{DenylistValidator, QueryValidator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Gateway-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Bound on connecting and liveness probes
    pub connect_timeout: Duration,
    /// Bound on query execution; `None` disables it
    pub query_timeout: Option<Duration>,
    /// Probe reachability before a connection is saved
    pub verify_on_save: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            query_timeout: Some(Duration::from_secs(30)),
            verify_on_save: true,
        }
    }
}

impl GatewayConfig {
    /// Deadlines handed to adapters.
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            connect_timeout: self.connect_timeout,
            query_timeout: self.query_timeout,
        }
    }
}

/// Per-request lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Operation is being screened
    Validating,
    /// Stored descriptor is being decrypted
    Decrypting,
    /// Adapter is opening a connection
    Connecting,
    /// Operation is running on the backend
    Executing,
    /// Raw rows are being shaped
    Normalizing,
    /// Result produced
    Done,
    /// Request ended with a classified failure
    Failed(ErrorKind),
}

impl RequestState {
    /// True for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use RequestState::{Connecting, Decrypting, Done, Executing, Failed, Normalizing, Validating};

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed(_))
                | (Validating, Decrypting)
                | (Decrypting, Connecting)
                | (Connecting, Executing)
                | (Executing, Normalizing)
                | (Normalizing, Done)
        )
    }
}

/// What a query runs against.
#[derive(Debug, Clone)]
pub enum ConnectionTarget {
    /// A saved connection, decrypted at use
    Saved(ConnectionId),
    /// A descriptor supplied directly by the caller
    Descriptor(ConnectionDescriptor),
}

impl From<ConnectionId> for ConnectionTarget {
    fn from(id: ConnectionId) -> Self {
        Self::Saved(id)
    }
}

impl From<ConnectionDescriptor> for ConnectionTarget {
    fn from(descriptor: ConnectionDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

/// Result of a reachability test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConnectionResponse {
    /// Whether the backend answered the probe
    pub success: bool,
    /// Success text or a classified failure message
    pub message: String,
}

/// Result of a query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQueryResponse {
    /// Whether the query produced a result
    pub success: bool,
    /// Column names on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    /// Rows on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    /// Classified failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Classified failure kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl From<Result<NormalizedResult, ClassifiedError>> for ExecuteQueryResponse {
    fn from(result: Result<NormalizedResult, ClassifiedError>) -> Self {
        match result {
            Ok(NormalizedResult { columns, rows }) => Self {
                success: true,
                columns: Some(columns),
                rows: Some(rows),
                ..Self::default()
            },
            Err(error) => Self {
                success: false,
                message: Some(error.message),
                kind: Some(error.kind),
                ..Self::default()
            },
        }
    }
}

/// Tracks one request's state and logs each transition.
struct RequestTracker {
    state: RequestState,
}

impl RequestTracker {
    fn new() -> Self {
        Self {
            state: RequestState::Validating,
        }
    }

    fn advance(&mut self, next: RequestState) {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = ?self.state, to = ?next, "Invalid request state transition");
        }
        tracing::debug!(from = ?self.state, to = ?next, "Request state transition");
        self.state = next;
    }

    fn fail(&mut self, error: ClassifiedError) -> ClassifiedError {
        self.advance(RequestState::Failed(error.kind));
        tracing::warn!(kind = %error.kind, "Request failed");
        error
    }
}

/// Orchestrates validator, vault, adapters, normalizer and classifier.
///
/// Holds no per-request state, so one gateway can serve any number of
/// concurrent requests.
pub struct QueryGateway {
    vault: Option<CredentialVault>,
    store: Arc<dyn ConnectionStore>,
    validator: Arc<dyn QueryValidator>,
    adapters: AdapterSet,
    config: GatewayConfig,
}

impl std::fmt::Debug for QueryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryGateway")
            .field("adapters", &self.adapters)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueryGateway {
    /// Gateway with the default denylist validator and every compiled-in
    /// backend driver.
    pub fn new(vault: CredentialVault, store: Arc<dyn ConnectionStore>, config: GatewayConfig) -> Self {
        Self {
            vault: Some(vault),
            store,
            validator: Arc::new(DenylistValidator::default()),
            adapters: AdapterSet::native(config.adapter_config()),
            config,
        }
    }

    /// Gateway for caller-supplied descriptors only.
    ///
    /// Has no vault and an empty store: saving fails with `Unknown` and
    /// saved ids resolve to `ConnectionNotFound`.
    pub fn for_descriptors(config: GatewayConfig) -> Self {
        Self {
            vault: None,
            store: Arc::new(InMemoryConnectionStore::new()),
            validator: Arc::new(DenylistValidator::default()),
            adapters: AdapterSet::native(config.adapter_config()),
            config,
        }
    }

    /// Replaces the operation validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn QueryValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the adapter set.
    #[must_use]
    pub fn with_adapters(mut self, adapters: AdapterSet) -> Self {
        self.adapters = adapters;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Probes a caller-supplied descriptor.
    ///
    /// The response message is either the engine success text or a catalog
    /// message; it never contains driver text or credentials.
    pub async fn test_connection(&self, descriptor: &ConnectionDescriptor) -> TestConnectionResponse {
        let span = request_span("test_connection");
        async {
            let response = match self.check_reachability(descriptor).await {
                Ok(()) => TestConnectionResponse {
                    success: true,
                    message: format!(
                        "Successfully connected to {} database",
                        descriptor.kind.engine_name()
                    ),
                },
                Err(error) => {
                    tracing::warn!(kind = %error.kind, "Connection test failed");
                    TestConnectionResponse {
                        success: false,
                        message: error.message,
                    }
                }
            };
            tracing::info!(success = response.success, "Connection test finished");
            response
        }
        .instrument(span)
        .await
    }

    /// Decrypts a saved connection and probes it.
    pub async fn test_saved_connection(&self, id: ConnectionId) -> TestConnectionResponse {
        match self.load_descriptor(id).await {
            Ok(descriptor) => self.test_connection(&descriptor).await,
            Err(error) => TestConnectionResponse {
                success: false,
                message: error.message,
            },
        }
    }

    /// Runs one operation and flattens the outcome into a response.
    pub async fn execute_query(
        &self,
        target: impl Into<ConnectionTarget>,
        operation: &str,
    ) -> ExecuteQueryResponse {
        self.run_query(target, operation).await.into()
    }

    /// Runs one operation through the full request state machine.
    ///
    /// # Errors
    /// Returns the classified failure of whichever stage stopped the request.
    pub async fn run_query(
        &self,
        target: impl Into<ConnectionTarget>,
        operation: &str,
    ) -> Result<NormalizedResult, ClassifiedError> {
        let target = target.into();
        let span = request_span("execute_query");
        self.run_tracked(target, operation).instrument(span).await
    }

    /// Validates, optionally verifies, encrypts and stores a descriptor.
    ///
    /// Nothing is stored if any step fails.
    ///
    /// # Errors
    /// `InvalidDescriptor` for bad input, the classified probe failure when
    /// verification is on, or `Unknown` if encryption or storage fails.
    pub async fn save_connection(
        &self,
        descriptor: ConnectionDescriptor,
    ) -> Result<ConnectionId, ClassifiedError> {
        let span = request_span("save_connection");
        async {
            descriptor.validate()?;
            self.vault()?;
            if self.config.verify_on_save {
                self.check_reachability(&descriptor).await?;
            }

            let kind = descriptor.kind;
            let name = descriptor.name.clone();
            let blob = self.encrypt_blocking(descriptor).await?;

            let record = StoredConnection::new(name, kind, blob);
            let id = record.id;
            self.store.put(record).await.map_err(|e| {
                tracing::warn!(error = %e, "Failed to store connection");
                ClassifiedError::new(ErrorKind::Unknown)
            })?;

            tracing::info!(connection_id = %id, backend = %kind, "Connection saved");
            Ok(id)
        }
        .instrument(span)
        .await
    }

    /// Deletes a saved connection.
    ///
    /// # Errors
    /// `ConnectionNotFound` for an unknown id, `Unknown` if the store fails.
    pub async fn remove_connection(&self, id: ConnectionId) -> Result<(), ClassifiedError> {
        match self.store.remove(id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ClassifiedError::new(ErrorKind::ConnectionNotFound)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to remove connection");
                Err(ClassifiedError::new(ErrorKind::Unknown))
            }
        }
    }

    async fn run_tracked(
        &self,
        target: ConnectionTarget,
        operation: &str,
    ) -> Result<NormalizedResult, ClassifiedError> {
        let mut request = RequestTracker::new();

        if let Err(rejection) = self.validator.validate(operation) {
            tracing::debug!(keyword = %rejection.keyword, "Operation rejected");
            return Err(request.fail(ClassifiedError::new(ErrorKind::Rejected)));
        }

        request.advance(RequestState::Decrypting);
        let descriptor = match target {
            ConnectionTarget::Saved(id) => self.load_descriptor(id).await,
            ConnectionTarget::Descriptor(descriptor) => Ok(descriptor),
        }
        .and_then(|descriptor| descriptor.validate().map(|()| descriptor))
        .map_err(|e| request.fail(e))?;

        let adapter = self.adapter_for(&descriptor).map_err(|e| request.fail(e))?;
        tracing::Span::current().record("backend", descriptor.kind.as_str());

        request.advance(RequestState::Connecting);
        let rows = match adapter.execute(&descriptor, operation).await {
            Ok(rows) => {
                request.advance(RequestState::Executing);
                rows
            }
            Err(error) => {
                if error.stage() == crate::error::Stage::Execute {
                    request.advance(RequestState::Executing);
                }
                tracing::debug!(error = %error, "Adapter failure");
                return Err(request.fail(classify(&error)));
            }
        };
        drop(descriptor);

        request.advance(RequestState::Normalizing);
        let result = normalize(rows);

        request.advance(RequestState::Done);
        tracing::info!(rows = result.row_count(), "Query finished");
        Ok(result)
    }

    async fn check_reachability(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<(), ClassifiedError> {
        descriptor.validate()?;
        let adapter = self.adapter_for(descriptor)?;
        tracing::Span::current().record("backend", descriptor.kind.as_str());

        adapter.test_reachability(descriptor).await.map_err(|error| {
            tracing::debug!(error = %error, "Adapter failure");
            classify(&error)
        })
    }

    fn adapter_for(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<&Arc<dyn BackendAdapter>, ClassifiedError> {
        self.adapters
            .get(descriptor.kind)
            .ok_or_else(|| ClassifiedError::new(ErrorKind::UnsupportedBackendKind))
    }

    async fn load_descriptor(&self, id: ConnectionId) -> Result<ConnectionDescriptor, ClassifiedError> {
        let record = self
            .store
            .get(id)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Failed to read connection store");
                ClassifiedError::new(ErrorKind::Unknown)
            })?
            .ok_or_else(|| ClassifiedError::new(ErrorKind::ConnectionNotFound))?;

        let descriptor = self.decrypt_blocking(record.blob).await?;
        if descriptor.kind != record.kind {
            tracing::warn!(connection_id = %id, "Stored kind does not match decrypted descriptor");
            return Err(ClassifiedError::new(ErrorKind::CredentialsCorrupt));
        }
        Ok(descriptor)
    }

    fn vault(&self) -> Result<&CredentialVault, ClassifiedError> {
        self.vault.as_ref().ok_or_else(|| {
            tracing::warn!("No credential vault configured");
            ClassifiedError::new(ErrorKind::Unknown)
        })
    }

    /// Key derivation is CPU bound, so the vault runs off the async workers.
    async fn decrypt_blocking(
        &self,
        blob: EncryptedBlob,
    ) -> Result<ConnectionDescriptor, ClassifiedError> {
        let vault = self.vault()?.clone();
        tokio::task::spawn_blocking(move || vault.decrypt(&blob))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Vault task failed");
                ClassifiedError::new(ErrorKind::Unknown)
            })?
            .map_err(|e: QueryGateError| {
                tracing::debug!(error = %e, "Vault rejected blob");
                ClassifiedError::new(ErrorKind::CredentialsCorrupt)
            })
    }

    async fn encrypt_blocking(
        &self,
        descriptor: ConnectionDescriptor,
    ) -> Result<EncryptedBlob, ClassifiedError> {
        let vault = self.vault()?.clone();
        tokio::task::spawn_blocking(move || vault.encrypt(&descriptor))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Vault task failed");
                ClassifiedError::new(ErrorKind::Unknown)
            })?
            .map_err(|e| {
                tracing::warn!(error = %e, "Failed to encrypt descriptor");
                ClassifiedError::new(ErrorKind::Unknown)
            })
    }
}

fn request_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!(
        "gateway_request",
        request_id = %Uuid::new_v4(),
        operation,
        backend = tracing::field::Empty,
    )
}
