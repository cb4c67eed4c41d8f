//! Credential vault and query gateway for ad-hoc database access.
//!
//! This crate lets a caller register credentials for a relational or document
//! database, verify reachability, and run one bounded query or collection
//! scan, getting back a uniform `{columns, rows}` result.
//!
//! # Security Guarantees
//! - Connection descriptors are encrypted at rest with AES-256-GCM under a
//!   key derived from an injected master secret (PBKDF2-HMAC-SHA256)
//! - Plaintext credentials never reach logs or caller-visible messages
//! - Destructive operations are rejected before any credential is decrypted
//! - Every backend connection is released on every exit path
//!
//! # Architecture
//! - [`gateway::QueryGateway`] is the only entry point other layers call
//! - [`adapters`] hide each backend behind the same scoped-connection contract
//! - [`classify`] turns raw failures into a closed, user-safe taxonomy

pub mod adapters;
pub mod classify;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod security;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use adapters::{AdapterConfig, AdapterSet, BackendAdapter, DOCUMENT_ROW_CAP};
pub use classify::{ClassifiedError, ErrorKind};
pub use error::{QueryGateError, Result};
pub use gateway::{
    ConnectionTarget, ExecuteQueryResponse, GatewayConfig, QueryGateway, RequestState,
    TestConnectionResponse,
};
pub use models::{ConnectionDescriptor, ConnectionOptions, DatabaseKind};
pub use normalize::{NormalizedResult, Row};
pub use security::{CredentialVault, Credentials, EncryptedBlob, MasterSecret, VaultParams};
pub use store::{ConnectionId, ConnectionStore, InMemoryConnectionStore, StoredConnection};
pub use validation::{DenylistValidator, QueryValidator, Rejection};
