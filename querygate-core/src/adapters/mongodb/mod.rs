//! MongoDB adapter for the document backend.
//!
//! The operation string names a collection; `execute` scans it with an empty
//! filter and returns at most [`DOCUMENT_ROW_CAP`] documents as JSON maps.
//!
//! The driver connects lazily: building the client only parses options, and
//! the first network round trip happens in the probe or the scan. Both run
//! under the adapter deadlines, and the client is shut down on every path.
//!
//! # Security Guarantees
//! - All operations are read-only (`ping`, `find`)
//! - Connection strings are sanitized before logging

#[cfg(test)]
mod tests;

use super::{AdapterConfig, Connector, DOCUMENT_ROW_CAP, Session, build_uri};
use crate::error::{AdapterError, AdapterResult, FailureSignal};
use crate::models::{ConnectionDescriptor, DatabaseKind};
use crate::normalize::Row;
use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use mongodb::Client;
use mongodb::bson::{Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind};
use mongodb::options::{ClientOptions, FindOptions};
use serde_json::Value as JsonValue;

/// Connector for MongoDB deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl Connector for MongoConnector {
    type Session = MongoSession;

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Document
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        config: &AdapterConfig,
    ) -> AdapterResult<MongoSession> {
        let uri = build_uri(descriptor)?;
        tracing::debug!(target_uri = %uri, "Creating MongoDB client");

        let mut options = ClientOptions::parse(uri.expose()).await.map_err(|e| {
            if matches!(*e.kind, MongoErrorKind::InvalidArgument { .. }) {
                AdapterError::invalid_target("connection string rejected by MongoDB driver")
            } else {
                AdapterError::connect("resolving MongoDB connection string", signal_of(&e), e)
            }
        })?;

        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);
        options.max_pool_size = Some(1);
        options.app_name = Some(format!("querygate-{}", env!("CARGO_PKG_VERSION")));

        let database = if descriptor.database.trim().is_empty() {
            options
                .default_database
                .clone()
                .ok_or_else(|| AdapterError::invalid_target("no database selected"))?
        } else {
            descriptor.database.clone()
        };

        let client = Client::with_options(options).map_err(|e| {
            AdapterError::connect("creating MongoDB client", signal_of(&e), e)
        })?;

        Ok(MongoSession { client, database })
    }
}

/// One MongoDB client bound to a database.
#[derive(Debug)]
pub struct MongoSession {
    client: Client,
    database: String,
}

#[async_trait]
impl Session for MongoSession {
    async fn ping(&mut self) -> AdapterResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| AdapterError::connect("pinging MongoDB server", signal_of(&e), e))
    }

    async fn fetch(&mut self, operation: &str) -> AdapterResult<Vec<Row>> {
        let collection_name = operation.trim();
        if collection_name.is_empty() {
            return Err(AdapterError::invalid_target("collection name is empty"));
        }

        let options = FindOptions::builder()
            .limit(i64::try_from(DOCUMENT_ROW_CAP).unwrap_or(i64::MAX))
            .build();

        let cursor = self
            .client
            .database(&self.database)
            .collection::<Document>(collection_name)
            .find(doc! {})
            .with_options(options)
            .await
            .map_err(|e| AdapterError::execute("scanning collection", signal_of(&e), e))?;

        collect_documents(cursor, DOCUMENT_ROW_CAP)
            .await
            .map_err(|e| AdapterError::execute("reading documents", signal_of(&e), e))
    }

    async fn close(self) -> AdapterResult<()> {
        self.client.shutdown().await;
        Ok(())
    }
}

/// Drains at most `cap` documents from a cursor-like stream.
pub(crate) async fn collect_documents<S, E>(stream: S, cap: usize) -> Result<Vec<Row>, E>
where
    S: Stream<Item = Result<Document, E>>,
{
    stream
        .take(cap)
        .map_ok(|document| document_to_row(&document))
        .try_collect()
        .await
}

/// Converts a BSON document to a JSON map, keeping field order.
///
/// Special BSON types use their extended JSON shape, e.g. `{"$oid": "..."}`.
pub(crate) fn document_to_row(document: &Document) -> Row {
    match serde_json::to_value(document) {
        Ok(JsonValue::Object(map)) => map,
        _ => Row::new(),
    }
}

/// Extracts classification signals from a driver error.
pub(crate) fn signal_of(error: &MongoError) -> FailureSignal {
    match error.kind.as_ref() {
        MongoErrorKind::Authentication { .. } => FailureSignal::code("AuthenticationFailed"),
        MongoErrorKind::Command(command) => FailureSignal::code(command.code.to_string()),
        MongoErrorKind::Io(io) => FailureSignal::io(io.kind()),
        MongoErrorKind::DnsResolve { .. } => FailureSignal::code("ENOTFOUND"),
        _ => FailureSignal::default(),
    }
}
