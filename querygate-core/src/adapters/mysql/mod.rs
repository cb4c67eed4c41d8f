//! MySQL adapter for the sql_table backend.
//!
//! Opens a single `MySqlConnection` per call (no pool), probes it with
//! `COM_PING`, or runs the caller's statement and converts every row into an
//! ordered JSON map.
//!
//! # Security Guarantees
//! - Statement logging inside the driver is disabled
//! - Driver errors keep the server error number for classification and are
//!   never shown to callers


use super::{AdapterConfig, Connector, Session, build_uri};
use crate::error::{AdapterError, AdapterResult, FailureSignal};
use crate::models::{ConnectionDescriptor, DatabaseKind};
use crate::normalize::Row;
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{ConnectOptions, Connection, Row as _};
use std::str::FromStr;

/// Connector for MySQL-compatible servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlConnector;

#[async_trait]
impl Connector for MySqlConnector {
    type Session = MySqlSession;

    fn kind(&self) -> DatabaseKind {
        DatabaseKind::SqlTable
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        _config: &AdapterConfig,
    ) -> AdapterResult<MySqlSession> {
        let uri = build_uri(descriptor)?;
        let options = MySqlConnectOptions::from_str(uri.expose())
            .map_err(|_| AdapterError::invalid_target("connection URI rejected by MySQL driver"))?
            .disable_statement_logging();

        tracing::debug!(target_uri = %uri, "Opening MySQL connection");
        let conn = options.connect().await.map_err(|e| {
            AdapterError::connect("opening MySQL connection", signal_of(&e), e)
        })?;

        Ok(MySqlSession { conn })
    }
}

/// One open MySQL connection.
#[derive(Debug)]
pub struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl Session for MySqlSession {
    async fn ping(&mut self) -> AdapterResult<()> {
        self.conn
            .ping()
            .await
            .map_err(|e| AdapterError::connect("pinging MySQL server", signal_of(&e), e))
    }

    async fn fetch(&mut self, operation: &str) -> AdapterResult<Vec<Row>> {
        let rows = sqlx::query(operation)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| AdapterError::execute("running statement", signal_of(&e), e))?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn close(self) -> AdapterResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| AdapterError::execute("closing MySQL connection", signal_of(&e), e))
    }
}

/// Extracts the server error number or socket error kind from a driver error.
pub(crate) fn signal_of(error: &sqlx::Error) -> FailureSignal {
    match error {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(|mysql| FailureSignal::code(mysql.number().to_string()))
            .or_else(|| db.code().map(FailureSignal::code))
            .unwrap_or_default(),
        sqlx::Error::Io(io) => FailureSignal::io(io.kind()),
        sqlx::Error::PoolTimedOut => FailureSignal::io(std::io::ErrorKind::TimedOut),
        _ => FailureSignal::default(),
    }
}

/// Converts a row into a JSON map in column order.
fn row_to_json(row: &MySqlRow) -> Row {
    use sqlx::Column;

    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), extract_column_value(row, index));
    }
    map
}

/// Decodes one column, trying the common types in order of likelihood.
///
/// Values with no lossless JSON form (DECIMAL, JSON, BIT and the like) fall
/// back to their text encoding; binary data is base64.
fn extract_column_value(row: &MySqlRow, index: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::Bool);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index) {
        return v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return v.map_or(JsonValue::Null, |d| JsonValue::String(d.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(index) {
        return v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map_or(JsonValue::Null, |bytes| {
            JsonValue::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        });
    }
    if let Ok(v) = row.try_get_unchecked::<Option<String>, _>(index) {
        return v.map_or(JsonValue::Null, JsonValue::String);
    }

    JsonValue::Null
}
