//! Shape unification of backend rows into `{columns, rows}`.

use serde::{Deserialize, Serialize};

/// One result row: field name to JSON value, in engine field order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Uniform tabular result.
///
/// `columns` is taken from the key set of the first row only. Rows with
/// different shapes are passed through as-is and are not reconciled into a
/// superset column list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    /// Column names, in the first row's field order
    pub columns: Vec<String>,
    /// Rows in backend return order
    pub rows: Vec<Row>,
}

impl NormalizedResult {
    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when the backend returned no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds a [`NormalizedResult`] from raw rows. No value coercion is applied.
pub fn normalize(rows: Vec<Row>) -> NormalizedResult {
    let columns = rows
        .first()
        .map(|first| first.keys().cloned().collect())
        .unwrap_or_default();
    NormalizedResult { columns, rows }
}
