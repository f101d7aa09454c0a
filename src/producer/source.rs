//! Recipient rows for document generation.
//!
//! A source turns a procedure identifier into `(recipient_address,
//! recipient_id)` rows. The libSQL source reads the first two columns of
//! the view or table the identifier names.

use std::sync::LazyLock;

use async_trait::async_trait;
use libsql::{Connection, Database, Value};
use regex::Regex;
use tracing::{debug, info};

use crate::error::ProducerError;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles")
});

/// One result row: who gets the document, and which id to fetch it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRow {
    pub recipient_address: String,
    pub recipient_id: String,
}

/// Yields recipient rows for a named procedure.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn rows(&self, procedure: &str) -> Result<Vec<RecipientRow>, ProducerError>;
}

/// Reject identifiers that could smuggle SQL into the query.
pub fn check_procedure(procedure: &str) -> Result<(), ProducerError> {
    if IDENTIFIER.is_match(procedure) {
        Ok(())
    } else {
        Err(ProducerError::InvalidProcedure(procedure.to_string()))
    }
}

/// libSQL-backed recipient source.
pub struct LibSqlSource {
    // Keeps the database alive for the connection.
    _db: Database,
    conn: Connection,
}

impl LibSqlSource {
    /// Open a local database file.
    pub async fn open(dsn: &str) -> Result<Self, ProducerError> {
        let db = libsql::Builder::new_local(dsn)
            .build()
            .await
            .map_err(|e| ProducerError::Source(format!("Failed to open {dsn}: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| ProducerError::Source(format!("Failed to create connection: {e}")))?;
        info!(dsn, "Recipient source opened");
        Ok(Self { _db: db, conn })
    }
}

#[async_trait]
impl RecipientSource for LibSqlSource {
    async fn rows(&self, procedure: &str) -> Result<Vec<RecipientRow>, ProducerError> {
        check_procedure(procedure)?;

        let sql = format!("SELECT * FROM \"{procedure}\"");
        let mut rows = self
            .conn
            .query(&sql, ())
            .await
            .map_err(|e| ProducerError::Source(format!("Executing {procedure} failed: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ProducerError::Source(format!("Reading {procedure} failed: {e}")))?
        {
            let address = row
                .get_value(0)
                .map_err(|e| ProducerError::Source(format!("Missing address column: {e}")))?;
            let id = row
                .get_value(1)
                .map_err(|e| ProducerError::Source(format!("Missing id column: {e}")))?;

            match (value_to_string(address), value_to_string(id)) {
                (Some(recipient_address), Some(recipient_id)) => out.push(RecipientRow {
                    recipient_address,
                    recipient_id,
                }),
                _ => debug!(procedure, "Skipping row with NULL address or id"),
            }
        }

        info!(procedure, rows = out.len(), "Fetched recipient rows");
        Ok(out)
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(b) => String::from_utf8(b).ok(),
    }
}
