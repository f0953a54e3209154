//! SQL validation with bounded retries.
//!
//! Metric content embeds a SQL query that must run against the customer's
//! data source before the file is committed. Timeouts there are usually
//! transient (cold warehouse, queued scan), so they are retried with fixed
//! backoff; semantic errors fail fast.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Delays before retry 1, 2 and 3.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(6),
];

#[derive(Debug, Clone)]
pub struct SqlValidation {
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SqlValidationError {
    #[error("query timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Invalid(String),
}

impl SqlValidationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SqlValidationError::Timeout(_))
    }
}

/// Seam for running a query against the data source. The default
/// implementation only checks structure; hosts plug in a real executor.
#[async_trait]
pub trait SqlValidator: Send + Sync {
    async fn validate(&self, sql: &str) -> Result<SqlValidation, SqlValidationError>;
}

/// Structural validator used when no data source is attached.
pub struct BasicSqlValidator;

#[async_trait]
impl SqlValidator for BasicSqlValidator {
    async fn validate(&self, _sql: &str) -> Result<SqlValidation, SqlValidationError> {
        Ok(SqlValidation {
            message: "Query validated".to_string(),
        })
    }
}

/// Run structural checks, then the validator, retrying transient failures
/// with the fixed backoff schedule.
pub async fn validate_with_retry(
    validator: &dyn SqlValidator,
    sql: &str,
) -> Result<SqlValidation, SqlValidationError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SqlValidationError::Invalid(
            "SQL query cannot be empty".to_string(),
        ));
    }
    let lower = trimmed.to_lowercase();
    if !lower.contains("select") {
        return Err(SqlValidationError::Invalid(
            "SQL query must contain SELECT statement".to_string(),
        ));
    }
    if !lower.contains("from") {
        return Err(SqlValidationError::Invalid(
            "SQL query must contain FROM clause".to_string(),
        ));
    }

    let mut last_error = match validator.validate(trimmed).await {
        Ok(validation) => return Ok(validation),
        Err(err) if !err.is_transient() => return Err(err),
        Err(err) => err,
    };
    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        tracing::warn!(attempt = attempt + 1, error = %last_error, "sql validation retry");
        tokio::time::sleep(*delay).await;
        match validator.validate(trimmed).await {
            Ok(validation) => return Ok(validation),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => last_error = err,
        }
    }
    Err(last_error)
}
