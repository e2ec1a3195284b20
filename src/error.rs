use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EnrichError {
    #[error("dbSNP request failed: {0}")]
    DbSnpHttp(String),

    #[error("dbSNP returned status {status}: {message}")]
    DbSnpStatus { status: u16, message: String },

    #[error("dbSNP request timed out: {0}")]
    DbSnpTimeout(String),

    #[error("unparseable dbSNP response: {0}")]
    ResponseShape(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("malformed record table: {0}")]
    Table(String),

    #[error("invalid input path: {0}")]
    InvalidInput(String),
}

impl EnrichError {
    /// Response-shape failures and timeouts are resolved by re-requesting at
    /// reduced batch granularity; everything else aborts the run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EnrichError::ResponseShape(_) | EnrichError::DbSnpTimeout(_)
        )
    }
}
