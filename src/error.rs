use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("invalid property id: {0}")]
    InvalidPropertyId(String),

    #[error("label lookup for {label:?} failed after {attempts} attempts: {message}")]
    ResolutionTransportFailure {
        label: String,
        attempts: u32,
        message: String,
    },

    #[error("label lookup for {label:?} returned a malformed response: {message}")]
    ResolutionMalformedResponse { label: String, message: String },

    #[error("query service request failed: {0}")]
    QueryHttp(String),

    #[error("knowledge base write failed: {0}")]
    StoreWrite(String),

    #[error("knowledge base request failed: {0}")]
    WikibaseHttp(String),

    #[error("knowledge base returned status {status}: {message}")]
    WikibaseStatus { status: u16, message: String },

    #[error("knowledge base rejected the request ({code}): {info}")]
    WikibaseApi { code: String, info: String },

    #[error("knowledge base login failed: {0}")]
    WikibaseLogin(String),

    #[error("entity not found in knowledge base: {0}")]
    EntityNotFound(String),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read table: {0}")]
    TableRead(String),

    #[error("failed to write table: {0}")]
    TableWrite(String),
}

impl KiraError {
    /// Errors that only concern the current record; a batch keeps going after them.
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self,
            KiraError::MissingField(_)
                | KiraError::InvalidEntityId(_)
                | KiraError::TableRead(_)
                | KiraError::ResolutionMalformedResponse { .. }
                | KiraError::ResolutionTransportFailure { .. }
                | KiraError::StoreWrite(_)
                | KiraError::WikibaseApi { .. }
                | KiraError::WikibaseStatus { .. }
                | KiraError::WikibaseHttp(_)
                | KiraError::EntityNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failure_mentions_attempts() {
        let err = KiraError::ResolutionTransportFailure {
            label: "Escherichia coli K-12".to_string(),
            attempts: 4,
            message: "connection reset".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("4 attempts"));
        assert!(text.contains("Escherichia coli K-12"));
    }

    #[test]
    fn config_errors_stop_the_batch() {
        let err = KiraError::ConfigRead(PathBuf::from("missing/kira-kb.json"));
        assert!(!err.is_record_scoped());
        assert!(err.to_string().contains("missing/kira-kb.json"));
        assert!(!KiraError::ConfigParse("expected value".to_string()).is_record_scoped());
    }

    #[test]
    fn login_failure_is_not_record_scoped() {
        assert!(!KiraError::WikibaseLogin("bad password".to_string()).is_record_scoped());
        assert!(KiraError::MissingField("refseq_gene".to_string()).is_record_scoped());
    }
}
