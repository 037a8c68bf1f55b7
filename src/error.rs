use thiserror::Error;

use crate::ledger::TxHandle;

/// Failure reported by the ledger RPC surface itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerFault {
    /// The request never produced an answer (connection, timeout, malformed frame).
    #[error("ledger transport failure: {0}")]
    Transport(String),
    /// The ledger evaluated the call and refused it.
    #[error("ledger reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Reverted { reason: Option<String> },
    /// The method is not part of the published ledger interface.
    #[error("method `{0}` is not on the ledger interface")]
    Unsupported(String),
}

/// Failure talking to the off-ledger blob store.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob store request failed: {0}")]
    Transport(String),
    #[error("content `{0}` not found")]
    Missing(String),
    #[error("content is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("`{0}` does not reference any content")]
    BadReference(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Errors surfaced to gateway callers. Lookups of absent records return
/// `None` rather than an error.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("read `{operation}` failed: {source}")]
    LedgerRead {
        operation: &'static str,
        #[source]
        source: LedgerFault,
    },
    #[error("could not decode result of `{operation}`: {detail}")]
    Decode { operation: &'static str, detail: String },
    #[error("`{operation}` rejected: {}", .reason.as_deref().unwrap_or("no reason given"))]
    WriteRejected {
        operation: &'static str,
        reason: Option<String>,
    },
    #[error("`{operation}` not confirmed in time (tx {tx}); outcome unknown, do not resubmit blindly")]
    WriteTimedOut { operation: &'static str, tx: TxHandle },
    #[error("`{operation}` submission outcome unknown ({reason}); do not resubmit blindly")]
    WriteUnknown { operation: &'static str, reason: String },
    #[error("signer unavailable: {0}")]
    Signer(String),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("arithmetic overflow while preparing `{operation}`")]
    Arithmetic { operation: &'static str },
}

impl GatewayError {
    pub(crate) fn read(operation: &'static str, source: LedgerFault) -> Self {
        GatewayError::LedgerRead { operation, source }
    }

    pub(crate) fn decode(operation: &'static str, detail: impl Into<String>) -> Self {
        GatewayError::Decode {
            operation,
            detail: detail.into(),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
