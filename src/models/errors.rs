use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Upstream unavailable during {method}: {reason}")]
    UpstreamUnavailable { method: &'static str, reason: String },

    #[error("Transient fetch failure during {method} for {item}: {reason}")]
    TransientFetchFailure {
        method: &'static str,
        item: String,
        reason: String,
    },

    #[error("Token classification failed for transaction {tx_hash}: {reason}")]
    ClassificationFailure { tx_hash: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ScanError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn classification(tx_hash: impl ToString, reason: impl ToString) -> Self {
        Self::ClassificationFailure {
            tx_hash: tx_hash.to_string(),
            reason: reason.to_string(),
        }
    }

    pub const fn is_upstream_unavailable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}
