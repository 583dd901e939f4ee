//! Error types for chain resolution and market data subscriptions

use crate::provider::ProviderError;
use chrono::NaiveDate;
use common::{DateParseError, OptionSpec};
use std::path::PathBuf;
use thiserror::Error;

/// Chain store and resolver errors
#[derive(Debug, Error)]
pub enum ChainError {
    /// Requested expiration is not listed by the provider for this underlying
    #[error("{expiration} is not a valid expiration for {symbol}")]
    InvalidExpiration {
        /// Underlying symbol
        symbol: String,
        /// Rejected expiration
        expiration: NaiveDate,
    },

    /// Days-to-expiration offset leaves the calendar
    #[error("{days} days from {from} is out of range")]
    DateOutOfRange {
        /// Reference date
        from: NaiveDate,
        /// Requested offset
        days: i64,
    },

    /// Expiration given in venue encoding could not be parsed
    #[error(transparent)]
    MalformedExpiration(#[from] DateParseError),

    /// Provider refused to qualify a constructed option
    #[error("Provider rejected option {spec}")]
    QualificationRejected {
        /// The rejected option
        spec: Box<OptionSpec>,
    },

    /// Persisted record exists but cannot be decoded
    #[error("Corrupt chain record {}: {reason}", path.display())]
    PersistenceCorrupt {
        /// Record location
        path: PathBuf,
        /// Decoder message
        reason: String,
    },

    /// Provider connection is down
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider lists no chain parameters for the expected exchange
    #[error("No option chain parameters for {symbol} on {exchange}")]
    NoChainParameters {
        /// Underlying symbol
        symbol: String,
        /// Exchange that was expected
        exchange: String,
    },

    /// Any other provider failure
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// Filesystem failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Encoding a record failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<ProviderError> for ChainError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(msg) => Self::ProviderUnavailable(msg),
            other => Self::Provider(other),
        }
    }
}

/// Result type for chain operations
pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Market data subscription errors
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// Node already has an open subscription
    #[error("Already subscribed: {0}")]
    AlreadySubscribed(String),

    /// Provider refused or failed the request
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Readiness was not reached in time
    #[error("Timed out after {timeout_ms}ms waiting for {target}")]
    Timeout {
        /// What was being waited on
        target: String,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Market data stream ended before readiness
    #[error("Market data stream closed before {0} became ready")]
    StreamClosed(String),

    /// Unsubscribed before readiness was reported
    #[error("Subscription cancelled before it became ready")]
    Cancelled,
}

/// Result type for subscription operations
pub type SubscriptionResult<T> = std::result::Result<T, SubscriptionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_provider_maps_to_provider_unavailable() {
        let err: ChainError = ProviderError::Unavailable("socket closed".to_string()).into();
        assert!(matches!(err, ChainError::ProviderUnavailable(ref m) if m == "socket closed"));

        let err: ChainError = ProviderError::NotFound("XYZ".to_string()).into();
        assert!(matches!(err, ChainError::Provider(ProviderError::NotFound(_))));
    }

    #[test]
    fn test_error_messages() {
        let err = ChainError::InvalidExpiration {
            symbol: "ABC".to_string(),
            expiration: NaiveDate::from_ymd_opt(2024, 6, 22).unwrap(),
        };
        assert_eq!(err.to_string(), "2024-06-22 is not a valid expiration for ABC");

        let err = SubscriptionError::Timeout {
            target: "ABC 20240621 100C".to_string(),
            timeout_ms: 250,
        };
        assert!(err.to_string().contains("250ms"));
    }
}
