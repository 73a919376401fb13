//! Error types for the gateway

use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Value model error
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// Ingestion error
    #[error("Ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    /// Query error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Time-series store errors
///
/// Every store failure is transient from the gateway's point of view: it is
/// logged and the affected unit (one batch, one key, one request) is
/// abandoned. Nothing here is retried automatically.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The HTTP request to the store failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store answered with a non-zero status code
    #[error("Store rejected statement (code {code}): {desc}")]
    Rejected {
        /// Store-specific error code
        code: i64,
        /// Store-provided description
        desc: String,
    },

    /// A response could not be decoded into rows
    #[error("Decode error: {0}")]
    Decode(String),

    /// A table or database identifier contains characters the store cannot accept
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The requested aggregate function is not supported by this store
    #[error("Unsupported aggregate function: {0}")]
    UnsupportedAggregate(String),

    /// Injected or backend-specific failure
    #[error("{0}")]
    Backend(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}

/// Value model errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    /// More than one typed column differs from its sentinel
    #[error("Ambiguous stored row: {populated} typed columns hold non-default values")]
    AmbiguousType {
        /// Number of non-default typed columns
        populated: usize,
    },

    /// The raw value is not a string, number or boolean
    #[error("Unsupported value type: {0}")]
    UnsupportedType(String),

    /// A text field is wider than its column
    #[error("{column} is {len} characters, column holds {max}")]
    TooLong {
        /// Physical column name
        column: &'static str,
        /// Length of the rejected text in characters
        len: usize,
        /// Column width
        max: usize,
    },
}

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestionError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Channel closed unexpectedly
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Shutdown error
    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Query errors
///
/// Returned by the history engines and surfaced to RPC callers as a
/// `status = 0` reply carrying the display string.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Time range validation failed
    #[error("Invalid time range: start {start} > end {end}")]
    InvalidTimeRange {
        /// Start timestamp (ms)
        start: i64,
        /// End timestamp (ms)
        end: i64,
    },

    /// A timestamp lies outside the representable calendar range
    #[error("Invalid time range: timestamp {0}ms is out of range")]
    TimestampOutOfRange(i64),

    /// Both pagination cursors were set
    #[error("Invalid cursor: first_data_time {first} and end_data_time {end} are both set")]
    InvalidCursor {
        /// Backward cursor (ms)
        first: i64,
        /// Forward cursor (ms)
        end: i64,
    },

    /// Aggregation window must be positive
    #[error("Invalid aggregate window: {0}ms")]
    InvalidWindow(i64),

    /// Aggregate function name is not a bare identifier
    #[error("Invalid aggregate function: {0:?}")]
    InvalidAggregateFunction(String),

    /// Required request field is missing or empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_into_query_error() {
        let err: QueryError = StoreError::Backend("boom".to_string()).into();
        assert_eq!(err.to_string(), "Store error: boom");
    }

    #[test]
    fn test_rejected_display() {
        let err = StoreError::Rejected {
            code: 9730,
            desc: "Table does not exist".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Store rejected statement (code 9730): Table does not exist"
        );
    }
}
