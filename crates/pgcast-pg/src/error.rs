use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Identifier, encode, size-limit, or decode failure from the pure layer.
    #[error(transparent)]
    Core(#[from] pgcast_core::Error),

    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("listener pool exhausted ({max} dedicated connections in use)")]
    PoolExhausted { max: usize },

    #[error("listener pool is closed")]
    PoolClosed,

    #[error("subscriptions not supported: {0}")]
    SubscriptionsUnsupported(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The unsubscribe command failed during teardown. The connection is
    /// still released; this is surfaced so a cleanup failure cannot silently
    /// mask a leak.
    #[error("cleanup for channel '{channel}' failed: {message}")]
    Cleanup { channel: String, message: String },
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        // Extract database error details if available
        if let Some(db_err) = e.as_db_error() {
            let msg = format!(
                "{}: {} (code: {})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            );
            Error::Postgres(msg)
        } else {
            Error::Postgres(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
