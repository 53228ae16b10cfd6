//! Error types for Interlock.

use thiserror::Error;

/// Result type alias using InterlockError.
pub type Result<T> = std::result::Result<T, InterlockError>;

/// Errors that can occur in Interlock operations.
///
/// Every variant surfaces as a single `-1` line at the command
/// dispatcher; the variant itself is only visible in debug logs.
#[derive(Debug, Error)]
pub enum InterlockError {
    // I/O and storage errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage corrupted: {0}")]
    Corrupted(String),

    // Ordered-map errors
    #[error("key already exists")]
    AlreadyExists,

    #[error("key not found")]
    NotFound,

    // Session errors
    #[error("user not logged in")]
    NotLoggedIn,

    #[error("operation unauthorized")]
    Unauthorized,

    // Command argument errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Reservation errors
    #[error("requested tickets exceed train capacity")]
    CapacityExceeded,

    #[error("tickets sold out")]
    SoldOut,

    #[error("train already released")]
    AlreadyReleased,

    #[error("train not released")]
    NotReleased,

    #[error("order already refunded")]
    AlreadyRefunded,
}

impl InterlockError {
    /// Bad-input constructor used at the parsing boundary.
    pub fn invalid(msg: impl Into<String>) -> Self {
        InterlockError::InvalidArgument(msg.into())
    }
}
