//! Error types for mechanism operations

use thiserror::Error;

/// Errors that can occur while building populations or running auctions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid bid: {0}")]
    InvalidBid(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Mechanism property violated: {0}")]
    PropertyViolation(String),
}

/// A specialized Result type for mechanism operations
pub type Result<T> = std::result::Result<T, Error>;
