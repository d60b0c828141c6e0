//! Error types for Zero-Knowledge proof operations.

use thiserror::Error;

/// Result type for ZK operations
pub type ZkResult<T> = std::result::Result<T, ZkError>;

/// Error types for Zero-Knowledge proof operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZkError {
    /// The proof, its encoding, or its public input did not check out
    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    /// Key material could not be read from disk
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Key material was present but malformed
    #[error("Key decoding failed: {0}")]
    KeyDecoding(String),

    /// Circuit-specific setup failed
    #[error("Setup failed: {0}")]
    SetupFailed(String),

    /// Proof generation failed
    #[error("Proof generation failed: {0}")]
    ProofGenerationFailed(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
