//! Error types for cryptographic operations.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Invalid magic bytes - not an encrypted asset file.
    #[error("Invalid magic bytes - not an encrypted asset file")]
    InvalidMagic,

    /// Payload shorter than its fixed-size framing.
    #[error("Truncated payload: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed - wrong key or corrupted data.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Key material has the wrong length or encoding.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Invalid keyfile format or size.
    #[error("Invalid keyfile: {0}")]
    InvalidKeyfile(String),

    /// Base64 decoding failed.
    #[error("Invalid base64: {0}")]
    Base64(String),

    /// Decrypted bytes are not valid UTF-8.
    #[error("Invalid UTF-8 in decrypted string")]
    Utf8,

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CryptoError::InvalidMagic;
        assert!(err.to_string().contains("magic bytes"));
    }

    #[test]
    fn test_truncated_display() {
        let err = CryptoError::Truncated {
            expected: 36,
            actual: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("36"));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let crypto_err: CryptoError = io_err.into();
        assert!(matches!(crypto_err, CryptoError::Io(_)));
    }
}
