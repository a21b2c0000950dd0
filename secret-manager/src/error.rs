use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretManagerError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("encryption failed for secret {0}")]
    EncryptionFailed(String),
    #[error("decryption failed for secret {0} (wrong master key or corrupted ciphertext)")]
    DecryptionFailed(String),
    #[error("secret {0} has expired")]
    Expired(String),
}

pub type SecretManagerResult<T> = Result<T, SecretManagerError>;
