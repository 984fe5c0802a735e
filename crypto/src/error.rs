use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid MAC key: {0}")]
    InvalidKey(String),
}
