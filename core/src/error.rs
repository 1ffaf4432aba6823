use thiserror::Error;

/// Failure from a raw storage backend write.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("storage capacity exceeded: {needed} bytes needed, {quota} allowed")]
    CapacityExceeded { needed: usize, quota: usize },
    #[error("storage backend error: {0}")]
    Other(String),
}

impl BackendError {
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        // SQLITE_FULL is the only sqlite failure that means "out of room".
        if let rusqlite::Error::SqliteFailure(ref err, _) = e {
            if err.code == rusqlite::ErrorCode::DiskFull {
                return Self::CapacityExceeded {
                    needed: 0,
                    quota: 0,
                };
            }
        }
        Self::Other(e.to_string())
    }
}

/// Rejected store mutations. Storage failures themselves never surface here;
/// they resolve to a `WriteOutcome`.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("weight must be a positive number, got {0}")]
    InvalidWeight(f64),
    #[error("a template named '{0}' already exists")]
    TemplateExists(String),
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
    #[error("template name must not be empty")]
    EmptyTemplateName,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("backup is not valid JSON: {0}")]
    Parse(String),
    #[error("backup has an unexpected shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("sync code not found; pair this device again")]
    TokenNotFound,
    #[error("could not decrypt sync data; check the secret")]
    Decrypt,
    #[error("sync data is malformed: {0}")]
    Parse(String),
    #[error("device is not paired")]
    NotPaired,
    #[error("relay rejected the request: {0}")]
    Relay(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("ciphertext is not valid base64")]
    Encoding,
    #[error("ciphertext is too short")]
    Truncated,
    #[error("decryption failed")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
}

impl From<CryptoError> for SyncError {
    fn from(_: CryptoError) -> Self {
        Self::Decrypt
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("token not found")]
    TokenNotFound,
    #[error("invalid token format")]
    InvalidToken,
    #[error("ciphertext exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("updated_at is beyond the relay clock horizon ({horizon})")]
    TimestampAhead { horizon: i64 },
    #[error("could not allocate a unique token")]
    TokenSpaceExhausted,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
