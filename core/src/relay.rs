//! Blob Relay: one opaque ciphertext per pairing token. The relay never sees
//! plaintext or the secret.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, SyncError};
use crate::sync::RelayTransport;

pub const TOKEN_LEN: usize = 6;
/// No I, O, S, 0 or 1.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRTUVWXYZ23456789";
pub const MAX_CIPHERTEXT_BYTES: usize = 4 * 1024 * 1024;
/// How far past the relay's own clock a push may be stamped.
pub const MAX_CLOCK_SKEW_MS: i64 = 24 * 60 * 60 * 1000;
const MAX_CREATE_ATTEMPTS: usize = 16;

#[must_use]
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| char::from(TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())]))
        .collect()
}

/// Trim and uppercase a user-typed token; `None` if it cannot be one.
#[must_use]
pub fn normalize_token(raw: &str) -> Option<String> {
    let token = raw.trim().to_ascii_uppercase();
    let valid = token.len() == TOKEN_LEN && token.bytes().all(|b| TOKEN_ALPHABET.contains(&b));
    valid.then_some(token)
}

// --- Wire types ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    pub ciphertext: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub accepted: bool,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl PullResponse {
    #[must_use]
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            ciphertext: None,
            updated_at: None,
        }
    }
}

// --- Storage ---

pub struct BlobRelay {
    conn: Connection,
}

impl BlobRelay {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open relay database: {}", path.display()))?;
        let relay = BlobRelay { conn };
        relay.migrate()?;
        Ok(relay)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let relay = BlobRelay { conn };
        relay.migrate()?;
        Ok(relay)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sync_blobs (
                    token TEXT PRIMARY KEY,
                    ciphertext TEXT NOT NULL DEFAULT '',
                    updated_at INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );
                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    fn check_token(token: &str) -> Result<(), RelayError> {
        if normalize_token(token).as_deref() == Some(token) {
            Ok(())
        } else {
            Err(RelayError::InvalidToken)
        }
    }

    fn stored_updated_at(&self, token: &str) -> Result<i64, RelayError> {
        self.conn
            .query_row(
                "SELECT updated_at FROM sync_blobs WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(RelayError::TokenNotFound)
    }

    /// Mint a fresh slot with an empty ciphertext.
    pub fn create(&self) -> Result<String, RelayError> {
        let now = chrono::Utc::now().to_rfc3339();
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let token = generate_token();
            let inserted = self.conn.execute(
                "INSERT OR IGNORE INTO sync_blobs (token, ciphertext, updated_at, created_at)
                 VALUES (?1, '', 0, ?2)",
                params![token, now],
            )?;
            if inserted == 1 {
                tracing::info!(token, "created sync slot");
                return Ok(token);
            }
            tracing::debug!(token, "token collision, retrying");
        }
        Err(RelayError::TokenSpaceExhausted)
    }

    /// Overwrite the blob only with a strictly newer stamp.
    pub fn push(
        &self,
        token: &str,
        ciphertext: &str,
        updated_at: i64,
    ) -> Result<PushResponse, RelayError> {
        Self::check_token(token)?;
        if ciphertext.len() > MAX_CIPHERTEXT_BYTES {
            return Err(RelayError::PayloadTooLarge {
                limit: MAX_CIPHERTEXT_BYTES,
            });
        }
        let horizon = chrono::Utc::now().timestamp_millis() + MAX_CLOCK_SKEW_MS;
        if updated_at > horizon {
            return Err(RelayError::TimestampAhead { horizon });
        }
        let stored = self.stored_updated_at(token)?;
        if updated_at <= stored {
            tracing::info!(token, updated_at, stored, "refused stale push");
            return Ok(PushResponse {
                accepted: false,
                updated_at: stored,
            });
        }
        self.conn.execute(
            "UPDATE sync_blobs SET ciphertext = ?1, updated_at = ?2 WHERE token = ?3",
            params![ciphertext, updated_at, token],
        )?;
        tracing::debug!(token, updated_at, bytes = ciphertext.len(), "stored blob");
        Ok(PushResponse {
            accepted: true,
            updated_at,
        })
    }

    pub fn pull(&self, token: &str, since: Option<i64>) -> Result<PullResponse, RelayError> {
        Self::check_token(token)?;
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT ciphertext, updated_at FROM sync_blobs WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (ciphertext, updated_at) = row.ok_or(RelayError::TokenNotFound)?;

        // A slot nobody has pushed to yet has nothing to offer.
        if updated_at == 0 || since.is_some_and(|s| s >= updated_at) {
            return Ok(PullResponse::unchanged());
        }
        Ok(PullResponse {
            changed: true,
            ciphertext: Some(ciphertext),
            updated_at: Some(updated_at),
        })
    }

    pub fn unpair(&self, token: &str) -> Result<(), RelayError> {
        Self::check_token(token)?;
        let deleted = self
            .conn
            .execute("DELETE FROM sync_blobs WHERE token = ?1", params![token])?;
        if deleted == 0 {
            return Err(RelayError::TokenNotFound);
        }
        tracing::info!(token, "deleted sync slot");
        Ok(())
    }
}

impl From<RelayError> for SyncError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::TokenNotFound => SyncError::TokenNotFound,
            other => SyncError::Relay(other.to_string()),
        }
    }
}

/// In-process transport over a shared `BlobRelay`.
#[derive(Clone)]
pub struct LocalRelay {
    relay: Arc<Mutex<BlobRelay>>,
}

impl LocalRelay {
    #[must_use]
    pub fn new(relay: Arc<Mutex<BlobRelay>>) -> Self {
        Self { relay }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Mutex::new(BlobRelay::open_in_memory()?))))
    }

    fn with<T>(&self, f: impl FnOnce(&BlobRelay) -> Result<T, RelayError>) -> Result<T, SyncError> {
        let relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner);
        f(&relay).map_err(SyncError::from)
    }
}

impl RelayTransport for LocalRelay {
    async fn create(&self) -> Result<String, SyncError> {
        self.with(BlobRelay::create)
    }

    async fn push(
        &self,
        token: &str,
        ciphertext: &str,
        updated_at: i64,
    ) -> Result<PushResponse, SyncError> {
        self.with(|r| r.push(token, ciphertext, updated_at))
    }

    async fn pull(&self, token: &str, since: Option<i64>) -> Result<PullResponse, SyncError> {
        self.with(|r| r.pull(token, since))
    }

    async fn unpair(&self, token: &str) -> Result<(), SyncError> {
        self.with(|r| r.unpair(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        for _ in 0..50 {
            let token = generate_token();
            assert_eq!(token.len(), TOKEN_LEN);
            assert!(normalize_token(&token).is_some());
            assert!(!token.contains(['I', 'O', 'S', '0', '1']));
        }
        assert_eq!(TOKEN_ALPHABET.len(), 31);
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token(" abc234 ").as_deref(), Some("ABC234"));
        assert_eq!(normalize_token("ABC23"), None);
        assert_eq!(normalize_token("ABC230"), None);
        assert_eq!(normalize_token("ABCSSS"), None);
    }

    #[test]
    fn test_create_push_pull() {
        let relay = BlobRelay::open_in_memory().unwrap();
        let token = relay.create().unwrap();

        assert_eq!(relay.pull(&token, None).unwrap(), PullResponse::unchanged());

        let ack = relay.push(&token, "blob-1", 1000).unwrap();
        assert!(ack.accepted);

        let pulled = relay.pull(&token, None).unwrap();
        assert!(pulled.changed);
        assert_eq!(pulled.ciphertext.as_deref(), Some("blob-1"));
        assert_eq!(pulled.updated_at, Some(1000));

        assert!(!relay.pull(&token, Some(1000)).unwrap().changed);
        assert!(!relay.pull(&token, Some(2000)).unwrap().changed);
        assert!(relay.pull(&token, Some(999)).unwrap().changed);
    }

    #[test]
    fn test_stale_push_refused() {
        let relay = BlobRelay::open_in_memory().unwrap();
        let token = relay.create().unwrap();
        relay.push(&token, "new", 2000).unwrap();

        let ack = relay.push(&token, "old", 1000).unwrap();
        assert_eq!(ack, PushResponse {
            accepted: false,
            updated_at: 2000
        });
        assert_eq!(
            relay.pull(&token, None).unwrap().ciphertext.as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_equal_stamp_refused() {
        let relay = BlobRelay::open_in_memory().unwrap();
        let token = relay.create().unwrap();
        assert!(relay.push(&token, "device-a", 5000).unwrap().accepted);

        let ack = relay.push(&token, "device-b", 5000).unwrap();
        assert!(!ack.accepted);
        assert_eq!(ack.updated_at, 5000);
        assert_eq!(
            relay.pull(&token, None).unwrap().ciphertext.as_deref(),
            Some("device-a")
        );
    }

    #[test]
    fn test_far_future_stamp_rejected() {
        let relay = BlobRelay::open_in_memory().unwrap();
        let token = relay.create().unwrap();
        assert!(matches!(
            relay.push(&token, "x", i64::MAX),
            Err(RelayError::TimestampAhead { .. })
        ));
        let soon = chrono::Utc::now().timestamp_millis() + 60_000;
        assert!(relay.push(&token, "x", soon).unwrap().accepted);
    }

    #[test]
    fn test_unknown_and_invalid_tokens() {
        let relay = BlobRelay::open_in_memory().unwrap();
        assert!(matches!(
            relay.push("ABCDEF", "x", 1),
            Err(RelayError::TokenNotFound)
        ));
        assert!(matches!(
            relay.pull("ABCDEF", None),
            Err(RelayError::TokenNotFound)
        ));
        assert!(matches!(
            relay.pull("abc", None),
            Err(RelayError::InvalidToken)
        ));
        assert!(matches!(relay.unpair("ABCDEF"), Err(RelayError::TokenNotFound)));
    }

    #[test]
    fn test_oversized_push_rejected() {
        let relay = BlobRelay::open_in_memory().unwrap();
        let token = relay.create().unwrap();
        let big = "x".repeat(MAX_CIPHERTEXT_BYTES + 1);
        assert!(matches!(
            relay.push(&token, &big, 1),
            Err(RelayError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_unpair_deletes_row() {
        let relay = BlobRelay::open_in_memory().unwrap();
        let token = relay.create().unwrap();
        relay.unpair(&token).unwrap();
        assert!(matches!(
            relay.pull(&token, None),
            Err(RelayError::TokenNotFound)
        ));
    }

    #[test]
    fn test_relay_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        let token = {
            let relay = BlobRelay::open(&path).unwrap();
            let token = relay.create().unwrap();
            relay.push(&token, "kept", 5).unwrap();
            token
        };
        let relay = BlobRelay::open(&path).unwrap();
        assert_eq!(
            relay.pull(&token, None).unwrap().ciphertext.as_deref(),
            Some("kept")
        );
    }

    #[tokio::test]
    async fn test_local_relay_maps_errors() {
        let relay = LocalRelay::in_memory().unwrap();
        assert_eq!(
            relay.pull("ABCDEF", None).await,
            Err(SyncError::TokenNotFound)
        );
        let token = relay.create().await.unwrap();
        assert!(relay.push(&token, "c", 1).await.unwrap().accepted);
    }
}
