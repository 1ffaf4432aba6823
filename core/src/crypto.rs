use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::{Rng, RngCore};

use crate::error::CryptoError;

pub const NONCE_SIZE: usize = 24;
pub const SECRET_LEN: usize = 16;
pub const SECRET_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

const KDF_CONTEXT: &str = "boilerfuel 2024 sync snapshot key";

pub type SymmetricKey = [u8; 32];

/// New pairing secret. It never leaves the device except through the user.
#[must_use]
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    (0..SECRET_LEN)
        .map(|_| char::from(SECRET_ALPHABET[rng.random_range(0..SECRET_ALPHABET.len())]))
        .collect()
}

#[must_use]
pub fn derive_key(secret: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT);
    hasher.update(secret.as_bytes());
    *hasher.finalize().as_bytes()
}

// base64(nonce || ciphertext)
pub fn seal(secret: &str, plaintext: &[u8]) -> Result<String, CryptoError> {
    let key = derive_key(secret);
    let cipher = XChaCha20Poly1305::new((&key).into());
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(output))
}

pub fn open(secret: &str, sealed: &str) -> Result<Vec<u8>, CryptoError> {
    let data = STANDARD
        .decode(sealed.trim())
        .map_err(|_| CryptoError::Encoding)?;
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::Truncated);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let key = derive_key(secret);
    let cipher = XChaCha20Poly1305::new((&key).into());
    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}
