//! Pure credential material handling: generation, hashing, verification,
//! optional envelope encryption, and display formatting. No I/O.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Public prefix identifying the credential family
pub const KEY_PREFIX: &str = "slxdb_live_";

/// Number of random alphanumeric characters in a secret
pub const KEY_BODY_LEN: usize = 32;

/// Number of trailing characters stored for display
pub const KEY_SUFFIX_LEN: usize = 4;

const NONCE_LEN: usize = 12;

/// Errors from credential material handling
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Hashing was attempted on an empty secret
    #[error("Cannot hash an empty secret")]
    EmptyInput,

    /// No master key is configured, so reversible storage is disabled
    #[error("No master key configured; secrets are stored hash-only")]
    MasterKeyMissing,

    /// The ciphertext blob is not in the expected format
    #[error("Malformed ciphertext blob")]
    InvalidCiphertext,

    /// GCM authentication failed; the blob was tampered with or encrypted
    /// under a different master key
    #[error("Ciphertext failed authentication")]
    AuthenticationFailed,
}

/// Generate a new API key secret.
///
/// Format: `slxdb_live_` + 32 random alphanumeric characters drawn from the
/// operating system's CSPRNG.
pub fn generate_api_key() -> String {
    let mut rng = OsRng;
    let body: String = (0..KEY_BODY_LEN)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect();
    format!("{}{}", KEY_PREFIX, body)
}

/// One-way SHA-256 digest of a secret, hex-encoded. Suitable for
/// equality-only comparison; fails only on empty input.
pub fn hash_api_key(secret: &str) -> Result<String, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::EmptyInput);
    }
    Ok(hex::encode(Sha256::digest(secret.as_bytes())))
}

/// Verify a secret against a stored hash in constant time
pub fn verify_api_key(secret: &str, hash: &str) -> bool {
    match hash_api_key(secret) {
        Ok(computed) => computed.as_bytes().ct_eq(hash.as_bytes()).into(),
        Err(_) => false,
    }
}

/// Display format for a credential: `"{prefix}...{suffix}"`. Carries no
/// secret material beyond what was already stored for display.
pub fn display_form(prefix: &str, suffix: &str) -> String {
    format!("{}...{}", prefix, suffix)
}

/// The last characters of a raw secret, stored alongside the hash so the
/// dashboard can render the display form
pub fn key_suffix(secret: &str) -> String {
    let skip = secret.chars().count().saturating_sub(KEY_SUFFIX_LEN);
    secret.chars().skip(skip).collect()
}

fn derive_key(master_key: &str) -> [u8; 32] {
    Sha256::digest(master_key.as_bytes()).into()
}

/// Envelope-encrypt a secret under a key derived from the operator's master
/// key. Output is base64(nonce || ciphertext), self-contained for later
/// decryption.
pub fn encrypt_api_key(secret: &str, master_key: &str) -> Result<String, CryptoError> {
    let key = derive_key(master_key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::AuthenticationFailed)?;
    let ciphertext = cipher
        .encrypt(nonce, secret.as_bytes())
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend(ciphertext);

    Ok(BASE64.encode(blob))
}

/// Recover a secret from an envelope-encrypted blob. Fails with
/// `AuthenticationFailed` when the blob was tampered with or the master key
/// does not match the one used at encryption time.
pub fn decrypt_api_key(blob: &str, master_key: &str) -> Result<String, CryptoError> {
    let decoded = BASE64
        .decode(blob)
        .map_err(|_| CryptoError::InvalidCiphertext)?;
    if decoded.len() < NONCE_LEN {
        return Err(CryptoError::InvalidCiphertext);
    }

    let nonce = Nonce::from_slice(&decoded[..NONCE_LEN]);
    let ciphertext = &decoded[NONCE_LEN..];

    let key = derive_key(master_key);
    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::AuthenticationFailed)?;
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidCiphertext)
}

/// Credential material handling with the operator's optional master key
/// applied. When no master key is configured the encrypt/decrypt paths
/// report the feature as disabled and the system degrades to hash-only
/// storage.
#[derive(Clone, Default)]
pub struct KeyCodec {
    master_key: Option<String>,
}

impl KeyCodec {
    pub fn new(master_key: Option<String>) -> Self {
        Self { master_key }
    }

    /// Whether reversible credential storage is enabled
    pub fn reversible(&self) -> bool {
        self.master_key.is_some()
    }

    pub fn encrypt(&self, secret: &str) -> Result<String, CryptoError> {
        let master_key = self
            .master_key
            .as_deref()
            .ok_or(CryptoError::MasterKeyMissing)?;
        encrypt_api_key(secret, master_key)
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        let master_key = self
            .master_key
            .as_deref()
            .ok_or(CryptoError::MasterKeyMissing)?;
        decrypt_api_key(blob, master_key)
    }
}
