pub mod codec;

pub use codec::{CryptoError, KeyCodec};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datastore::{Datastore, StoreError};
use crate::error::StateError;

/// An API key record.
///
/// The raw secret is never persisted outside the optional encrypted column;
/// only its hash and the prefix/suffix display metadata are stored. Records
/// are never deleted: regeneration flips `active` off and inactive rows are
/// retained for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub principal_id: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub key_suffix: String,
    /// Envelope-encrypted copy of the secret, present only when the operator
    /// has configured a master key
    pub encrypted_key: Option<String>,
    pub label: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    #[cfg(test)]
    pub fn test_fixture(principal_id: &str, active: bool) -> Self {
        let secret = codec::generate_api_key();
        Self {
            id: format!("key_{}", uuid::Uuid::new_v4()),
            principal_id: principal_id.to_string(),
            key_hash: codec::hash_api_key(&secret).unwrap(),
            key_prefix: codec::KEY_PREFIX.to_string(),
            key_suffix: codec::key_suffix(&secret),
            encrypted_key: None,
            label: "Default Key".to_string(),
            active,
            created_at: Utc::now(),
            last_used_at: None,
        }
    }
}

/// Credential fields safe to show after creation: everything but the hash
/// and the encrypted copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub id: String,
    pub key_prefix: String,
    pub key_suffix: String,
    pub label: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl CredentialMetadata {
    /// Display format of the key: `slxdb_live_...abcd`
    pub fn display(&self) -> String {
        codec::display_form(&self.key_prefix, &self.key_suffix)
    }
}

impl From<&Credential> for CredentialMetadata {
    fn from(credential: &Credential) -> Self {
        Self {
            id: credential.id.clone(),
            key_prefix: credential.key_prefix.clone(),
            key_suffix: credential.key_suffix.clone(),
            label: credential.label.clone(),
            active: credential.active,
            created_at: credential.created_at,
            last_used_at: credential.last_used_at,
        }
    }
}

/// A freshly minted credential together with its raw secret. The secret is
/// available here exactly once; it cannot be re-read later unless envelope
/// encryption is configured.
#[derive(Debug, Clone)]
pub struct MintedKey {
    pub metadata: CredentialMetadata,
    pub secret: String,
}

/// Outcome of asking for the full secret of a stored credential
#[derive(Debug, Clone)]
pub enum KeyReveal {
    /// The secret was recovered from the encrypted column
    Secret(String),
    /// The secret was never stored in reversible form (or the blob no longer
    /// authenticates); callers should fall back to the display form and
    /// prompt for manual re-entry or regeneration
    NotRetrievable,
}

/// CRUD over credential records: one active credential per principal,
/// historical inactive ones retained.
#[derive(Clone)]
pub struct KeyStore {
    store: Arc<dyn Datastore>,
    codec: KeyCodec,
}

impl KeyStore {
    pub fn new(store: Arc<dyn Datastore>, codec: KeyCodec) -> Self {
        Self { store, codec }
    }

    /// The single active credential for a principal, if any
    pub async fn get_active(
        &self,
        principal_id: &str,
    ) -> Result<Option<Credential>, StateError> {
        Ok(self.store.active_credential(principal_id).await?)
    }

    /// Mint a new credential for a principal and persist it. Fails with
    /// `ActiveKeyExists` if the principal already has an active credential;
    /// callers must regenerate instead.
    pub async fn create(&self, principal_id: &str, label: &str) -> Result<MintedKey, StateError> {
        let (credential, secret) = self.mint(principal_id, label)?;
        let stored = match self.store.insert_credential(credential).await {
            Ok(stored) => stored,
            Err(StoreError::UniqueViolation(_)) => return Err(StateError::ActiveKeyExists),
            Err(e) => return Err(e.into()),
        };
        Ok(MintedKey {
            metadata: CredentialMetadata::from(&stored),
            secret,
        })
    }

    /// Atomically replace the active credential with a fresh one. Once this
    /// commits the old secret fails verification immediately; if it fails,
    /// the old credential stays active.
    pub async fn regenerate(&self, principal_id: &str) -> Result<MintedKey, StateError> {
        let (replacement, secret) = self.mint(principal_id, "Default Key")?;
        let stored = match self.store.rotate_credential(principal_id, replacement).await {
            Ok(stored) => stored,
            Err(StoreError::NotFound) => return Err(StateError::CredentialNotFound),
            Err(e) => return Err(e.into()),
        };
        Ok(MintedKey {
            metadata: CredentialMetadata::from(&stored),
            secret,
        })
    }

    /// Recover the full secret of the active credential, if it was stored
    /// reversibly. Decryption failures degrade to `NotRetrievable` rather
    /// than propagating; a missing credential is still an error.
    pub async fn reveal(&self, principal_id: &str) -> Result<(CredentialMetadata, KeyReveal), StateError> {
        let credential = self
            .get_active(principal_id)
            .await?
            .ok_or(StateError::CredentialNotFound)?;
        let metadata = CredentialMetadata::from(&credential);

        let reveal = match credential.encrypted_key.as_deref() {
            Some(blob) => match self.codec.decrypt(blob) {
                Ok(secret) => KeyReveal::Secret(secret),
                Err(e) => {
                    log::warn!(
                        "Could not decrypt stored key {} for display: {}",
                        credential.id,
                        e
                    );
                    KeyReveal::NotRetrievable
                }
            },
            None => KeyReveal::NotRetrievable,
        };

        Ok((metadata, reveal))
    }

    /// Best-effort last-used stamp. Failures are logged and swallowed so the
    /// request the credential authenticated is never blocked.
    pub async fn touch_last_used(&self, credential_id: &str) {
        if let Err(e) = self.store.touch_credential(credential_id, Utc::now()).await {
            log::warn!("Failed to update last_used_at for {}: {}", credential_id, e);
        }
    }

    /// Metadata for all of a principal's credentials, newest first
    pub async fn list(&self, principal_id: &str) -> Result<Vec<CredentialMetadata>, StateError> {
        let credentials = self.store.list_credentials(principal_id).await?;
        Ok(credentials.iter().map(CredentialMetadata::from).collect())
    }

    fn mint(&self, principal_id: &str, label: &str) -> Result<(Credential, String), StateError> {
        let secret = codec::generate_api_key();
        let key_hash = codec::hash_api_key(&secret)?;

        let encrypted_key = if self.codec.reversible() {
            Some(self.codec.encrypt(&secret)?)
        } else {
            None
        };

        let credential = Credential {
            id: format!("key_{}", uuid::Uuid::new_v4()),
            principal_id: principal_id.to_string(),
            key_hash,
            key_prefix: codec::KEY_PREFIX.to_string(),
            key_suffix: codec::key_suffix(&secret),
            encrypted_key,
            label: label.to_string(),
            active: true,
            created_at: Utc::now(),
            last_used_at: None,
        };
        Ok((credential, secret))
    }
}
