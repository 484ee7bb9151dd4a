//! First-login bootstrap: principal creation, first credential, first
//! ledger row. Invoked on every login and idempotent.

use std::sync::Arc;

use chrono::Utc;

use crate::accounts::{placeholder_address, ExternalIdentity, Principal};
use crate::api_keys::{KeyStore, MintedKey};
use crate::billing::CreditLedger;
use crate::datastore::{Datastore, StoreError};
use crate::error::StateError;

/// Result of a bootstrap call. `minted_key` is populated only when the
/// principal was created on this call; it carries the raw secret exactly
/// once so the caller can show it to the user.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub principal: Principal,
    pub minted_key: Option<MintedKey>,
}

/// Orchestrates the login-time sync of an external identity into a
/// principal with a credential and a seeded ledger row.
#[derive(Clone)]
pub struct AccountProvisioner {
    store: Arc<dyn Datastore>,
    keys: KeyStore,
    ledger: CreditLedger,
}

impl AccountProvisioner {
    pub fn new(store: Arc<dyn Datastore>, keys: KeyStore, ledger: CreditLedger) -> Self {
        Self {
            store,
            keys,
            ledger,
        }
    }

    /// Sync an external identity into platform state.
    ///
    /// Existing principals are returned as-is, except that a placeholder
    /// contact address is upgraded when the identity now carries a real
    /// email (one-way; a real address is never overwritten). New identities
    /// get a principal, a first credential, and a ledger row for the
    /// current period.
    pub async fn bootstrap(
        &self,
        identity: &ExternalIdentity,
    ) -> Result<BootstrapOutcome, StateError> {
        if identity.id.is_empty() {
            return Err(StateError::Validation(
                "external identity id is required".to_string(),
            ));
        }

        let email = identity.resolved_email().map(str::to_string);
        let wallet = identity
            .wallet_address
            .as_deref()
            .filter(|w| !w.is_empty())
            .map(str::to_string);

        if email.is_none() && wallet.is_none() {
            return Err(StateError::Validation(
                "external identity carries neither an email nor a wallet address".to_string(),
            ));
        }

        if let Some(existing) = self.store.principal_by_external_id(&identity.id).await? {
            let principal = self.upgrade_contact_address(existing, email.as_deref()).await;
            return self.complete(principal).await;
        }

        let contact_address = match (&email, &wallet) {
            (Some(email), _) => email.clone(),
            // Wallet-only accounts get a synthesized address; the dashboard
            // shows the wallet instead.
            (None, Some(wallet)) => placeholder_address(wallet),
            (None, None) => unreachable!("rejected above"),
        };

        let principal = Principal::new(
            identity.id.clone(),
            contact_address,
            identity.derive_display_name(),
            identity.avatar_url.clone(),
            wallet,
        );

        let principal = match self.store.insert_principal(principal).await {
            Ok(principal) => {
                log::info!(
                    "Provisioned account {} for external identity {}",
                    principal.id,
                    identity.id
                );
                principal
            }
            Err(StoreError::UniqueViolation(_)) => {
                // A concurrent login won the insert; converge on its row.
                self.store
                    .principal_by_external_id(&identity.id)
                    .await?
                    .ok_or(StateError::PrincipalNotFound)?
            }
            Err(e) => return Err(e.into()),
        };

        self.complete(principal).await
    }

    /// Ensure the principal has an active credential and a ledger row for
    /// the current period, minting whichever is missing. A login retried
    /// after a partial provisioning failure lands here and is made whole.
    async fn complete(&self, principal: Principal) -> Result<BootstrapOutcome, StateError> {
        let minted_key = self.ensure_credential(&principal.id).await?;
        self.ledger.current_entry(&principal.id, Utc::now()).await?;
        Ok(BootstrapOutcome {
            principal,
            minted_key,
        })
    }

    /// Mint a credential if the principal has none. Returns the minted key
    /// so the caller can surface the secret; `None` when an active
    /// credential already exists.
    async fn ensure_credential(&self, principal_id: &str) -> Result<Option<MintedKey>, StateError> {
        if self.keys.get_active(principal_id).await?.is_some() {
            return Ok(None);
        }
        match self.keys.create(principal_id, "Default Key").await {
            Ok(minted) => {
                log::info!("Minted API key for account {}", principal_id);
                Ok(Some(minted))
            }
            // A concurrent login minted first; its caller holds the secret.
            Err(StateError::ActiveKeyExists) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// One-way address upgrade: placeholder (or empty) to real email.
    /// Failures are logged; the login still succeeds with the stale address.
    async fn upgrade_contact_address(
        &self,
        principal: Principal,
        email: Option<&str>,
    ) -> Principal {
        let upgradeable =
            principal.contact_address.is_empty() || principal.has_placeholder_address();
        if let (Some(email), true) = (email, upgradeable) {
            match self
                .store
                .update_contact_address(&principal.id, email)
                .await
            {
                Ok(updated) => return updated,
                Err(e) => {
                    log::error!(
                        "Failed to upgrade contact address for {}: {}",
                        principal.id,
                        e
                    );
                }
            }
        }
        principal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_keys::KeyCodec;
    use crate::billing::current_period_start;
    use crate::datastore::MemoryStore;

    fn provisioner() -> (Arc<MemoryStore>, AccountProvisioner) {
        let store = Arc::new(MemoryStore::new());
        let keys = KeyStore::new(store.clone(), KeyCodec::new(None));
        let ledger = CreditLedger::new(store.clone());
        let provisioner = AccountProvisioner::new(store.clone(), keys, ledger);
        (store, provisioner)
    }

    fn email_identity() -> ExternalIdentity {
        ExternalIdentity {
            id: "privy:alice".to_string(),
            oauth_email: Some("alice@example.com".to_string()),
            name: Some("Alice".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_creates_principal_key_and_ledger_row() {
        let (store, provisioner) = provisioner();

        let outcome = provisioner.bootstrap(&email_identity()).await.unwrap();
        assert_eq!(outcome.principal.contact_address, "alice@example.com");
        assert_eq!(outcome.principal.display_name, "Alice");

        let minted = outcome.minted_key.expect("first login mints a key");
        assert!(minted.secret.starts_with("slxdb_live_"));

        let period = current_period_start(Utc::now());
        let row = store
            .ledger_entry(&outcome.principal.id, period)
            .await
            .unwrap()
            .expect("first ledger row is seeded");
        assert_eq!(row.total_credits, 1_000);
        assert_eq!(row.used_credits, 0);
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let (store, provisioner) = provisioner();
        let identity = email_identity();

        let first = provisioner.bootstrap(&identity).await.unwrap();
        let second = provisioner.bootstrap(&identity).await.unwrap();

        assert_eq!(first.principal.id, second.principal.id);
        assert!(second.minted_key.is_none());

        // Exactly one credential and one ledger row in total
        assert_eq!(
            store
                .list_credentials(&first.principal.id)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            store
                .ledger_entries(&first.principal.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_bootstrap_wallet_only_identity() {
        let (_store, provisioner) = provisioner();
        let identity = ExternalIdentity {
            id: "privy:wallet".to_string(),
            wallet_address: Some("0xAbCdEf0123456789".to_string()),
            ..Default::default()
        };

        let outcome = provisioner.bootstrap(&identity).await.unwrap();
        assert_eq!(
            outcome.principal.contact_address,
            "0xAbCdEf@wallet.solixdb"
        );
        assert_eq!(outcome.principal.display_name, "0xAb...6789");
        assert!(outcome.principal.has_placeholder_address());
    }

    #[tokio::test]
    async fn test_bootstrap_upgrades_placeholder_address_one_way() {
        let (_store, provisioner) = provisioner();
        let wallet_identity = ExternalIdentity {
            id: "privy:wallet".to_string(),
            wallet_address: Some("0xAbCdEf0123456789".to_string()),
            ..Default::default()
        };
        provisioner.bootstrap(&wallet_identity).await.unwrap();

        // The same identity later links an email
        let upgraded_identity = ExternalIdentity {
            oauth_email: Some("wallet.owner@example.com".to_string()),
            ..wallet_identity
        };
        let outcome = provisioner.bootstrap(&upgraded_identity).await.unwrap();
        assert_eq!(
            outcome.principal.contact_address,
            "wallet.owner@example.com"
        );

        // A later wallet-only login must not regress the real address
        let wallet_again = ExternalIdentity {
            oauth_email: None,
            ..upgraded_identity
        };
        let outcome = provisioner.bootstrap(&wallet_again).await.unwrap();
        assert_eq!(
            outcome.principal.contact_address,
            "wallet.owner@example.com"
        );
    }

    #[tokio::test]
    async fn test_bootstrap_backfills_missing_credential_and_ledger_row() {
        // A principal left over from a partially failed provisioning: the
        // row committed but no key or ledger entry was ever created.
        let (store, provisioner) = provisioner();
        let principal = Principal::new(
            "privy:alice".to_string(),
            "alice@example.com".to_string(),
            "Alice".to_string(),
            None,
            None,
        );
        let principal_id = principal.id.clone();
        store.insert_principal(principal).await.unwrap();

        let outcome = provisioner.bootstrap(&email_identity()).await.unwrap();
        assert_eq!(outcome.principal.id, principal_id);

        let minted = outcome
            .minted_key
            .expect("the missing key is minted on the next login");
        assert!(minted.secret.starts_with("slxdb_live_"));
        assert_eq!(
            store.list_credentials(&principal_id).await.unwrap().len(),
            1
        );

        let period = current_period_start(Utc::now());
        assert!(store
            .ledger_entry(&principal_id, period)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_unaddressable_identity() {
        let (_store, provisioner) = provisioner();
        let identity = ExternalIdentity {
            id: "privy:ghost".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            provisioner.bootstrap(&identity).await,
            Err(StateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_missing_external_id() {
        let (_store, provisioner) = provisioner();
        let identity = ExternalIdentity {
            oauth_email: Some("alice@example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            provisioner.bootstrap(&identity).await,
            Err(StateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_bootstrap_converges_on_one_principal() {
        let (store, provisioner) = provisioner();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let provisioner = provisioner.clone();
            handles.push(tokio::spawn(async move {
                provisioner.bootstrap(&email_identity()).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        let mut minted = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            ids.push(outcome.principal.id.clone());
            if outcome.minted_key.is_some() {
                minted += 1;
            }
        }

        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(minted, 1);
        assert_eq!(store.list_credentials(&ids[0]).await.unwrap().len(), 1);
    }
}
