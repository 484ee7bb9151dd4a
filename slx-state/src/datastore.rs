use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use slx_usage_events::UsageEvent;

use crate::accounts::Principal;
use crate::api_keys::Credential;
use crate::billing::LedgerEntry;

/// Errors surfaced by a store client
#[derive(Error, Debug)]
pub enum StoreError {
    /// No record matches the given key
    #[error("Record not found")]
    NotFound,

    /// A uniqueness constraint rejected the write
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The store could not be reached; the caller may retry
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Store-client boundary for all persisted platform state.
///
/// Implementations are expected to honor the atomicity contracts spelled out
/// on each method: `upsert_ledger_entry` and `add_consumed` must be single
/// atomic operations against the backing store, never a read followed by a
/// write from this side of the boundary, and `rotate_credential` must commit
/// the deactivate-and-insert pair as one transaction.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Look up a principal by the identity provider's user id
    async fn principal_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Principal>, StoreError>;

    /// Look up a principal by its own id
    async fn principal_by_id(&self, id: &str) -> Result<Option<Principal>, StoreError>;

    /// Insert a new principal. Fails with a unique violation if a principal
    /// already exists for the same external identity id.
    async fn insert_principal(&self, principal: Principal) -> Result<Principal, StoreError>;

    /// Replace a principal's contact address
    async fn update_contact_address(
        &self,
        id: &str,
        address: &str,
    ) -> Result<Principal, StoreError>;

    /// The single active credential for a principal, if any
    async fn active_credential(
        &self,
        principal_id: &str,
    ) -> Result<Option<Credential>, StoreError>;

    /// Insert a new credential. Fails with a unique violation if the
    /// principal already has an active credential.
    async fn insert_credential(&self, credential: Credential) -> Result<Credential, StoreError>;

    /// Atomically deactivate the current active credential and insert its
    /// replacement. Fails with `NotFound` (and leaves nothing changed) if the
    /// principal has no active credential.
    async fn rotate_credential(
        &self,
        principal_id: &str,
        replacement: Credential,
    ) -> Result<Credential, StoreError>;

    /// Update a credential's last-used timestamp
    async fn touch_credential(
        &self,
        credential_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// All credentials for a principal, active and inactive
    async fn list_credentials(&self, principal_id: &str) -> Result<Vec<Credential>, StoreError>;

    /// Insert-or-fetch on the (principal, period start) key. When a row
    /// already exists the stored row wins and is returned unchanged.
    async fn upsert_ledger_entry(&self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// Atomically add `amount` to the consumed counter of an existing row
    async fn add_consumed(
        &self,
        principal_id: &str,
        period_start: NaiveDate,
        amount: u64,
    ) -> Result<LedgerEntry, StoreError>;

    /// Fetch a single ledger row
    async fn ledger_entry(
        &self,
        principal_id: &str,
        period_start: NaiveDate,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// All ledger rows for a principal, most recent period first
    async fn ledger_entries(&self, principal_id: &str) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Append an immutable usage event. Returns `false` when an event with
    /// the same request id was already recorded; the event is then dropped.
    async fn append_usage_event(&self, event: UsageEvent) -> Result<bool, StoreError>;

    /// All usage events recorded for a principal, oldest first
    async fn usage_events(&self, principal_id: &str) -> Result<Vec<UsageEvent>, StoreError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    principals: BTreeMap<String, Principal>,
    external_index: BTreeMap<String, String>,
    credentials: BTreeMap<String, Credential>,
    ledger: BTreeMap<(String, NaiveDate), LedgerEntry>,
    events: Vec<UsageEvent>,
    seen_requests: BTreeSet<String>,
}

/// In-memory store client.
///
/// Backs the test suite and single-node deployments. A single interior lock
/// makes every trait method atomic, which is the same guarantee a relational
/// backend provides through upserts and `SET consumed = consumed + n`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn principal_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .external_index
            .get(external_id)
            .and_then(|id| inner.principals.get(id))
            .cloned())
    }

    async fn principal_by_id(&self, id: &str) -> Result<Option<Principal>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.principals.get(id).cloned())
    }

    async fn insert_principal(&self, principal: Principal) -> Result<Principal, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .external_index
            .contains_key(&principal.external_identity_id)
        {
            return Err(StoreError::UniqueViolation(
                "principals_external_identity_id".to_string(),
            ));
        }
        inner.external_index.insert(
            principal.external_identity_id.clone(),
            principal.id.clone(),
        );
        inner
            .principals
            .insert(principal.id.clone(), principal.clone());
        Ok(principal)
    }

    async fn update_contact_address(
        &self,
        id: &str,
        address: &str,
    ) -> Result<Principal, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let principal = inner.principals.get_mut(id).ok_or(StoreError::NotFound)?;
        principal.contact_address = address.to_string();
        principal.updated_at = Utc::now();
        Ok(principal.clone())
    }

    async fn active_credential(
        &self,
        principal_id: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .credentials
            .values()
            .find(|c| c.principal_id == principal_id && c.active)
            .cloned())
    }

    async fn insert_credential(&self, credential: Credential) -> Result<Credential, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if credential.active
            && inner
                .credentials
                .values()
                .any(|c| c.principal_id == credential.principal_id && c.active)
        {
            return Err(StoreError::UniqueViolation(
                "api_keys_one_active_per_principal".to_string(),
            ));
        }
        inner
            .credentials
            .insert(credential.id.clone(), credential.clone());
        Ok(credential)
    }

    async fn rotate_credential(
        &self,
        principal_id: &str,
        replacement: Credential,
    ) -> Result<Credential, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let current_id = inner
            .credentials
            .values()
            .find(|c| c.principal_id == principal_id && c.active)
            .map(|c| c.id.clone())
            .ok_or(StoreError::NotFound)?;
        // Deactivate and insert under the same lock so no reader ever sees
        // zero active credentials for this principal.
        if let Some(current) = inner.credentials.get_mut(&current_id) {
            current.active = false;
        }
        inner
            .credentials
            .insert(replacement.id.clone(), replacement.clone());
        Ok(replacement)
    }

    async fn touch_credential(
        &self,
        credential_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let credential = inner
            .credentials
            .get_mut(credential_id)
            .ok_or(StoreError::NotFound)?;
        credential.last_used_at = Some(at);
        Ok(())
    }

    async fn list_credentials(&self, principal_id: &str) -> Result<Vec<Credential>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut credentials: Vec<Credential> = inner
            .credentials
            .values()
            .filter(|c| c.principal_id == principal_id)
            .cloned()
            .collect();
        credentials.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(credentials)
    }

    async fn upsert_ledger_entry(&self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (entry.principal_id.clone(), entry.period_start);
        Ok(inner.ledger.entry(key).or_insert(entry).clone())
    }

    async fn add_consumed(
        &self,
        principal_id: &str,
        period_start: NaiveDate,
        amount: u64,
    ) -> Result<LedgerEntry, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (principal_id.to_string(), period_start);
        let entry = inner.ledger.get_mut(&key).ok_or(StoreError::NotFound)?;
        entry.used_credits = entry.used_credits.saturating_add(amount);
        Ok(entry.clone())
    }

    async fn ledger_entry(
        &self,
        principal_id: &str,
        period_start: NaiveDate,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let key = (principal_id.to_string(), period_start);
        Ok(inner.ledger.get(&key).cloned())
    }

    async fn ledger_entries(&self, principal_id: &str) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<LedgerEntry> = inner
            .ledger
            .values()
            .filter(|e| e.principal_id == principal_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        Ok(entries)
    }

    async fn append_usage_event(&self, event: UsageEvent) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.seen_requests.insert(event.request_id.clone()) {
            return Ok(false);
        }
        inner.events.push(event);
        Ok(true)
    }

    async fn usage_events(&self, principal_id: &str) -> Result<Vec<UsageEvent>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.principal_id == principal_id)
            .cloned()
            .collect())
    }
}
