//! Usage recording: append-only event log plus the monthly credit counter.

use std::sync::Arc;

use slx_usage_events::UsageEvent;

use crate::api_keys::KeyStore;
use crate::billing::{current_period_start, CreditLedger};
use crate::datastore::Datastore;
use crate::error::StateError;

/// Appends immutable usage events and keeps the per-period credit counter in
/// step with them.
///
/// The event log is the source of truth: if the counter increment fails
/// after the append succeeded, the divergence is logged for reconciliation
/// (a period's counter can always be rebuilt by summing its events) and the
/// caller's request is not failed.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn Datastore>,
    ledger: CreditLedger,
    keys: KeyStore,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn Datastore>, ledger: CreditLedger, keys: KeyStore) -> Self {
        Self {
            store,
            ledger,
            keys,
        }
    }

    /// Record one API call: append the event, then atomically add its
    /// credits to the ledger row for the event's period. Retried
    /// submissions of the same request id are deduplicated on append and
    /// charge nothing.
    pub async fn record(&self, event: UsageEvent) -> Result<(), StateError> {
        event
            .validate()
            .map_err(|e| StateError::Validation(e.to_string()))?;

        let appended = self.store.append_usage_event(event.clone()).await?;
        if !appended {
            log::info!(
                "Usage event {} already recorded, skipping increment",
                event.request_id
            );
            return Ok(());
        }

        let period_start = current_period_start(event.timestamp);
        if let Err(e) = self
            .ledger
            .increment(&event.principal_id, period_start, event.credits_charged)
            .await
        {
            // The event is already in the log; reconciliation rebuilds the
            // counter from it.
            log::error!(
                "Recorded usage event {} but failed to increment ledger for {} ({}): {}",
                event.request_id,
                event.principal_id,
                period_start,
                e
            );
        }

        // Stamp the credential off the request path; the caller never waits
        // on this.
        if let Some(credential_id) = event.credential_id.clone() {
            let keys = self.keys.clone();
            tokio::spawn(async move {
                keys.touch_last_used(&credential_id).await;
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Principal;
    use crate::api_keys::KeyCodec;
    use crate::datastore::MemoryStore;
    use chrono::{NaiveDate, TimeZone, Utc};
    use slx_usage_events::Method;

    async fn recorder() -> (Arc<MemoryStore>, UsageRecorder, String) {
        let store = Arc::new(MemoryStore::new());
        let principal = Principal::new(
            "privy:1".to_string(),
            "dev@example.com".to_string(),
            "dev".to_string(),
            None,
            None,
        );
        let principal_id = principal.id.clone();
        store.insert_principal(principal).await.unwrap();

        let ledger = CreditLedger::new(store.clone());
        let keys = KeyStore::new(store.clone(), KeyCodec::new(None));
        let recorder = UsageRecorder::new(store.clone(), ledger, keys);
        (store, recorder, principal_id)
    }

    fn event_at(principal_id: &str, y: i32, m: u32, d: u32) -> UsageEvent {
        let mut event = UsageEvent::new(
            principal_id.to_string(),
            None,
            "/v1/query".to_string(),
            Method::Post,
            200,
            35,
            1,
            None,
        );
        event.timestamp = Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap();
        event
    }

    #[tokio::test]
    async fn test_record_appends_and_increments() {
        let (store, recorder, principal_id) = recorder().await;

        for _ in 0..3 {
            recorder
                .record(event_at(&principal_id, 2024, 3, 5))
                .await
                .unwrap();
        }

        let march = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let row = store
            .ledger_entry(&principal_id, march)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.used_credits, 3);
        assert_eq!(store.usage_events(&principal_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_record_rolls_over_to_new_period() {
        let (store, recorder, principal_id) = recorder().await;

        for _ in 0..3 {
            recorder
                .record(event_at(&principal_id, 2024, 3, 5))
                .await
                .unwrap();
        }
        recorder
            .record(event_at(&principal_id, 2024, 4, 1))
            .await
            .unwrap();

        let march = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let april = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();

        let march_row = store
            .ledger_entry(&principal_id, march)
            .await
            .unwrap()
            .unwrap();
        let april_row = store
            .ledger_entry(&principal_id, april)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(march_row.used_credits, 3);
        assert_eq!(april_row.used_credits, 1);
    }

    #[tokio::test]
    async fn test_retried_event_charges_once() {
        let (store, recorder, principal_id) = recorder().await;

        let event = event_at(&principal_id, 2024, 3, 5);
        recorder.record(event.clone()).await.unwrap();
        recorder.record(event).await.unwrap();

        let march = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let row = store
            .ledger_entry(&principal_id, march)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.used_credits, 1);
        assert_eq!(store.usage_events(&principal_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_rejects_missing_principal() {
        let (_store, recorder, _) = recorder().await;
        let event = event_at("", 2024, 3, 5);
        assert!(matches!(
            recorder.record(event).await,
            Err(StateError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_ledger_failure_does_not_fail_the_request() {
        // An event for an unknown principal appends fine but cannot create a
        // ledger row; the divergence is logged, not surfaced.
        let (store, recorder, _) = recorder().await;
        let event = event_at("user_ghost", 2024, 3, 5);

        recorder.record(event).await.unwrap();
        assert_eq!(store.usage_events("user_ghost").await.unwrap().len(), 1);
        let march = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(store
            .ledger_entry("user_ghost", march)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_record_touches_credential_asynchronously() {
        let (store, recorder, principal_id) = recorder().await;
        let keys = KeyStore::new(store.clone(), KeyCodec::new(None));
        let minted = keys.create(&principal_id, "Default Key").await.unwrap();

        let mut event = event_at(&principal_id, 2024, 3, 5);
        event.credential_id = Some(minted.metadata.id.clone());
        recorder.record(event).await.unwrap();

        // The touch runs on a spawned task; give it a chance to land.
        tokio::task::yield_now().await;
        for _ in 0..50 {
            let active = keys.get_active(&principal_id).await.unwrap().unwrap();
            if active.last_used_at.is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        panic!("last_used_at was never stamped");
    }
}
