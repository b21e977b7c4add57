//! Webhook Processor: owns `webhook_events`. Deduplicates
//! by event id, classifies event type, and drives the Subscription and
//! Wallet managers.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::catalog::PlanCatalog;
use crate::error::{encode, CoreResult};
use crate::model::{BillingEventPayload, Subscription, SubscriptionStatus, WebhookEventRecord, WebhookStatus};
use crate::store::{collections, Store};
use crate::wallets::WalletManager;

#[derive(Clone)]
pub struct WebhookProcessor {
    store: Arc<dyn Store>,
    catalog: PlanCatalog,
    wallets: WalletManager,
}

/// First-match classification table.
fn classify_status(event_type: &str, existing_status: Option<SubscriptionStatus>) -> SubscriptionStatus {
    match event_type {
        "REFUND" | "CHARGEBACK" => SubscriptionStatus::Refunded,
        "EXPIRATION" | "EXPIRE" => SubscriptionStatus::Expired,
        "BILLING_ISSUE" | "PAUSE" | "BILLING_ISSUE_DETECTED" | "GRACE_PERIOD" => SubscriptionStatus::BillingIssue,
        "CANCELLATION" | "CANCEL" | "AUTO_RENEW_DISABLED" => SubscriptionStatus::Cancelled,
        "INITIAL_PURCHASE" | "RENEWAL" | "PRODUCT_CHANGE" | "UNCANCELLATION" | "SUBSCRIPTION_PURCHASE" => {
            SubscriptionStatus::Active
        }
        _ => existing_status.unwrap_or(SubscriptionStatus::Active),
    }
}

fn is_purchase_event(event_type: &str) -> bool {
    matches!(
        event_type,
        "INITIAL_PURCHASE" | "RENEWAL" | "PRODUCT_CHANGE" | "UNCANCELLATION" | "SUBSCRIPTION_PURCHASE"
    )
}

fn close_reason(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Expired => "expired",
        SubscriptionStatus::Refunded => "refunded",
        SubscriptionStatus::BillingIssue => "billing_issue",
        SubscriptionStatus::Active | SubscriptionStatus::Cancelled => "unknown",
    }
}

/// Normalizes a timestamp field that may arrive as an epoch-millisecond
/// number or an ISO-8601 string; unparseable values become
/// `None` rather than an error, per the "mixed null/undefined" REDESIGN
/// FLAG collapsing to a single absent marker.
pub fn normalize_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Derives the webhook event document id: `rc_{providerEventId}`
/// when present, else a stable hash of user id, event type, and period.
fn derive_event_doc_id(
    payload: &BillingEventPayload,
    event_type: &str,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
) -> String {
    match payload.event_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => format!("rc_{id}"),
        None => {
            let start = period_start.map(|dt| dt.to_rfc3339()).unwrap_or_default();
            let end = period_end.map(|dt| dt.to_rfc3339()).unwrap_or_default();
            let material = format!("{}:{}:{}:{}", payload.user_id, event_type, start, end);
            let digest = Sha256::digest(material.as_bytes());
            format!("rc_{}", hex::encode(digest))
        }
    }
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn Store>, catalog: PlanCatalog, wallets: WalletManager) -> Self {
        Self { store, catalog, wallets }
    }

    /// Entry point for an inbound billing event.
    pub async fn process(&self, payload: &BillingEventPayload) -> CoreResult<()> {
        let event_type = payload.event_type.to_uppercase();
        let period_start = normalize_timestamp(payload.period_start.as_ref());
        let period_end = normalize_timestamp(payload.period_end.as_ref());
        let original_purchase_date = normalize_timestamp(payload.original_purchase_date.as_ref());
        let doc_id = derive_event_doc_id(payload, &event_type, period_start, period_end);

        if self.record_event_if_new(&doc_id, &event_type, payload).await? {
            info!(user_id = %payload.user_id, event_type, "duplicate webhook event dropped");
            return Ok(());
        }

        let (subscription, should_close_wallet, should_open_wallet, rollover) = self
            .apply_subscription_transition(payload, &event_type, period_start, period_end, original_purchase_date)
            .await?;

        if should_close_wallet {
            self.wallets
                .close_all_active(&payload.user_id, close_reason(subscription.status), true)
                .await?;
        }
        if should_open_wallet {
            self.wallets.open(&subscription, rollover).await?;
        }

        self.mark_processed(&doc_id).await?;
        Ok(())
    }

    /// Dedup transaction. Returns `true` if the
    /// event was already present (duplicate, no writes performed).
    async fn record_event_if_new(
        &self,
        doc_id: &str,
        event_type: &str,
        payload: &BillingEventPayload,
    ) -> CoreResult<bool> {
        let mut tx = self.store.begin().await?;
        let existing = tx.get(collections::WEBHOOK_EVENTS, doc_id).await?;
        if existing.is_some() {
            tx.commit().await?;
            return Ok(true);
        }

        let record = WebhookEventRecord {
            id: doc_id.to_string(),
            provider_event_id: payload.event_id.clone(),
            event_type: event_type.to_string(),
            rc_app_user_id: payload.rc_app_user_id.clone(),
            received_at: Utc::now(),
            processed_at: None,
            payload_json: payload.raw_event.clone(),
            status: WebhookStatus::Received,
        };
        tx.set(collections::WEBHOOK_EVENTS, doc_id, encode(&record)?, false, None)
            .await?;
        tx.commit().await?;
        Ok(false)
    }

    /// State-transition transaction on the subscription document
    /// §4.6 step 3). Returns the merged subscription plus the side
    /// effects to apply outside the transaction: whether to close active
    /// wallets, whether to open a new one, and whether opening should
    /// close existing wallets first (plan or period changed).
    async fn apply_subscription_transition(
        &self,
        payload: &BillingEventPayload,
        event_type: &str,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        original_purchase_date: Option<DateTime<Utc>>,
    ) -> CoreResult<(Subscription, bool, bool, bool)> {
        let mut tx = self.store.begin().await?;

        let existing_doc = tx.get(collections::SUBSCRIPTIONS, &payload.user_id).await?;
        let existing_version = existing_doc.as_ref().map(|doc| doc.version);
        let existing: Option<Subscription> = existing_doc.map(|doc| doc.decode()).transpose()?;

        let resolved_plan = payload
            .product_id
            .as_deref()
            .and_then(|candidate| self.catalog.resolve(candidate));
        if payload.product_id.is_some() && resolved_plan.is_none() {
            warn!(user_id = %payload.user_id, product_id = ?payload.product_id, "webhook product id did not resolve to a known plan");
        }

        let existing_plan_id = existing.as_ref().and_then(|s| s.plan_id.clone());
        let final_plan_id = resolved_plan
            .map(|plan| plan.plan_id.clone())
            .or_else(|| existing_plan_id.clone());
        let plan_changed = final_plan_id != existing_plan_id;

        let existing_period_end = existing.as_ref().and_then(|s| s.current_period_end);
        let period_changed = period_end.is_some() && period_end != existing_period_end;

        let target_status = classify_status(event_type, existing.as_ref().map(|s| s.status));
        let is_active = target_status.is_active();
        let will_renew = payload
            .will_renew
            .unwrap_or(matches!(target_status, SubscriptionStatus::Active));

        let should_open_wallet = is_active && (is_purchase_event(event_type) || plan_changed || period_changed);
        let should_close_wallet = existing.as_ref().map(|s| s.is_active).unwrap_or(false)
            && matches!(
                target_status,
                SubscriptionStatus::Expired | SubscriptionStatus::Refunded | SubscriptionStatus::BillingIssue
            );

        let now = Utc::now();
        let merged = Subscription {
            user_id: payload.user_id.clone(),
            platform: payload.platform.clone().or_else(|| existing.as_ref().and_then(|s| s.platform.clone())),
            rc_app_user_id: payload
                .rc_app_user_id
                .clone()
                .or_else(|| existing.as_ref().and_then(|s| s.rc_app_user_id.clone())),
            product_id: payload
                .product_id
                .clone()
                .or_else(|| existing.as_ref().and_then(|s| s.product_id.clone())),
            plan_id: final_plan_id,
            plan_key: resolved_plan
                .map(|plan| plan.plan_key.clone())
                .or_else(|| existing.as_ref().and_then(|s| s.plan_key.clone())),
            cycle: resolved_plan.map(|plan| plan.cycle).or_else(|| existing.as_ref().and_then(|s| s.cycle)),
            entitlement_ids: if !payload.entitlement_ids.is_empty() {
                payload.entitlement_ids.clone()
            } else {
                existing.as_ref().map(|s| s.entitlement_ids.clone()).unwrap_or_default()
            },
            is_active,
            will_renew,
            status: target_status,
            current_period_start: period_start.or_else(|| existing.as_ref().and_then(|s| s.current_period_start)),
            current_period_end: period_end.or(existing_period_end),
            last_event_at: Some(now),
            original_purchase_date: original_purchase_date
                .or_else(|| existing.as_ref().and_then(|s| s.original_purchase_date)),
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };

        tx.set(
            collections::SUBSCRIPTIONS,
            &payload.user_id,
            encode(&merged)?,
            true,
            existing_version,
        )
        .await?;
        tx.commit().await?;

        Ok((merged, should_close_wallet, should_open_wallet, plan_changed || period_changed))
    }

    async fn mark_processed(&self, doc_id: &str) -> CoreResult<()> {
        let patch = serde_json::json!({
            "processed_at": Utc::now(),
            "status": "processed",
        });
        self.store
            .set(collections::WEBHOOK_EVENTS, doc_id, patch, true)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn processor() -> WebhookProcessor {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let catalog = PlanCatalog::default();
        let wallets = WalletManager::new(store.clone(), catalog.clone());
        WebhookProcessor::new(store, catalog, wallets)
    }

    fn payload(event_type: &str, product_id: Option<&str>) -> BillingEventPayload {
        BillingEventPayload {
            user_id: "u1".to_string(),
            event_id: Some("E1".to_string()),
            event_type: event_type.to_string(),
            rc_app_user_id: None,
            product_id: product_id.map(str::to_string),
            entitlement_ids: vec![],
            platform: None,
            will_renew: None,
            period_start: None,
            period_end: None,
            original_purchase_date: None,
            raw_event: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn initial_purchase_activates_and_opens_wallet() {
        let processor = processor();
        processor
            .process(&payload("INITIAL_PURCHASE", Some("aiorreal-monthly")))
            .await
            .unwrap();

        let subscription = processor
            .store
            .get(collections::SUBSCRIPTIONS, "u1")
            .await
            .unwrap()
            .unwrap()
            .decode::<Subscription>()
            .unwrap();
        assert!(subscription.is_active);
        assert_eq!(subscription.plan_id.as_deref(), Some("premium_monthly"));

        let wallet = processor.wallets.get_active("u1").await.unwrap().unwrap();
        assert_eq!(wallet.quota_total, 100);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_dropped_without_writes() {
        let processor = processor();
        processor
            .process(&payload("INITIAL_PURCHASE", Some("aiorreal-monthly")))
            .await
            .unwrap();
        let wallet_before = processor.wallets.get_active("u1").await.unwrap().unwrap();

        processor
            .process(&payload("INITIAL_PURCHASE", Some("aiorreal-monthly")))
            .await
            .unwrap();
        let wallet_after = processor.wallets.get_active("u1").await.unwrap().unwrap();

        assert_eq!(wallet_before.id, wallet_after.id);
        assert_eq!(wallet_before.quota_used, wallet_after.quota_used);
    }

    #[tokio::test]
    async fn refund_closes_wallet_and_zeroes_remaining() {
        let processor = processor();
        processor
            .process(&payload("INITIAL_PURCHASE", Some("aiorreal-monthly")))
            .await
            .unwrap();
        let wallet = processor.wallets.get_active("u1").await.unwrap().unwrap();

        let mut refund_payload = payload("REFUND", None);
        refund_payload.event_id = Some("E2".to_string());
        processor.process(&refund_payload).await.unwrap();

        assert!(processor.wallets.get_active("u1").await.unwrap().is_none());
        let subscription = processor
            .store
            .get(collections::SUBSCRIPTIONS, "u1")
            .await
            .unwrap()
            .unwrap()
            .decode::<Subscription>()
            .unwrap();
        assert!(!subscription.is_active);
        assert!(matches!(subscription.status, SubscriptionStatus::Refunded));

        let closed_filter = crate::store::Filter::new().eq("id", wallet.id.as_str());
        let docs = processor.store.query(collections::WALLETS, &closed_filter).await.unwrap();
        let closed: crate::model::Wallet = docs[0].decode().unwrap();
        assert_eq!(closed.quota_used, closed.quota_total);
    }

    #[tokio::test]
    async fn plan_change_closes_old_wallet_and_opens_new_one() {
        let processor = processor();
        processor
            .process(&payload("INITIAL_PURCHASE", Some("aiorreal-monthly")))
            .await
            .unwrap();
        let monthly_wallet = processor.wallets.get_active("u1").await.unwrap().unwrap();

        let mut change_payload = payload("PRODUCT_CHANGE", Some("aiorreal-yearly"));
        change_payload.event_id = Some("E2".to_string());
        processor.process(&change_payload).await.unwrap();

        let yearly_wallet = processor.wallets.get_active("u1").await.unwrap().unwrap();
        assert_ne!(monthly_wallet.id, yearly_wallet.id);
        assert_eq!(yearly_wallet.quota_total, 1000);
        assert_eq!(yearly_wallet.quota_used, 0);
    }
}
