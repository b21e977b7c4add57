//! Subscription Manager: owns `subscriptions_quota`. Materializes
//! subscription state from plan-sync requests; the event-driven path is
//! orchestrated separately by [`crate::webhooks`], which builds its own
//! merged document inside its own transaction.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::catalog::PlanCatalog;
use crate::error::{encode, CoreResult};
use crate::model::{Subscription, SubscriptionStatus};
use crate::store::{collections, Store};
use crate::time::compute_period;
use crate::wallets::WalletManager;

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn Store>,
    catalog: PlanCatalog,
    wallets: WalletManager,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn Store>, catalog: PlanCatalog, wallets: WalletManager) -> Self {
        Self {
            store,
            catalog,
            wallets,
        }
    }

    pub async fn get(&self, user_id: &str) -> CoreResult<Option<Subscription>> {
        match self.store.get(collections::SUBSCRIPTIONS, user_id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Resolves `candidate` against the catalog, computes a synthetic
    /// period anchored at now, and writes the subscription document.
    /// Opens (or rolls) the user's wallet for the resolved plan.
    pub async fn sync_from_plan(&self, user_id: &str, candidate: &str) -> CoreResult<Option<Subscription>> {
        let Some(plan) = self.catalog.resolve(candidate) else {
            warn!(user_id, candidate, "plan sync: candidate did not resolve to a known plan");
            return Ok(None);
        };

        let now = Utc::now();
        let (period_start, period_end) = compute_period(now, plan.cycle);
        // Every resolved plan, free included, is a usable quota tier: `is_active`
        // here means "has a wallet-bearing plan", not "has a paid premium
        // entitlement" (see DESIGN.md). Only `will_renew` distinguishes free
        // from paid — free has nothing to auto-renew.
        let is_free = plan.plan_id == "free";
        let existing = self.get(user_id).await?;

        let subscription = Subscription {
            user_id: user_id.to_string(),
            platform: existing.as_ref().and_then(|s| s.platform.clone()),
            rc_app_user_id: existing.as_ref().and_then(|s| s.rc_app_user_id.clone()),
            product_id: existing.as_ref().and_then(|s| s.product_id.clone()),
            plan_id: Some(plan.plan_id.clone()),
            plan_key: Some(plan.plan_key.clone()),
            cycle: Some(plan.cycle),
            entitlement_ids: existing.as_ref().map(|s| s.entitlement_ids.clone()).unwrap_or_default(),
            is_active: true,
            will_renew: !is_free,
            status: SubscriptionStatus::Active,
            current_period_start: Some(period_start),
            current_period_end: Some(period_end),
            last_event_at: existing.as_ref().and_then(|s| s.last_event_at),
            original_purchase_date: existing
                .as_ref()
                .and_then(|s| s.original_purchase_date)
                .or(Some(now)),
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.store
            .set(collections::SUBSCRIPTIONS, user_id, encode(&subscription)?, true)
            .await?;

        self.wallets.ensure_active(&subscription).await?;

        Ok(Some(subscription))
    }
}
