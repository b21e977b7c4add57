//! Wallet Manager: owns `quota_wallets`. Opens, closes,
//! and period-rolls wallets, enforcing "one active wallet per user."

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::catalog::PlanCatalog;
use crate::error::{encode, CoreResult};
use crate::model::{Subscription, Wallet, WalletStatus};
use crate::store::{collections, Filter, Store};

#[derive(Clone)]
pub struct WalletManager {
    store: Arc<dyn Store>,
    catalog: PlanCatalog,
}

impl WalletManager {
    pub fn new(store: Arc<dyn Store>, catalog: PlanCatalog) -> Self {
        Self { store, catalog }
    }

    /// "active wallet for user" is the single document with
    /// `status = active`, most-recent-`periodEnd` first. If the index
    /// ever returns more than one (an invariant violation), the rest are
    /// stale and must be closed by the next write path — this method
    /// only reports the winner.
    pub async fn get_active(&self, user_id: &str) -> CoreResult<Option<Wallet>> {
        let filter = Filter::new().eq("user_id", user_id).eq("status", "active");
        let docs = self.store.query(collections::WALLETS, &filter).await?;
        let mut wallets = docs
            .into_iter()
            .map(|doc| doc.decode::<Wallet>())
            .collect::<Result<Vec<_>, _>>()?;
        wallets.sort_by(|a, b| b.period_end.cmp(&a.period_end));
        Ok(wallets.into_iter().next())
    }

    /// Returns a usable active wallet for `subscription`, opening or
    /// rolling one over as needed.
    pub async fn ensure_active(&self, subscription: &Subscription) -> CoreResult<Option<Wallet>> {
        if !subscription.is_active {
            return Ok(None);
        }

        let now = Utc::now();
        let existing = self.get_active(&subscription.user_id).await?;

        if let Some(wallet) = &existing {
            if let Some(end) = wallet.effective_end(subscription) {
                if end > now {
                    return Ok(existing);
                }
            } else {
                warn!(
                    user_id = %subscription.user_id,
                    "active wallet has no effective period end; tolerating stale wallet"
                );
                return Ok(existing);
            }
        }

        if subscription.current_period_end.is_none() && existing.is_some() {
            warn!(
                user_id = %subscription.user_id,
                "subscription lacks a period; returning existing wallet unchanged"
            );
            return Ok(existing);
        }

        if existing.is_some() {
            self.close_all_active(&subscription.user_id, "period_reset", false)
                .await?;
        }

        self.open(subscription, false).await
    }

    /// Opens a new wallet for `subscription`'s resolved plan. Requires
    /// the plan to still be resolvable via `subscription.plan_id`;
    /// returns `None` (logging) if it is not.
    pub async fn open(&self, subscription: &Subscription, close_existing: bool) -> CoreResult<Option<Wallet>> {
        let Some(plan_id) = subscription.plan_id.as_deref() else {
            warn!(user_id = %subscription.user_id, "cannot open wallet: subscription has no plan");
            return Ok(None);
        };
        let Some(plan) = self.catalog.get_by_id(plan_id) else {
            warn!(user_id = %subscription.user_id, plan_id, "cannot open wallet: plan not in catalog");
            return Ok(None);
        };

        if close_existing {
            self.close_all_active(&subscription.user_id, "plan_change", false)
                .await?;
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: Uuid::new_v4().to_string(),
            user_id: subscription.user_id.clone(),
            subscription_id: Some(subscription.user_id.clone()),
            plan_id: Some(plan.plan_id.clone()),
            scope: Some(plan.cycle),
            period_start: subscription.current_period_start,
            period_end: subscription.current_period_end,
            quota_total: plan.quota,
            quota_used: 0,
            status: WalletStatus::Active,
            last_usage_at: None,
            closed_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.store
            .set(collections::WALLETS, &wallet.id, encode(&wallet)?, false)
            .await?;

        Ok(Some(wallet))
    }

    /// Closes every active wallet for `user_id`. Not atomic as a group
    /// Each wallet document is updated independently,
    /// `set_remaining_to_zero` forcibly exhausts the remaining quota
    /// (refund/billing-failure paths); otherwise the closed wallet keeps
    /// its historical `quota_used` (rollover/plan-change paths).
    pub async fn close_all_active(&self, user_id: &str, reason: &str, set_remaining_to_zero: bool) -> CoreResult<()> {
        let filter = Filter::new().eq("user_id", user_id).eq("status", "active");
        let docs = self.store.query(collections::WALLETS, &filter).await?;
        let now: DateTime<Utc> = Utc::now();

        let mut writes = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut wallet: Wallet = doc.decode()?;
            wallet.status = WalletStatus::Closed;
            wallet.closed_reason = Some(reason.to_string());
            if set_remaining_to_zero {
                wallet.quota_used = wallet.quota_total;
            }
            wallet.updated_at = now;
            writes.push((wallet.id.clone(), encode(&wallet)?, false));
        }

        self.store.batch_set(collections::WALLETS, writes).await?;
        Ok(())
    }
}
