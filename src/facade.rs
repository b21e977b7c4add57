//! `QuotaCore`: composes the Plan Catalog,
//! Store, and the five managers into the public surface consumed by the
//! outer API layer. Constructed once at startup and passed explicitly —
//! the REDESIGN FLAGS item replacing the source's ambient singleton.

use std::sync::Arc;

use crate::catalog::PlanCatalog;
use crate::config::DEFAULT_RESERVE_AMOUNT;
use crate::error::CoreResult;
use crate::model::{BillingEventPayload, EntitlementHint, ReserveOutcome, Snapshot, UsageStatus};
use crate::store::Store;
use crate::subscriptions::SubscriptionManager;
use crate::usage::UsageLedger;
use crate::users::UserManager;
use crate::wallets::WalletManager;
use crate::webhooks::WebhookProcessor;

#[derive(Clone)]
pub struct QuotaCore {
    catalog: PlanCatalog,
    users: UserManager,
    subscriptions: SubscriptionManager,
    wallets: WalletManager,
    usage: UsageLedger,
    webhooks: WebhookProcessor,
}

impl QuotaCore {
    pub fn new(store: Arc<dyn Store>, catalog: PlanCatalog) -> Self {
        let users = UserManager::new(store.clone());
        let wallets = WalletManager::new(store.clone(), catalog.clone());
        let subscriptions = SubscriptionManager::new(store.clone(), catalog.clone(), wallets.clone());
        let usage = UsageLedger::new(store.clone(), subscriptions.clone(), wallets.clone());
        let webhooks = WebhookProcessor::new(store, catalog.clone(), wallets.clone());
        Self {
            catalog,
            users,
            subscriptions,
            wallets,
            usage,
            webhooks,
        }
    }

    /// Builds the catalog from [`crate::config::QUOTA_CATALOG_CONFIG`]
    /// (falling back to defaults on an unset or malformed override).
    pub fn from_env(store: Arc<dyn Store>) -> Self {
        let catalog = match crate::config::QUOTA_CATALOG_CONFIG.as_deref() {
            Some(raw) => PlanCatalog::from_config_str(raw),
            None => PlanCatalog::default(),
        };
        Self::new(store, catalog)
    }

    /// Ensures the user record exists, applies
    /// the premium-oracle hint (if given) as a plan sync, and returns the
    /// resulting snapshot.
    pub async fn ensure_quota(&self, user_id: &str, hint: Option<EntitlementHint>) -> CoreResult<Option<Snapshot>> {
        self.users.ensure(user_id, None).await?;

        if let Some(hint) = hint {
            let candidate = match hint.premium {
                Some(true) => hint.entitlement_product_id.as_deref(),
                _ => Some("free"),
            };
            if let Some(candidate) = candidate {
                self.subscriptions.sync_from_plan(user_id, candidate).await?;
            }
        }

        self.get_snapshot(user_id).await
    }

    /// Composes the current subscription, wallet, and plan into a single read model.
    pub async fn get_snapshot(&self, user_id: &str) -> CoreResult<Option<Snapshot>> {
        let Some(subscription) = self.subscriptions.get(user_id).await? else {
            return Ok(None);
        };
        let wallet = self.wallets.get_active(user_id).await?;
        let plan = subscription.plan_id.as_deref().and_then(|id| self.catalog.get_by_id(id));

        let quota_total = wallet
            .as_ref()
            .map(|w| w.quota_total)
            .or_else(|| plan.map(|p| p.quota))
            .unwrap_or(0);
        let quota_used = wallet.as_ref().map(|w| w.quota_used).unwrap_or(0);
        let quota_remaining = (quota_total - quota_used).max(0);
        let period_start = wallet
            .as_ref()
            .and_then(|w| w.period_start)
            .or(subscription.current_period_start);
        let period_end = wallet
            .as_ref()
            .and_then(|w| w.period_end)
            .or(subscription.current_period_end);

        Ok(Some(Snapshot {
            plan_id: subscription.plan_id,
            plan_key: subscription.plan_key,
            cycle: subscription.cycle,
            is_active: subscription.is_active,
            will_renew: subscription.will_renew,
            period_start,
            period_end,
            quota_total,
            quota_used,
            quota_remaining,
            wallet_id: wallet.map(|w| w.id),
        }))
    }

    /// `amount` defaults to
    /// [`crate::config::DEFAULT_RESERVE_AMOUNT`] when omitted.
    pub async fn reserve(
        &self,
        user_id: &str,
        request_id: &str,
        action: &str,
        amount: Option<i64>,
    ) -> CoreResult<ReserveOutcome> {
        let amount = amount.unwrap_or(*DEFAULT_RESERVE_AMOUNT);
        self.usage.reserve(user_id, request_id, action, amount).await
    }

    /// Marks a reservation as committed.
    pub async fn commit(&self, user_id: &str, request_id: &str) -> CoreResult<Option<UsageStatus>> {
        self.usage.commit(user_id, request_id).await
    }

    /// Releases a reservation's quota back to the wallet.
    pub async fn rollback(&self, user_id: &str, request_id: &str) -> CoreResult<Option<UsageStatus>> {
        self.usage.rollback(user_id, request_id).await
    }

    /// Applies an inbound billing event to subscription and wallet state.
    pub async fn process_billing_event(&self, payload: &BillingEventPayload) -> CoreResult<()> {
        self.webhooks.process(payload).await
    }
}
