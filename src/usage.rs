//! Usage Ledger: the reserve/commit/rollback protocol,
//! the hardest piece of this engine. Implements metered consumption
//! under the document store's transactions, with idempotent replay by
//! `{userId}_{requestId}`.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{encode, CoreResult};
use crate::model::{ReserveOutcome, ReserveStatus, UsageRecord, UsageStatus, Wallet, WalletStatus};
use crate::store::{collections, Store};
use crate::subscriptions::SubscriptionManager;
use crate::wallets::WalletManager;

#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn Store>,
    subscriptions: SubscriptionManager,
    wallets: WalletManager,
}

fn usage_doc_id(user_id: &str, request_id: &str) -> String {
    format!("{user_id}_{request_id}")
}

fn rejected(remaining: i64, wallet_id: Option<String>) -> ReserveOutcome {
    ReserveOutcome {
        allowed: false,
        status: ReserveStatus::Rejected,
        remaining: remaining.max(0),
        wallet_id,
    }
}

impl UsageLedger {
    pub fn new(store: Arc<dyn Store>, subscriptions: SubscriptionManager, wallets: WalletManager) -> Self {
        Self {
            store,
            subscriptions,
            wallets,
        }
    }

    /// Reserves `amount` against the user's active wallet.
    pub async fn reserve(
        &self,
        user_id: &str,
        request_id: &str,
        action: &str,
        amount: i64,
    ) -> CoreResult<ReserveOutcome> {
        if request_id.is_empty() {
            return Ok(rejected(0, None));
        }

        let Some(subscription) = self.subscriptions.get(user_id).await? else {
            return Ok(rejected(0, None));
        };
        if !subscription.is_active {
            return Ok(rejected(0, None));
        }

        let Some(wallet) = self.wallets.ensure_active(&subscription).await? else {
            return Ok(rejected(0, None));
        };

        let doc_id = usage_doc_id(user_id, request_id);
        let mut tx = self.store.begin().await?;

        let Some(wallet_doc) = tx.get(collections::WALLETS, &wallet.id).await? else {
            tx.commit().await?;
            return Ok(rejected(0, Some(wallet.id)));
        };
        let wallet_version = wallet_doc.version;
        let mut current_wallet: Wallet = wallet_doc.decode()?;

        if !matches!(current_wallet.status, WalletStatus::Active) {
            tx.commit().await?;
            return Ok(rejected(current_wallet.remaining(), Some(current_wallet.id)));
        }

        if let Some(existing_doc) = tx.get(collections::USAGES, &doc_id).await? {
            let existing: UsageRecord = existing_doc.decode()?;
            tx.commit().await?;
            let status: ReserveStatus = existing.status.into();
            return Ok(ReserveOutcome {
                allowed: !matches!(existing.status, UsageStatus::RolledBack),
                status,
                remaining: current_wallet.remaining(),
                wallet_id: Some(current_wallet.id),
            });
        }

        if current_wallet.quota_used + amount > current_wallet.quota_total {
            let remaining = current_wallet.remaining();
            tx.commit().await?;
            return Ok(rejected(remaining, Some(current_wallet.id)));
        }

        let now = Utc::now();
        current_wallet.quota_used += amount;
        current_wallet.last_usage_at = Some(now);
        current_wallet.updated_at = now;
        let remaining = current_wallet.remaining();

        // The wallet debit is the contended write in this protocol (§5:
        // "concurrent reserves serialize on the wallet document's
        // version"): CAS against the version read above so a racing
        // reserve against the same wallet surfaces as a retryable conflict
        // instead of silently clobbering the other reservation's debit.
        tx.set(
            collections::WALLETS,
            &current_wallet.id,
            encode(&current_wallet)?,
            false,
            Some(wallet_version),
        )
        .await?;

        let usage = UsageRecord {
            user_id: user_id.to_string(),
            request_id: request_id.to_string(),
            wallet_id: Some(current_wallet.id.clone()),
            action: action.to_string(),
            amount,
            status: UsageStatus::Reserved,
            created_at: now,
            updated_at: now,
        };
        let wallet_id = current_wallet.id.clone();
        tx.set(collections::USAGES, &doc_id, encode(&usage)?, false, None).await?;
        tx.commit().await?;

        Ok(ReserveOutcome {
            allowed: true,
            status: ReserveStatus::Reserved,
            remaining,
            wallet_id: Some(wallet_id),
        })
    }

    /// Idempotent: already-terminal usage
    /// documents are returned unchanged.
    pub async fn commit(&self, user_id: &str, request_id: &str) -> CoreResult<Option<UsageStatus>> {
        let doc_id = usage_doc_id(user_id, request_id);
        let mut tx = self.store.begin().await?;

        let Some(doc) = tx.get(collections::USAGES, &doc_id).await? else {
            tx.commit().await?;
            return Ok(None);
        };
        let usage_version = doc.version;
        let mut usage: UsageRecord = doc.decode()?;

        if !matches!(usage.status, UsageStatus::Reserved) {
            tx.commit().await?;
            return Ok(Some(usage.status));
        }

        usage.status = UsageStatus::Committed;
        usage.updated_at = Utc::now();
        tx.set(collections::USAGES, &doc_id, encode(&usage)?, false, Some(usage_version))
            .await?;
        tx.commit().await?;
        Ok(Some(UsageStatus::Committed))
    }

    /// Commit wins over a later rollback: a
    /// committed reservation is left untouched and its status returned.
    pub async fn rollback(&self, user_id: &str, request_id: &str) -> CoreResult<Option<UsageStatus>> {
        let doc_id = usage_doc_id(user_id, request_id);
        let mut tx = self.store.begin().await?;

        let Some(doc) = tx.get(collections::USAGES, &doc_id).await? else {
            tx.commit().await?;
            return Ok(None);
        };
        let usage_version = doc.version;
        let mut usage: UsageRecord = doc.decode()?;

        if !matches!(usage.status, UsageStatus::Reserved) {
            tx.commit().await?;
            return Ok(Some(usage.status));
        }

        if let Some(wallet_id) = usage.wallet_id.clone() {
            if let Some(wallet_doc) = tx.get(collections::WALLETS, &wallet_id).await? {
                let wallet_version = wallet_doc.version;
                let mut wallet: Wallet = wallet_doc.decode()?;
                wallet.quota_used = (wallet.quota_used - usage.amount).max(0);
                wallet.updated_at = Utc::now();
                tx.set(
                    collections::WALLETS,
                    &wallet_id,
                    encode(&wallet)?,
                    false,
                    Some(wallet_version),
                )
                .await?;
            }
        }

        usage.status = UsageStatus::RolledBack;
        usage.updated_at = Utc::now();
        tx.set(collections::USAGES, &doc_id, encode(&usage)?, false, Some(usage_version))
            .await?;
        tx.commit().await?;
        Ok(Some(UsageStatus::RolledBack))
    }
}
