//! Data model for the quota & subscription state engine: the documents
//! that live in each collection (§3) plus the small value types the
//! facade returns to callers (§6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing period granularity. Copied from the resolved plan onto both
/// the subscription and the wallet it backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cycle {
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
    Refunded,
    BillingIssue,
}

impl SubscriptionStatus {
    /// `is_active = true` iff `status ∈ {active, cancelled}`.
    pub fn is_active(self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Reserved,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Received,
    Processed,
}

/// Outcome tag for `Reserve`, one variant wider than [`UsageStatus`]
/// because a reservation can also be rejected outright without ever
/// becoming a usage document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReserveStatus {
    Reserved,
    Committed,
    RolledBack,
    Rejected,
}

impl From<UsageStatus> for ReserveStatus {
    fn from(status: UsageStatus) -> Self {
        match status {
            UsageStatus::Reserved => ReserveStatus::Reserved,
            UsageStatus::Committed => ReserveStatus::Committed,
            UsageStatus::RolledBack => ReserveStatus::RolledBack,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document id = `userId`. One per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub rc_app_user_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub plan_key: Option<String>,
    #[serde(default)]
    pub cycle: Option<Cycle>,
    #[serde(default)]
    pub entitlement_ids: Vec<String>,
    pub is_active: bool,
    pub will_renew: bool,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub original_purchase_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document id is store-assigned (a `Uuid` string for [`crate::store::memory::MemoryStore`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub scope: Option<Cycle>,
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
    pub quota_total: i64,
    pub quota_used: i64,
    pub status: WalletStatus,
    #[serde(default)]
    pub last_usage_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn remaining(&self) -> i64 {
        (self.quota_total - self.quota_used).max(0)
    }

    /// Effective end used by [`crate::wallets::WalletManager::ensure_active`]:
    /// the wallet's own period end if it has one, else the subscription's.
    pub fn effective_end(&self, subscription: &Subscription) -> Option<DateTime<Utc>> {
        self.period_end.or(subscription.current_period_end)
    }
}

/// Document id = `{userId}_{requestId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub request_id: String,
    #[serde(default)]
    pub wallet_id: Option<String>,
    pub action: String,
    pub amount: i64,
    pub status: UsageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document id = `rc_{providerEventId}` or the derived hash (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub id: String,
    #[serde(default)]
    pub provider_event_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub rc_app_user_id: Option<String>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    pub payload_json: serde_json::Value,
    pub status: WebhookStatus,
}

/// Composed read model returned by `ensure_quota`/`get_snapshot`.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub plan_id: Option<String>,
    pub plan_key: Option<String>,
    pub cycle: Option<Cycle>,
    pub is_active: bool,
    pub will_renew: bool,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub quota_total: i64,
    pub quota_used: i64,
    pub quota_remaining: i64,
    pub wallet_id: Option<String>,
}

/// Result of a reserve call.
#[derive(Debug, Clone, Serialize)]
pub struct ReserveOutcome {
    pub allowed: bool,
    pub status: ReserveStatus,
    pub remaining: i64,
    pub wallet_id: Option<String>,
}

/// Optional hint passed to `EnsureQuota`, mirroring the premium-status
/// oracle's contract: an independently reported boolean
/// premium flag and a product identifier, carried but not validated
/// here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntitlementHint {
    #[serde(default)]
    pub premium: Option<bool>,
    #[serde(default)]
    pub entitlement_product_id: Option<String>,
}

/// Inbound billing event payload. Timestamp fields arrive
/// as either epoch-millisecond numbers or ISO-8601 strings; they are
/// kept as raw [`serde_json::Value`] here and normalized by
/// [`crate::webhooks::normalize_timestamp`] at the point of use, per the
/// "mixed null/undefined and timestamp shapes" REDESIGN FLAG.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingEventPayload {
    pub user_id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub rc_app_user_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub entitlement_ids: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub will_renew: Option<bool>,
    #[serde(default)]
    pub period_start: Option<serde_json::Value>,
    #[serde(default)]
    pub period_end: Option<serde_json::Value>,
    #[serde(default)]
    pub original_purchase_date: Option<serde_json::Value>,
    #[serde(default)]
    pub raw_event: serde_json::Value,
}
