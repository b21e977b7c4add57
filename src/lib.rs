pub mod catalog;
pub mod config;
pub mod error;
pub mod facade;
pub mod model;
pub mod store;
pub mod subscriptions;
pub mod time;
pub mod usage;
pub mod users;
pub mod wallets;
pub mod webhooks;

pub use catalog::{PlanCatalog, PlanConfig};
pub use error::{CoreError, CoreResult};
pub use facade::QuotaCore;
pub use model::{
    BillingEventPayload, Cycle, EntitlementHint, ReserveOutcome, ReserveStatus, Snapshot, Subscription,
    SubscriptionStatus, UsageRecord, UsageStatus, User, Wallet, WalletStatus, WebhookEventRecord, WebhookStatus,
};
pub use store::{Store, StoreError};
