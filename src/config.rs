//! Process-wide tunables, read once from the environment, as
//! `once_cell::sync::Lazy` statics rather than a config struct threaded
//! through every constructor.

use once_cell::sync::Lazy;

/// Optional JSON plan-catalog override. When unset, `PlanCatalog::default()`
/// is used. See [`crate::catalog::PlanCatalog::from_config_str`].
pub static QUOTA_CATALOG_CONFIG: Lazy<Option<String>> =
    Lazy::new(|| std::env::var("QUOTA_CATALOG_CONFIG").ok());

/// Amount assumed for a Reserve call that omits it.
pub static DEFAULT_RESERVE_AMOUNT: Lazy<i64> = Lazy::new(|| {
    std::env::var("QUOTA_DEFAULT_RESERVE_AMOUNT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1)
});
