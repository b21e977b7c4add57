//! Plan Catalog: an immutable table mapping opaque
//! provider product identifiers and internal plan identifiers to a
//! structured [`PlanConfig`].

use serde::Deserialize;
use tracing::warn;

use crate::model::Cycle;

/// A single catalog entry. `product_ids` are the provider's own
/// (non-canonical) identifiers for the plan; `plan_id`/`plan_key` are
/// this engine's canonical names for it.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    pub plan_id: String,
    pub plan_key: String,
    pub cycle: Cycle,
    pub quota: i64,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

/// Shape accepted by [`PlanCatalog::from_config_str`]: either a bare
/// array of entries, or an object wrapping one under `plans`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogConfigShape {
    Bare(Vec<PlanConfig>),
    Wrapped { plans: Vec<PlanConfig> },
}

/// Process-wide, immutable plan table. Cheap to clone (small `Vec`);
/// constructed once at startup and handed to [`crate::facade::QuotaCore::new`].
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<PlanConfig>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            plans: vec![
                PlanConfig {
                    plan_id: "free".to_string(),
                    plan_key: "free".to_string(),
                    cycle: Cycle::Monthly,
                    quota: 2,
                    product_ids: Vec::new(),
                },
                PlanConfig {
                    plan_id: "premium_monthly".to_string(),
                    plan_key: "premium_monthly".to_string(),
                    cycle: Cycle::Monthly,
                    quota: 100,
                    product_ids: vec!["aiorreal-monthly".to_string()],
                },
                PlanConfig {
                    plan_id: "premium_yearly".to_string(),
                    plan_key: "premium_yearly".to_string(),
                    cycle: Cycle::Yearly,
                    quota: 1000,
                    product_ids: vec!["aiorreal-yearly".to_string(), "aiorreal-annual".to_string()],
                },
            ],
        }
    }
}

impl PlanCatalog {
    pub fn new(plans: Vec<PlanConfig>) -> Self {
        Self { plans }
    }

    /// Parses a catalog override from its configuration string. Never
    /// fails: malformed input is logged and the default catalog is used
    /// instead, per "the system must never fail to start due to catalog
    /// parsing".
    pub fn from_config_str(raw: &str) -> Self {
        match serde_json::from_str::<CatalogConfigShape>(raw) {
            Ok(CatalogConfigShape::Bare(plans)) => Self::new(plans),
            Ok(CatalogConfigShape::Wrapped { plans }) => Self::new(plans),
            Err(err) => {
                warn!(error = %err, "malformed quota catalog configuration, falling back to defaults");
                Self::default()
            }
        }
    }

    /// Exact, case-insensitive lookup by canonical plan id.
    pub fn get_by_id(&self, plan_id: &str) -> Option<&PlanConfig> {
        self.plans
            .iter()
            .find(|plan| plan.plan_id.eq_ignore_ascii_case(plan_id))
    }

    /// Resolves an opaque provider-reported identifier into a plan,
    /// trying the following rules in order:
    /// 1. `"aiorreal-monthly"` / `"aiorreal-yearly"` / `"aiorreal-annual"`
    ///    substrings map directly to the monthly/yearly premium plans,
    ///    absorbing store-prefix variation the provider may add.
    /// 2. exact `plan_id` match.
    /// 3. any registered `product_id` is a substring of the candidate.
    pub fn resolve(&self, candidate: &str) -> Option<&PlanConfig> {
        let normalized = candidate.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        if normalized.contains("aiorreal-monthly") {
            if let Some(plan) = self.find_product_prefix("aiorreal-monthly") {
                return Some(plan);
            }
        }
        if normalized.contains("aiorreal-yearly") || normalized.contains("aiorreal-annual") {
            if let Some(plan) = self
                .find_product_prefix("aiorreal-yearly")
                .or_else(|| self.find_product_prefix("aiorreal-annual"))
            {
                return Some(plan);
            }
        }

        if let Some(plan) = self.get_by_id(&normalized) {
            return Some(plan);
        }

        self.plans.iter().find(|plan| {
            plan.product_ids
                .iter()
                .any(|product_id| normalized.contains(&product_id.to_lowercase()))
        })
    }

    fn find_product_prefix(&self, needle: &str) -> Option<&PlanConfig> {
        self.plans.iter().find(|plan| {
            plan.product_ids
                .iter()
                .any(|product_id| product_id.to_lowercase().contains(needle))
        })
    }
}
