//! End-to-end scenarios driven entirely through the
//! public `QuotaCore` facade against `MemoryStore`.

use std::sync::Arc;

use quota_core::model::{BillingEventPayload, ReserveStatus, UsageStatus};
use quota_core::store::memory::MemoryStore;
use quota_core::{EntitlementHint, PlanCatalog, QuotaCore};

fn core() -> QuotaCore {
    QuotaCore::new(Arc::new(MemoryStore::new()), PlanCatalog::default())
}

fn purchase_payload(event_id: &str, user_id: &str, product_id: &str) -> BillingEventPayload {
    BillingEventPayload {
        user_id: user_id.to_string(),
        event_id: Some(event_id.to_string()),
        event_type: "INITIAL_PURCHASE".to_string(),
        rc_app_user_id: None,
        product_id: Some(product_id.to_string()),
        entitlement_ids: vec![],
        platform: None,
        will_renew: None,
        period_start: None,
        period_end: None,
        original_purchase_date: None,
        raw_event: serde_json::json!({}),
    }
}

fn status_event(event_id: &str, user_id: &str, event_type: &str) -> BillingEventPayload {
    BillingEventPayload {
        user_id: user_id.to_string(),
        event_id: Some(event_id.to_string()),
        event_type: event_type.to_string(),
        rc_app_user_id: None,
        product_id: None,
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
async fn scenario_free_user_reserves_twice() {
    let core = core();
    core.ensure_quota(
        "u1",
        Some(EntitlementHint {
            premium: Some(false),
            entitlement_product_id: None,
        }),
    )
    .await
    .unwrap();

    let first = core.reserve("u1", "r1", "ai_detect", None).await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, 1);

    let second = core.reserve("u1", "r2", "ai_detect", None).await.unwrap();
    assert!(second.allowed);
    assert_eq!(second.remaining, 0);

    let third = core.reserve("u1", "r3", "ai_detect", None).await.unwrap();
    assert!(!third.allowed);
    assert_eq!(third.status, ReserveStatus::Rejected);
    assert_eq!(third.remaining, 0);
}

#[tokio::test]
async fn scenario_idempotent_replay_does_not_double_debit() {
    let core = core();
    core.process_billing_event(&purchase_payload("E1", "u1", "aiorreal-monthly"))
        .await
        .unwrap();

    // Drain 5 units of the 100-unit monthly quota before the scenario starts.
    for i in 0..5 {
        core.reserve("u1", &format!("warmup-{i}"), "ai_detect", Some(1))
            .await
            .unwrap();
    }

    let first = core.reserve("u1", "r1", "ai_detect", Some(1)).await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, 94);

    let replay = core.reserve("u1", "r1", "ai_detect", Some(1)).await.unwrap();
    assert!(replay.allowed);
    assert_eq!(replay.status, ReserveStatus::Reserved);
    assert_eq!(replay.remaining, 94);
}

#[tokio::test]
async fn scenario_rollback_after_commit_is_ignored() {
    let core = core();
    core.process_billing_event(&purchase_payload("E1", "u1", "aiorreal-monthly"))
        .await
        .unwrap();

    core.reserve("u1", "r1", "ai_detect", Some(1)).await.unwrap();
    let committed = core.commit("u1", "r1").await.unwrap().unwrap();
    assert_eq!(committed, UsageStatus::Committed);

    let rollback = core.rollback("u1", "r1").await.unwrap().unwrap();
    assert_eq!(rollback, UsageStatus::Committed);
}

#[tokio::test]
async fn scenario_refund_closes_wallet_and_blocks_further_reserves() {
    let core = core();
    core.process_billing_event(&purchase_payload("E1", "u1", "aiorreal-monthly"))
        .await
        .unwrap();
    core.reserve("u1", "r1", "ai_detect", Some(30)).await.unwrap();

    let refund = status_event("E2", "u1", "REFUND");
    core.process_billing_event(&refund).await.unwrap();

    let snapshot = core.get_snapshot("u1").await.unwrap().unwrap();
    assert!(!snapshot.is_active);

    let after_refund = core.reserve("u1", "r2", "ai_detect", Some(1)).await.unwrap();
    assert!(!after_refund.allowed);
}

#[tokio::test]
async fn scenario_plan_change_monthly_to_yearly_opens_fresh_wallet() {
    let core = core();
    core.process_billing_event(&purchase_payload("E1", "u1", "aiorreal-monthly"))
        .await
        .unwrap();
    core.reserve("u1", "r1", "ai_detect", Some(10)).await.unwrap();

    let change = purchase_payload("E2", "u1", "aiorreal-yearly");
    let change = BillingEventPayload {
        event_type: "PRODUCT_CHANGE".to_string(),
        ..change
    };
    core.process_billing_event(&change).await.unwrap();

    let snapshot = core.get_snapshot("u1").await.unwrap().unwrap();
    assert_eq!(snapshot.plan_id.as_deref(), Some("premium_yearly"));
    assert_eq!(snapshot.quota_total, 1000);
    assert_eq!(snapshot.quota_used, 0);
}

#[tokio::test]
async fn scenario_duplicate_webhook_is_a_no_op_on_replay() {
    let core = core();
    let event = purchase_payload("E1", "u1", "aiorreal-monthly");
    core.process_billing_event(&event).await.unwrap();
    let snapshot_before = core.get_snapshot("u1").await.unwrap().unwrap();

    core.process_billing_event(&event).await.unwrap();
    let snapshot_after = core.get_snapshot("u1").await.unwrap().unwrap();

    assert_eq!(snapshot_before.wallet_id, snapshot_after.wallet_id);
    assert_eq!(snapshot_before.quota_used, snapshot_after.quota_used);
}

#[tokio::test]
async fn boundary_reserve_on_closed_wallet_rejects_with_wallet_remaining() {
    let core = core();
    core.process_billing_event(&purchase_payload("E1", "u1", "aiorreal-monthly"))
        .await
        .unwrap();

    let refund = status_event("E2", "u1", "REFUND");
    core.process_billing_event(&refund).await.unwrap();

    let outcome = core.reserve("u1", "r1", "ai_detect", Some(1)).await.unwrap();
    assert!(!outcome.allowed);
    assert_eq!(outcome.status, ReserveStatus::Rejected);
}

#[tokio::test]
async fn billing_issue_event_puts_subscription_in_billing_issue_status() {
    let core = core();
    core.process_billing_event(&purchase_payload("E1", "u1", "aiorreal-monthly"))
        .await
        .unwrap();

    let issue = status_event("E2", "u1", "GRACE_PERIOD");
    core.process_billing_event(&issue).await.unwrap();

    let snapshot = core.get_snapshot("u1").await.unwrap().unwrap();
    assert!(!snapshot.is_active);
    assert!(snapshot.wallet_id.is_none());
}
