//! Property-based invariants for the reserve/commit/rollback protocol.
//! Generates random operation sequences against a single wallet and
//! checks the ledger never over-commits, and that replay is idempotent.

use std::sync::Arc;

use proptest::prelude::*;
use quota_core::store::memory::MemoryStore;
use quota_core::{PlanCatalog, QuotaCore};

#[derive(Debug, Clone)]
enum Op {
    Reserve { request_id: u8, amount: i64 },
    Commit { request_id: u8 },
    Rollback { request_id: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 1i64..=4).prop_map(|(request_id, amount)| Op::Reserve { request_id, amount }),
        (0u8..6).prop_map(|request_id| Op::Commit { request_id }),
        (0u8..6).prop_map(|request_id| Op::Rollback { request_id }),
    ]
}

fn run(ops: &[Op]) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let core = QuotaCore::new(Arc::new(MemoryStore::new()), PlanCatalog::default());
        core.process_billing_event(&quota_core::BillingEventPayload {
            user_id: "u1".to_string(),
            event_id: Some("E1".to_string()),
            event_type: "INITIAL_PURCHASE".to_string(),
            rc_app_user_id: None,
            product_id: Some("aiorreal-monthly".to_string()),
            entitlement_ids: vec![],
            platform: None,
            will_renew: None,
            period_start: None,
            period_end: None,
            original_purchase_date: None,
            raw_event: serde_json::json!({}),
        })
        .await
        .unwrap();

        for op in ops {
            match *op {
                Op::Reserve { request_id, amount } => {
                    core.reserve("u1", &request_id.to_string(), "ai_detect", Some(amount))
                        .await
                        .unwrap();
                }
                Op::Commit { request_id } => {
                    core.commit("u1", &request_id.to_string()).await.unwrap();
                }
                Op::Rollback { request_id } => {
                    core.rollback("u1", &request_id.to_string()).await.unwrap();
                }
            }

            let snapshot = core.get_snapshot("u1").await.unwrap().unwrap();
            prop_assert_quota_in_bounds(snapshot.quota_used, snapshot.quota_total);
        }

        // Repeating the exact same sequence must not change the wallet
        // beyond what the first pass already did: every request id here
        // was already resolved (reserved/committed/rolled back) above, so
        // replay is a pure no-op read.
        let before = core.get_snapshot("u1").await.unwrap().unwrap();
        for op in ops {
            match *op {
                Op::Reserve { request_id, amount } => {
                    core.reserve("u1", &request_id.to_string(), "ai_detect", Some(amount))
                        .await
                        .unwrap();
                }
                Op::Commit { request_id } => {
                    core.commit("u1", &request_id.to_string()).await.unwrap();
                }
                Op::Rollback { request_id } => {
                    core.rollback("u1", &request_id.to_string()).await.unwrap();
                }
            }
        }
        let after = core.get_snapshot("u1").await.unwrap().unwrap();
        assert_eq!(before.quota_used, after.quota_used);
    });
}

fn prop_assert_quota_in_bounds(used: i64, total: i64) {
    assert!(used >= 0, "quota_used went negative: {used}");
    assert!(used <= total, "quota_used {used} exceeded quota_total {total}");
}

proptest! {
    #[test]
    fn wallet_never_over_or_under_commits(ops in prop::collection::vec(op_strategy(), 0..40)) {
        run(&ops);
    }
}

#[test]
fn repeated_reserve_same_request_id_returns_stable_outcome() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let core = QuotaCore::new(Arc::new(MemoryStore::new()), PlanCatalog::default());
        core.process_billing_event(&quota_core::BillingEventPayload {
            user_id: "u1".to_string(),
            event_id: Some("E1".to_string()),
            event_type: "INITIAL_PURCHASE".to_string(),
            rc_app_user_id: None,
            product_id: Some("aiorreal-monthly".to_string()),
            entitlement_ids: vec![],
            platform: None,
            will_renew: None,
            period_start: None,
            period_end: None,
            original_purchase_date: None,
            raw_event: serde_json::json!({}),
        })
        .await
        .unwrap();

        let first = core.reserve("u1", "r1", "ai_detect", Some(3)).await.unwrap();
        for _ in 0..5 {
            let replay = core.reserve("u1", "r1", "ai_detect", Some(3)).await.unwrap();
            assert_eq!(replay.status, first.status);
            assert_eq!(replay.wallet_id, first.wallet_id);
            assert_eq!(replay.remaining, first.remaining);
        }
    });
}
