mod common;

use common::{blame, channel, MockNode, OWN};
use futures::future::join_all;
use ln_pathpay::control::AdmissionControl;
use ln_pathpay::errors::{PayError, RpcError};
use ln_pathpay::graph::{ChannelKey, GraphStore};
use ln_pathpay::router::{PayDefaults, PaymentExecutor, PaymentOptions, Router};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const PAYEE: u8 = 5;

fn router(node: MockNode) -> (Router<MockNode>, Arc<MockNode>) {
    let node = Arc::new(node);
    let store = Arc::new(GraphStore::default());
    let executor = PaymentExecutor::new(Arc::clone(&node), store, PayDefaults::default());
    (Router::new(Arc::new(executor)), node)
}

/// Two disjoint two-hop paths into the payee, the first through 123x1x0.
fn two_paths() -> MockNode {
    MockNode::new(vec![
        channel(OWN, 3, "100x1x0", 1000, 1, 6),
        channel(3, PAYEE, "123x1x0", 1000, 1, 6),
        channel(OWN, 4, "101x1x0", 1000, 1, 6),
        channel(4, PAYEE, "124x1x0", 1000, 1, 6),
    ])
}

#[tokio::test]
async fn remote_failure_excludes_the_erring_channel() {
    let (router, node) = router(two_paths());
    node.add_invoice("lnbc-e", PAYEE, Some(100_000));
    node.push_outcome(blame("123x1x0", 0));

    let outcome = router
        .pay("lnbc-e", PaymentOptions::default())
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.tries.len(), 2);

    let erring = ChannelKey::new("123x1x0", 0);
    let first = &outcome.tries[0];
    assert!(!first.success);
    assert_eq!(first.error.as_ref().unwrap().erring_channel, Some(erring.clone()));
    assert!(first.route.contains(&erring));
    assert!(!outcome.tries[1].route.contains(&erring));

    let sent = node.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].route.iter().all(|hop| hop.channel != "123x1x0"));
}

#[tokio::test]
async fn settled_route_matches_what_was_sent() {
    let (router, node) = router(two_paths());
    let hash = node.add_invoice("lnbc-ok", PAYEE, Some(250_000));
    let outcome = router
        .pay("lnbc-ok", PaymentOptions::default())
        .await
        .unwrap();
    assert!(outcome.success);
    let settlement = outcome.settlement.unwrap();
    assert_eq!(settlement.payment_hash, hash);

    let sent = node.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payment_hash, hash);
    assert_eq!(sent[0].route, outcome.tries[0].route.hops());
    let last = sent[0].route.last().unwrap();
    assert_eq!(last.forward_msat, 250_000);
    // the invoice asks for 18 blocks at the payee
    assert_eq!(last.cltv_expiry_delta, 18);
}

#[tokio::test]
async fn exclusion_sets_grow_with_every_retry() {
    let (router, node) = router(two_paths());
    node.add_invoice("lnbc-x", PAYEE, Some(100_000));
    node.push_outcome(blame("123x1x0", 0));
    node.push_outcome(blame("124x1x0", 0));

    let outcome = router
        .pay("lnbc-x", PaymentOptions::default())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.tries.len(), 2);
    assert!(matches!(
        outcome.error,
        Some(PayError::Route(ln_pathpay::errors::RouteError::NoPathFound))
    ));

    let mut seen: Vec<HashSet<ChannelKey>> = Vec::new();
    let mut excluded = HashSet::new();
    for attempt in &outcome.tries {
        assert!(attempt.route.channel_keys().all(|k| !excluded.contains(&k)));
        assert!(!seen.contains(&excluded));
        seen.push(excluded.clone());
        if let Some(key) = attempt.error.as_ref().and_then(|e| e.erring_channel.clone()) {
            excluded.insert(key);
        }
    }
}

#[tokio::test]
async fn attempts_never_exceed_the_budget() {
    let mut channels = Vec::new();
    for relay in 10u8..30 {
        channels.push(channel(OWN, relay, &format!("{relay}x1x0"), 1, 1, 6));
        channels.push(channel(relay, PAYEE, &format!("{relay}x2x0"), 1, 1, 6));
    }
    let (router, node) = router(MockNode::new(channels));
    node.add_invoice("lnbc-budget", PAYEE, Some(10_000));
    // relays sort after the payee, so their channels into it have direction 1
    for relay in 10u8..30 {
        node.push_outcome(blame(&format!("{relay}x2x0"), 1));
    }

    let opts = PaymentOptions {
        max_attempts: Some(5),
        ..Default::default()
    };
    let outcome = router.pay("lnbc-budget", opts).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.tries.len(), 5);
    assert_eq!(node.sent().len(), 5);
    assert!(matches!(outcome.error, Some(PayError::AttemptsExhausted(5))));
}

#[tokio::test]
async fn unstructured_rejection_is_terminal() {
    let (router, node) = router(two_paths());
    node.add_invoice("lnbc-r", PAYEE, Some(100_000));
    node.push_outcome(Err(RpcError::Command {
        code: 210,
        message: "payment failed".into(),
        data: None,
    }));
    let outcome = router
        .pay("lnbc-r", PaymentOptions::default())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.tries.len(), 1);
    assert_eq!(outcome.tries[0].error.as_ref().unwrap().code, Some(210));
    assert!(matches!(
        outcome.error,
        Some(PayError::RemoteRejected { code: 210, .. })
    ));
}

#[tokio::test]
async fn malformed_wait_response_is_terminal() {
    let (router, node) = router(two_paths());
    node.add_invoice("lnbc-d", PAYEE, Some(100_000));
    node.push_outcome(Err(RpcError::Decode("expected value at line 1".into())));
    let outcome = router
        .pay("lnbc-d", PaymentOptions::default())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.tries[0].error.as_ref().unwrap().kind, "decode");
}

#[tokio::test]
async fn undecodable_invoice_is_an_error() {
    let (router, node) = router(two_paths());
    let err = router
        .pay("lnbc-unknown", PaymentOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PayError::Rpc(RpcError::Command { .. })));
    assert!(node.sent().is_empty());
    assert!(router.payment_status("lnbc-unknown").await.is_none());
}

#[tokio::test]
async fn amount_override_applies_to_amountless_invoices() {
    let (router, node) = router(two_paths());
    node.add_invoice("lnbc-any", PAYEE, None);
    let err = router
        .pay("lnbc-any", PaymentOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PayError::MissingAmount));

    let opts = PaymentOptions {
        amount_msat: Some(42_000),
        ..Default::default()
    };
    let outcome = router.pay("lnbc-any", opts).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.tries[0].route.amount_delivered(), 42_000);
}

#[tokio::test]
async fn payment_status_returns_the_tries_log() {
    let (router, node) = router(two_paths());
    node.add_invoice("lnbc-s", PAYEE, Some(100_000));
    node.push_outcome(blame("123x1x0", 0));
    let outcome = router
        .pay("lnbc-s", PaymentOptions::default())
        .await
        .unwrap();

    let tries = router.payment_status("lnbc-s").await.unwrap();
    assert_eq!(tries, outcome.tries);
    let json = serde_json::to_value(&tries).unwrap();
    assert_eq!(json[0]["success"], false);
    assert_eq!(json[0]["error"]["erring_channel"], "123x1x0/0");
    assert_eq!(json[1]["success"], true);
    assert!(json[1].get("error").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_share_one_graph() {
    let node = two_paths().with_wait_delay(Duration::from_millis(20));
    let (router, node) = router(node);
    let router = Arc::new(router.with_admission(AdmissionControl::new(2)));
    let invoices: Vec<String> = (0..6).map(|i| format!("lnbc-c{i}")).collect();
    for invoice in &invoices {
        node.add_invoice(invoice, PAYEE, Some(100_000));
    }

    let outcomes = join_all(invoices.iter().map(|invoice| {
        let router = Arc::clone(&router);
        let invoice = invoice.clone();
        tokio::spawn(async move { router.pay(&invoice, PaymentOptions::default()).await })
    }))
    .await;

    for outcome in outcomes {
        assert!(outcome.unwrap().unwrap().success);
    }
    assert_eq!(node.listchannels_calls(), 1);
    assert!(node.max_concurrent_waits() <= 2);
    let stats = router.executor().get_stats();
    assert_eq!(stats.total_payments, 6);
    assert_eq!(stats.succeeded, 6);
    assert_eq!(stats.success_rate, 1.0);
}
