//! Chain and chain-set subscription behaviour

mod support;

use common::{OptionRight, Px};
use option_chains::{
    ChainMap, ChainSetSubscription, ChainSubscription, GenericTick, OptionChain, ReadySignal,
    SubscriptionError, SubscriptionResult, SubscriptionSettings, SubscriptionState,
    readiness_channel,
};
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use support::*;

const WAIT: Duration = Duration::from_secs(2);

fn contract_ids(chain: &OptionChain) -> Vec<i64> {
    chain.contracts().map(|o| o.con_id()).collect()
}

/// Readiness callback counting invocations and forwarding the outcome
fn counted() -> (
    impl FnOnce(SubscriptionResult<()>) + Send + 'static,
    ReadySignal,
    Arc<AtomicUsize>,
) {
    let fired = Arc::new(AtomicUsize::new(0));
    let (callback, signal) = readiness_channel();
    let counter = Arc::clone(&fired);
    let on_ready = move |outcome: SubscriptionResult<()>| {
        counter.fetch_add(1, Ordering::SeqCst);
        callback(outcome);
    };
    (on_ready, signal, fired)
}

#[rstest]
#[case(vec![101, 102, 111, 112])]
#[case(vec![112, 101, 111, 102])]
#[case(vec![111, 112, 102, 101])]
#[tokio::test]
async fn test_chain_ready_only_after_every_contract(#[case] order: Vec<i64>) {
    let (provider, ctx) = market_data(fast_settings());
    let chain = two_by_two_chain(june(), 100);
    let mut sub = ChainSubscription::new(ctx, &chain);
    assert_eq!(sub.len(), 4);

    let (on_ready, signal, fired) = counted();
    sub.subscribe(on_ready).await.unwrap();
    assert_eq!(sub.state(), SubscriptionState::Pending);

    for con_id in &order[..3] {
        provider.push_tick(ready_tick(*con_id));
    }
    settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(!sub.is_ready());
    assert_eq!(sub.remaining(), 1);

    provider.push_tick(ready_tick(order[3]));
    tokio::time::timeout(WAIT, signal.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(sub.is_ready());
    assert!(sub.subscriptions().all(|s| s.is_ready()));

    // Surplus ticks never re-notify
    for con_id in &order {
        provider.push_tick(ready_tick(*con_id));
    }
    settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    sub.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_before_ready_closes_everything_once() {
    let (provider, ctx) = market_data(fast_settings());
    let chain = two_by_two_chain(june(), 100);
    let mut sub = ChainSubscription::new(ctx, &chain);

    let (on_ready, signal, fired) = counted();
    sub.subscribe(on_ready).await.unwrap();
    provider.push_tick(ready_tick(101));
    provider.push_tick(ready_tick(111));
    settle().await;

    sub.unsubscribe().await.unwrap();
    assert_eq!(sub.state(), SubscriptionState::Unsubscribed);
    assert_eq!(provider.open_count(), 0);

    // Late ticks and a second teardown change nothing
    provider.push_tick(ready_tick(102));
    provider.push_tick(ready_tick(112));
    settle().await;
    sub.unsubscribe().await.unwrap();

    let opened = provider.opened();
    assert_eq!(opened.len(), 4);
    for (handle, _) in opened {
        assert_eq!(provider.close_count(handle), 1);
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(matches!(signal.wait().await, Err(SubscriptionError::Cancelled)));
    assert!(sub.subscriptions().all(|s| s.latest_tick().is_none()));
}

#[tokio::test]
async fn test_requests_go_out_calls_first_with_generic_ticks() {
    let (provider, ctx) = market_data(fast_settings());
    let chain = two_by_two_chain(june(), 100);
    let mut sub = ChainSubscription::new(ctx, &chain);

    sub.subscribe(|_| {}).await.unwrap();

    let opened: Vec<i64> = provider.opened().into_iter().map(|(_, id)| id).collect();
    assert_eq!(opened, contract_ids(&chain));
    assert_eq!(opened, vec![101, 102, 111, 112]);
    assert_eq!(provider.last_generic_ticks(), GenericTick::option_defaults());

    sub.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_throttle_spaces_out_requests() {
    let settings = SubscriptionSettings {
        request_throttle: Duration::from_millis(15),
        ..SubscriptionSettings::default()
    };
    let (_provider, ctx) = market_data(settings);
    let mut sub = ChainSubscription::new(ctx, &two_by_two_chain(june(), 100));

    let started = tokio::time::Instant::now();
    sub.subscribe(|_| {}).await.unwrap();
    // Three gaps between four requests
    assert!(started.elapsed() >= Duration::from_millis(45));

    sub.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_second_subscribe_is_rejected() {
    let (_provider, ctx) = market_data(fast_settings());
    let mut sub = ChainSubscription::new(ctx, &two_by_two_chain(june(), 100));

    sub.subscribe(|_| {}).await.unwrap();
    let err = sub.subscribe(|_| {}).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::AlreadySubscribed(_)));

    sub.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_empty_chain_is_ready_immediately() {
    let (provider, ctx) = market_data(fast_settings());
    let empty = OptionChain::new(abc(), june());
    let mut sub = ChainSubscription::new(ctx, &empty);

    let (on_ready, signal, fired) = counted();
    sub.subscribe(on_ready).await.unwrap();

    signal.wait().await.unwrap();
    assert!(sub.is_ready());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(provider.opened().is_empty());
}

#[tokio::test]
async fn test_contract_timeout_fails_the_chain_once() {
    let settings = SubscriptionSettings {
        readiness_timeout: Some(Duration::from_millis(50)),
        ..fast_settings()
    };
    let (provider, ctx) = market_data(settings);
    let chain = two_by_two_chain(june(), 100);
    let mut sub = ChainSubscription::new(ctx, &chain);

    let (on_ready, signal, fired) = counted();
    sub.subscribe(on_ready).await.unwrap();
    for con_id in [101, 102, 111] {
        provider.push_tick(ready_tick(con_id));
    }

    let err = tokio::time::timeout(WAIT, signal.wait())
        .await
        .unwrap()
        .unwrap_err();
    match err {
        SubscriptionError::Timeout { target, timeout_ms } => {
            assert_eq!(timeout_ms, 50);
            assert!(target.contains("#112"), "unexpected target {target}");
        }
        other => panic!("expected timeout, got {other}"),
    }
    assert!(!sub.is_ready());

    settle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    sub.unsubscribe().await.unwrap();
}

#[tokio::test]
async fn test_open_failure_stops_fan_out_and_reports() {
    let (provider, ctx) = market_data(fast_settings());
    let mut sub = ChainSubscription::new(ctx, &two_by_two_chain(june(), 100));
    provider.set_unavailable(true);

    let (on_ready, signal, _fired) = counted();
    let err = sub.subscribe(on_ready).await.unwrap_err();
    assert!(matches!(err, SubscriptionError::Provider(_)));
    assert!(matches!(signal.wait().await, Err(SubscriptionError::Provider(_))));

    provider.set_unavailable(false);
    sub.unsubscribe().await.unwrap();
    assert_eq!(provider.open_count(), 0);
}

#[tokio::test]
async fn test_underlying_is_streamed_alongside_each_option() {
    let settings = SubscriptionSettings {
        subscribe_underlying: true,
        ..fast_settings()
    };
    let (provider, ctx) = market_data(settings);
    let mut sub = ChainSubscription::new(ctx, &two_by_two_chain(june(), 100));

    sub.subscribe(|_| {}).await.unwrap();
    let opened = provider.opened();
    assert_eq!(opened.len(), 8);
    assert_eq!(
        opened.iter().filter(|(_, id)| *id == ABC_CON_ID).count(),
        4
    );

    sub.unsubscribe().await.unwrap();
    assert_eq!(provider.open_count(), 0);
}

#[tokio::test]
async fn test_latest_tick_tracks_after_ready() {
    let (provider, ctx) = market_data(fast_settings());
    let chain = two_by_two_chain(june(), 100);
    let mut sub = ChainSubscription::new(ctx, &chain);

    let (on_ready, signal, _fired) = counted();
    sub.subscribe(on_ready).await.unwrap();
    for con_id in contract_ids(&chain) {
        provider.push_tick(ready_tick(con_id));
    }
    tokio::time::timeout(WAIT, signal.wait())
        .await
        .unwrap()
        .unwrap();

    provider.push_tick(ready_tick(101).with_bid(Px::new(3.0)));
    settle().await;

    let call = sub.call(Px::new(100.0)).unwrap();
    assert_eq!(call.option().right(), OptionRight::Call);
    assert_eq!(call.latest_tick().unwrap().bid, Some(Px::new(3.0)));

    sub.unsubscribe().await.unwrap();
    assert!(sub.call(Px::new(100.0)).unwrap().latest_tick().is_none());
}

#[tokio::test]
async fn test_chain_set_ready_after_every_chain() {
    let (provider, ctx) = market_data(fast_settings());
    let chains: ChainMap = [
        (june(), two_by_two_chain(june(), 100)),
        (july(), two_by_two_chain(july(), 200)),
    ]
    .into_iter()
    .collect();
    let mut set = ChainSetSubscription::new(ctx, &chains);
    assert_eq!(set.len(), 2);
    assert_eq!(set.expirations().collect::<Vec<_>>(), vec![june(), july()]);

    let (on_ready, signal, fired) = counted();
    set.subscribe(on_ready).await.unwrap();

    for con_id in contract_ids(&chains[&july()]) {
        provider.push_tick(ready_tick(con_id));
    }
    settle().await;
    assert!(set[july()].is_ready());
    assert!(!set[june()].is_ready());
    assert!(!set.is_ready());
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    for con_id in contract_ids(&chains[&june()]) {
        provider.push_tick(ready_tick(con_id));
    }
    tokio::time::timeout(WAIT, signal.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(set.is_ready());
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    set.unsubscribe().await.unwrap();
    assert_eq!(set.state(), SubscriptionState::Unsubscribed);
    assert!(set.chains().all(|c| c.state() == SubscriptionState::Unsubscribed));
    assert_eq!(provider.open_count(), 0);
    assert!(set.get(date(2024, 8, 16)).is_none());
}
