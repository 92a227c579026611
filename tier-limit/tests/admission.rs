//! End-to-end admission through configuration, identity resolution and the
//! in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use tier_limit::AdmissionConfig;
use tier_limit::AdmissionEngine;
use tier_limit::ClientThrottle;
use tier_limit::IdentityResolver;
use tier_limit::PolicyConfig;
use tier_limit::QuotaSnapshot;
use tier_limit::RequestHints;
use tier_limit::Tier;
use tier_limit::TokenTierSource;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn config() -> AdmissionConfig {
    let mut config = AdmissionConfig::default();
    config
        .tiers
        .insert("free".to_string(), PolicyConfig::new(5, 60));
    config
        .tiers
        .insert("pro".to_string(), PolicyConfig::new(50, 60));
    config
}

async fn setup() -> (AdmissionEngine, IdentityResolver) {
    let config = config();
    let engine = AdmissionEngine::from_config(&config).await.unwrap();
    let tiers = TokenTierSource::new().with_token("pro-user", Tier::Pro);
    let resolver = IdentityResolver::from_config(&config.identity, Arc::new(tiers));
    (engine, resolver)
}

#[tokio::test]
async fn test_documented_scenario() {
    let (engine, resolver) = setup().await;
    let caller = resolver
        .resolve(&RequestHints::default().with_caller_token("A"))
        .await;
    assert_eq!(caller.tier(), Tier::Free);

    for (secs, remaining) in [(0, 4), (2, 3), (4, 2), (6, 1), (8, 0)] {
        let result = engine.decide(&caller, at(secs)).await;
        assert!(result.success);
        assert_eq!(result.remaining, remaining);
    }

    let rejected = engine.decide(&caller, at(12)).await;
    assert!(!rejected.success);
    assert_eq!(rejected.retry_after_secs(at(12)), 48);
    assert_eq!(rejected.retry_after(at(12)), Duration::from_secs(48));
}

#[tokio::test]
async fn test_tiers_and_anonymous_callers() {
    let (engine, resolver) = setup().await;

    let pro = resolver
        .resolve(&RequestHints::default().with_caller_token("pro-user"))
        .await;
    let result = engine.decide(&pro, at(0)).await;
    assert_eq!(result.tier, Tier::Pro);
    assert_eq!(result.limit, 50);

    // Enterprise keeps its built-in default policy
    assert_eq!(engine.registry().policy_for(Tier::Enterprise).limit(), 10_000);

    // Anonymous callers without an address share one bucket
    let first = resolver.resolve(&RequestHints::default()).await;
    let second = resolver.resolve(&RequestHints::default()).await;
    assert_eq!(first, second);
    for _ in 0..5 {
        assert!(engine.decide(&first, at(0)).await.success);
    }
    assert!(!engine.decide(&second, at(0)).await.success);

    // An address gets its own bucket
    let by_ip = resolver
        .resolve(&RequestHints::default().with_client_ip("198.51.100.1"))
        .await;
    assert!(engine.decide(&by_ip, at(0)).await.success);
}

#[tokio::test]
async fn test_client_throttle_follows_engine_results() {
    let (engine, resolver) = setup().await;
    let caller = resolver
        .resolve(&RequestHints::default().with_caller_token("B"))
        .await;
    let throttle = ClientThrottle::new();

    let mut now = at(0);
    while throttle.check(now).is_continue() {
        let result = engine.decide(&caller, now).await;
        assert!(result.success, "the throttle should stop calls before a rejection");
        throttle.observe(QuotaSnapshot {
            limit: result.limit,
            remaining: result.remaining,
            reset_at: result.reset_at,
            observed_at: now,
        });
        now += chrono::TimeDelta::seconds(1);
    }

    assert_eq!(throttle.snapshot().unwrap().remaining, 0);
    assert_eq!(throttle.countdown(now), Some(Duration::from_secs(55)));
}
