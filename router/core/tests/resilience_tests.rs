//! Resilience Integration Tests
//!
//! Health thresholds, timeouts, breaker short-circuits and persistence,
//! observed through the public router surface.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{builder, FixedHealthPersistence, MockAdapter, Step};
use radiant_router::health::JsonFileHealthPersistence;
use radiant_router::resilience::{CircuitBreakerConfig, CircuitState, ResilienceConfig, RetryConfig};
use radiant_router::{
    AttemptFailure, DispatchSettings, InvocationRequest, ModelRouterBuilder, ProviderFamily,
    RouterError, StaticFallbackTable,
};

fn request() -> InvocationRequest {
    InvocationRequest::new("chat").with_user("ping")
}

/// OpenAI alone, one attempt per dispatch
fn solo() -> ModelRouterBuilder {
    builder()
        .with_fallback_policy(Arc::new(StaticFallbackTable::empty()))
        .with_dispatch_settings(
            ProviderFamily::OpenAi,
            DispatchSettings {
                timeout: Duration::from_millis(200),
                max_retries: 0,
            },
        )
}

fn first_failure(err: &RouterError) -> AttemptFailure {
    match err {
        RouterError::AllProvidersFailed { attempts, .. } => attempts[0].failure,
        RouterError::UnknownModel(id) => panic!("unexpected unknown model {id}"),
    }
}

// =============================================================================
// Health Threshold
// =============================================================================

#[tokio::test]
async fn test_three_failures_mark_unhealthy_and_one_success_recovers() {
    let openai = MockAdapter::new(
        ProviderFamily::OpenAi,
        [
            Step::network(),
            Step::network(),
            Step::network(),
            Step::reply("back", 10, 5),
        ],
    );
    let router = solo().with_adapter(openai).build();

    for expected in 1..=2 {
        router.invoke(request()).await.unwrap_err();
        let health = &router.get_provider_status()[2];
        assert_eq!(health.provider, ProviderFamily::OpenAi);
        assert_eq!(health.consecutive_failures, expected);
        assert!(health.healthy);
    }

    router.invoke(request()).await.unwrap_err();
    assert!(!router.get_provider_status()[2].healthy);
    assert!(!router.is_model_available("chat"));

    let response = router.invoke(request()).await.unwrap();
    assert_eq!(response.content, "back");
    let health = &router.get_provider_status()[2];
    assert!(health.healthy);
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.lifetime_errors, 3);
}

// =============================================================================
// Timeouts and Breaker
// =============================================================================

#[tokio::test]
async fn test_slow_provider_times_out() {
    let openai = MockAdapter::new(
        ProviderFamily::OpenAi,
        [Step::Hang(Duration::from_secs(5))],
    );
    let router = solo()
        .with_dispatch_settings(
            ProviderFamily::OpenAi,
            DispatchSettings {
                timeout: Duration::from_millis(50),
                max_retries: 0,
            },
        )
        .with_adapter(openai)
        .build();

    let err = router.invoke(request()).await.unwrap_err();

    assert_eq!(first_failure(&err), AttemptFailure::Timeout);
    assert!(err.to_string().contains("timed out"));
    assert_eq!(router.get_provider_status()[2].consecutive_failures, 1);
    assert_eq!(router.metrics().providers[&ProviderFamily::OpenAi].timeouts, 1);
}

/// Breaker that opens after two failures and cools down quickly
fn fast_breaker(cooldown: Duration) -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryConfig::immediate(),
        breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            failure_window: Duration::from_secs(60),
            cooldown,
        },
    }
}

#[tokio::test]
async fn test_open_breaker_short_circuits_and_counts_as_failure() {
    let openai = MockAdapter::failing(ProviderFamily::OpenAi);
    let router = solo()
        .with_resilience(fast_breaker(Duration::from_secs(60)))
        .with_adapter(openai.clone())
        .build();

    router.invoke(request()).await.unwrap_err();
    router.invoke(request()).await.unwrap_err();
    let err = router.invoke(request()).await.unwrap_err();

    assert_eq!(first_failure(&err), AttemptFailure::CircuitOpen);
    assert_eq!(openai.calls(), 2);

    let health = &router.get_provider_status()[2];
    assert_eq!(health.consecutive_failures, 3);
    assert!(!health.healthy);
    // the rejected call never reached the rate limiter
    assert_eq!(router.get_rate_limit_status()[&ProviderFamily::OpenAi].used, 2);

    let breakers = router.breaker_status();
    assert_eq!(breakers.len(), 1);
    assert_eq!(breakers[0].state, CircuitState::Open);

    router.reset_provider(ProviderFamily::OpenAi);
    assert_eq!(router.breaker_status()[0].state, CircuitState::Closed);
    assert_eq!(router.get_provider_status()[2].consecutive_failures, 0);
    router.invoke(request()).await.unwrap_err();
    assert_eq!(openai.calls(), 3);
}

#[tokio::test]
async fn test_breaker_recovers_through_half_open_trial() {
    let openai = MockAdapter::new(
        ProviderFamily::OpenAi,
        [Step::network(), Step::network(), Step::reply("back", 10, 5)],
    );
    let router = solo()
        .with_resilience(fast_breaker(Duration::from_millis(50)))
        .with_adapter(openai.clone())
        .build();

    router.invoke(request()).await.unwrap_err();
    router.invoke(request()).await.unwrap_err();
    let err = router.invoke(request()).await.unwrap_err();
    assert_eq!(first_failure(&err), AttemptFailure::CircuitOpen);
    assert!(!router.is_model_available("chat"));

    tokio::time::sleep(Duration::from_millis(80)).await;
    let response = router.invoke(request()).await.unwrap();

    assert_eq!(response.content, "back");
    assert_eq!(openai.calls(), 3);
    assert_eq!(router.breaker_status()[0].state, CircuitState::Closed);
    assert!(router.get_provider_status()[2].healthy);
    assert!(router.is_model_available("chat"));
}

#[tokio::test]
async fn test_cancelled_trial_leaves_breaker_usable() {
    let openai = MockAdapter::new(
        ProviderFamily::OpenAi,
        [
            Step::network(),
            Step::network(),
            Step::Hang(Duration::from_secs(5)),
            Step::reply("back", 10, 5),
        ],
    );
    let router = solo()
        .with_resilience(fast_breaker(Duration::from_millis(50)))
        .with_adapter(openai.clone())
        .build();

    router.invoke(request()).await.unwrap_err();
    router.invoke(request()).await.unwrap_err();
    tokio::time::sleep(Duration::from_millis(80)).await;

    // one trial at a time: the second caller is turned away while it runs
    let (trial, rival) = tokio::join!(
        tokio::time::timeout(Duration::from_millis(40), router.invoke(request())),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            router.invoke(request()).await
        }
    );
    assert!(trial.is_err());
    assert_eq!(first_failure(&rival.unwrap_err()), AttemptFailure::CircuitOpen);
    assert_eq!(openai.calls(), 3);
    assert_eq!(router.breaker_status()[0].state, CircuitState::HalfOpen);

    let response = router.invoke(request()).await.unwrap();
    assert_eq!(response.content, "back");
    assert_eq!(openai.calls(), 4);
    assert_eq!(router.breaker_status()[0].state, CircuitState::Closed);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_failed_health_load_leaves_all_healthy() {
    let router = builder()
        .with_health_persistence(Arc::new(FixedHealthPersistence::unreadable()))
        .build();

    assert_eq!(router.load_persisted_health().await, 0);
    let status = router.get_provider_status();
    assert_eq!(status.len(), ProviderFamily::ALL.len());
    assert!(status.iter().all(|h| h.healthy && h.consecutive_failures == 0));
}

#[tokio::test]
async fn test_persistence_errors_never_reach_the_caller() {
    let persistence = Arc::new(FixedHealthPersistence::unreadable());
    let router = builder()
        .with_health_persistence(persistence.clone())
        .with_adapter(MockAdapter::failing(ProviderFamily::OpenAi))
        .with_adapter(MockAdapter::replying(ProviderFamily::LiteLlm, "ok"))
        .build();

    let response = router.invoke(request()).await.unwrap();
    router.flush_housekeeping().await;

    assert_eq!(response.content, "ok");
    assert_eq!(persistence.writes.load(Ordering::SeqCst), 2);
    assert!(router.housekeeping_stats().failed >= 1);
}

#[tokio::test]
async fn test_health_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("provider-health.json");

    let first = solo()
        .with_health_persistence(Arc::new(JsonFileHealthPersistence::new(&path)))
        .with_adapter(MockAdapter::failing(ProviderFamily::OpenAi))
        .build();
    for _ in 0..3 {
        first.invoke(request()).await.unwrap_err();
    }
    first.flush_housekeeping().await;

    let second = solo()
        .with_health_persistence(Arc::new(JsonFileHealthPersistence::new(&path)))
        .build();
    assert!(second.load_persisted_health().await >= 1);
    assert!(!second.is_model_available("chat"));
    assert_eq!(second.get_provider_status()[2].consecutive_failures, 3);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_share_state() {
    let openai = MockAdapter::replying(ProviderFamily::OpenAi, "ok");
    let router = Arc::new(builder().with_adapter(openai.clone()).build());

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.invoke(request()).await })
        })
        .collect();
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.provider, ProviderFamily::OpenAi);
    }

    assert_eq!(openai.calls(), 32);
    let metrics = router.metrics();
    assert_eq!(metrics.invocations, 32);
    assert_eq!(metrics.invocations_succeeded, 32);
    assert_eq!(router.get_rate_limit_status()[&ProviderFamily::OpenAi].used, 32);
}
