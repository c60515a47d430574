//! End to end token lifecycle against the in-memory store

use std::{sync::Arc, time::Duration};

use herald_common::MockClock;
use herald_tokens::{
    LifecycleConfig, MemoryTokenStore, Platform, Registration, TokenFormat, TokenLifecycleManager,
    TokenQuery, TokenStore, TokenValidator, UsageContext, UsageStatus, UserType,
};
use pretty_assertions::assert_eq;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn registration(user: &str, token: &str) -> Registration {
    Registration {
        user_id: user.to_string(),
        token: token.to_string(),
        platform: Platform::Ios,
        user_type: UserType::Client,
        device_id: Some("device-1".to_string()),
        device_name: Some("Phone".to_string()),
    }
}

fn setup() -> (TokenLifecycleManager, MemoryTokenStore, MockClock) {
    let store = MemoryTokenStore::new();
    let clock = MockClock::new();
    let manager = TokenLifecycleManager::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        LifecycleConfig::default(),
    );
    (manager, store, clock)
}

#[test]
fn test_validator_classifies_public_formats() {
    let validator = TokenValidator::new();

    let expo = validator.validate("ExponentPushToken[abc123]");
    assert!(expo.is_valid);
    assert_eq!(expo.format, TokenFormat::Expo);

    let short = validator.validate("short");
    assert!(!short.is_valid);
    assert!(short.errors.iter().any(|e| e.contains("length")));
}

#[tokio::test]
async fn test_unused_tokens_expire_and_drop_out_of_resolution() {
    let (manager, _store, clock) = setup();

    manager
        .register_token(registration("alice", "ExpoPushToken[alice-phone]"))
        .await
        .expect("register");
    manager
        .register_token(registration("bob", "ExpoPushToken[bob-phone]"))
        .await
        .expect("register");

    clock.advance(DAY * 45);

    // Alice kept receiving notifications, bob went quiet
    manager
        .update_token_usage(
            "ExpoPushToken[alice-phone]",
            UsageStatus::Success,
            &UsageContext::default(),
        )
        .await
        .expect("usage");

    let report = manager.cleanup_invalid_tokens(30).await;
    assert_eq!(report.expired_tokens, 1);
    assert_eq!(report.invalid_format_tokens, 0);
    assert_eq!(report.duplicate_tokens, 0);
    assert_eq!(report.deleted_tokens, 0);
    assert!(report.errors.is_empty());

    let resolved = manager
        .get_active_tokens_for_users(["alice", "bob"])
        .await
        .expect("resolve");
    assert_eq!(resolved.tokens.len(), 1);
    assert_eq!(resolved.tokens[0].token.user_id, "alice");
    assert_eq!(resolved.missing_users, ["bob"]);

    let health = manager.refresh_token_health().await;
    assert_eq!(health.total_checked, 1);
    assert_eq!(health.healthy, 1);
    assert_eq!(health.deactivated, 0);
}

#[tokio::test]
async fn test_expired_tokens_are_purged_after_retention() {
    let (manager, store, clock) = setup();

    manager
        .register_token(registration("carol", "ExpoPushToken[carol-phone]"))
        .await
        .expect("register");

    clock.advance(DAY * 31);
    assert_eq!(manager.cleanup_invalid_tokens(30).await.expired_tokens, 1);
    assert_eq!(store.len(), 1);

    // Inactive long enough to fall past the retention window
    clock.advance(DAY * 121);
    let report = manager.cleanup_invalid_tokens(30).await;
    assert_eq!(report.expired_tokens, 0);
    assert_eq!(report.deleted_tokens, 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_failing_token_is_retired_then_revived_by_registration() {
    let (manager, store, _clock) = setup();
    let token = "ExpoPushToken[flaky-device]";

    manager
        .register_token(registration("dave", token))
        .await
        .expect("register");

    let context = UsageContext {
        notification_id: Some("n-1".to_string()),
        error: Some("DeviceMessageRateExceeded".to_string()),
    };
    let mut deactivated = 0;
    for _ in 0..5 {
        deactivated += manager
            .update_token_usage(token, UsageStatus::Failure, &context)
            .await
            .expect("usage")
            .deactivated;
    }
    assert_eq!(deactivated, 1);

    let resolved = manager
        .get_active_tokens_for_users(["dave"])
        .await
        .expect("resolve");
    assert!(resolved.tokens.is_empty());

    let revived = manager
        .register_token(registration("dave", token))
        .await
        .expect("register");
    assert!(revived.is_active);
    assert_eq!(revived.health_metrics.failure_count, 0);

    let records = store
        .find(&TokenQuery::all().user("dave"))
        .await
        .expect("find");
    assert_eq!(records.len(), 1);
}
