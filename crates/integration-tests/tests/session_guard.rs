//! Session guard behavior against a fake identity provider.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use rewoven_core::Role;
use rewoven_integration_tests::{FakeIdentity, email, fast_guard, user};
use rewoven_web::config::GuardConfig;
use rewoven_web::guard::{
    AUTH_RECORD_KEY, AuthRecord, GuardOutcome, IdentityChange, LOGIN_PATH, SessionGuard,
};
use rewoven_web::identity::{Credentials, IdentityProvider, SessionUser};
use rewoven_web::store::{KeyValueStore, MemoryStore};

fn guard(identity: &Arc<FakeIdentity>, config: GuardConfig) -> SessionGuard {
    SessionGuard::new(Arc::clone(identity) as Arc<dyn IdentityProvider>, config)
}

/// A session store holding a record for a token issued to `user`.
async fn stored_session(
    identity: &FakeIdentity,
    user: &SessionUser,
    hint: Option<Role>,
) -> MemoryStore {
    let token = identity.issue(user.clone());
    let store = MemoryStore::new();
    let record = AuthRecord {
        access_token: token.expose().to_string(),
        user_id: user.id,
        role_hint: hint,
    };
    store
        .set(AUTH_RECORD_KEY, serde_json::to_string(&record).unwrap())
        .await
        .unwrap();
    store
}

async fn stored_hint(store: &MemoryStore) -> Option<Role> {
    let blob = store.get(AUTH_RECORD_KEY).await.unwrap().unwrap();
    serde_json::from_str::<AuthRecord>(&blob).unwrap().role_hint
}

fn assert_redirect(outcome: &GuardOutcome, path: &str) {
    match outcome {
        GuardOutcome::Redirect(to) => assert_eq!(*to, path),
        other => panic!("expected redirect to {path}, got {other:?}"),
    }
}

// =============================================================================
// Restoration
// =============================================================================

#[tokio::test]
async fn test_stored_session_restores_and_renders() {
    let identity = FakeIdentity::new();
    let factory = user(Some(Role::Factory), "Weaver");
    let store = stored_session(&identity, &factory, Some(Role::Factory)).await;

    let outcome = guard(&identity, fast_guard())
        .check(&store, Some(Role::Factory))
        .await;

    match outcome {
        GuardOutcome::Render { user, .. } => assert_eq!(user, factory),
        other => panic!("expected render, got {other:?}"),
    }
}

#[tokio::test]
async fn test_restoration_timeout_fails_closed() {
    let identity = FakeIdentity::new();
    identity.set_check_delay(Duration::from_millis(500));
    let buyer = user(Some(Role::Buyer), "Ana");
    let store = stored_session(&identity, &buyer, Some(Role::Buyer)).await;

    // The request waits longer than the provider is allowed to take.
    let config = GuardConfig {
        identity_timeout: Duration::from_millis(50),
        restore_budget: Duration::from_secs(2),
        identity_ttl: Duration::from_secs(60),
    };
    let outcome = guard(&identity, config).check(&store, Some(Role::Buyer)).await;

    assert_redirect(&outcome, LOGIN_PATH);
    // A timeout is not proof the session is gone; the record stays.
    assert!(store.get(AUTH_RECORD_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn test_slow_restoration_with_hint_is_loading_then_renders() {
    let identity = FakeIdentity::new();
    identity.set_check_delay(Duration::from_millis(150));
    let buyer = user(Some(Role::Buyer), "Ana");
    let store = stored_session(&identity, &buyer, Some(Role::Buyer)).await;
    let config = GuardConfig {
        identity_timeout: Duration::from_secs(1),
        restore_budget: Duration::from_millis(20),
        identity_ttl: Duration::from_secs(60),
    };
    let guard = guard(&identity, config);

    assert!(matches!(
        guard.check(&store, Some(Role::Buyer)).await,
        GuardOutcome::Loading
    ));

    // The check kept running after the first request gave up waiting.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(matches!(
        guard.check(&store, Some(Role::Buyer)).await,
        GuardOutcome::Render { .. }
    ));
    assert_eq!(identity.check_calls(), 1);
}

#[tokio::test]
async fn test_slow_restoration_without_hint_redirects_to_login() {
    let identity = FakeIdentity::new();
    identity.set_check_delay(Duration::from_millis(150));
    let buyer = user(Some(Role::Buyer), "Ana");
    let store = stored_session(&identity, &buyer, None).await;
    let config = GuardConfig {
        identity_timeout: Duration::from_secs(1),
        restore_budget: Duration::from_millis(20),
        identity_ttl: Duration::from_secs(60),
    };

    let outcome = guard(&identity, config).check(&store, Some(Role::Buyer)).await;
    assert_redirect(&outcome, LOGIN_PATH);
}

#[tokio::test]
async fn test_provider_error_fails_closed_and_is_retried() {
    let identity = FakeIdentity::new();
    let factory = user(Some(Role::Factory), "Weaver");
    let store = stored_session(&identity, &factory, Some(Role::Factory)).await;
    let guard = guard(&identity, fast_guard());

    identity.fail_checks(true);
    assert_redirect(&guard.check(&store, None).await, LOGIN_PATH);

    identity.fail_checks(false);
    assert!(matches!(
        guard.check(&store, None).await,
        GuardOutcome::Render { .. }
    ));
    assert_eq!(identity.check_calls(), 2);
}

#[tokio::test]
async fn test_expired_session_clears_record_and_notifies() {
    let identity = FakeIdentity::new();
    let factory = user(Some(Role::Factory), "Weaver");
    let store = stored_session(&identity, &factory, Some(Role::Factory)).await;
    let guard = guard(&identity, fast_guard());
    let mut changes = guard.changes();

    identity.expire_all();
    assert_redirect(&guard.check(&store, Some(Role::Factory)).await, LOGIN_PATH);

    assert!(store.get(AUTH_RECORD_KEY).await.unwrap().is_none());
    assert_eq!(changes.recv().await.unwrap(), IdentityChange::SignedOut(factory.id));
}

#[tokio::test]
async fn test_concurrent_checks_share_one_provider_call() {
    let identity = FakeIdentity::new();
    identity.set_check_delay(Duration::from_millis(50));
    let factory = user(Some(Role::Factory), "Weaver");
    let store = stored_session(&identity, &factory, Some(Role::Factory)).await;
    let config = GuardConfig {
        restore_budget: Duration::from_millis(500),
        ..fast_guard()
    };
    let guard = guard(&identity, config);

    let (a, b, c) = tokio::join!(
        guard.check(&store, None),
        guard.check(&store, None),
        guard.check(&store, None),
    );
    for outcome in [a, b, c] {
        assert!(matches!(outcome, GuardOutcome::Render { .. }));
    }
    assert_eq!(identity.check_calls(), 1);
}

// =============================================================================
// Role gates
// =============================================================================

#[tokio::test]
async fn test_wrong_role_is_sent_to_its_own_home() {
    let identity = FakeIdentity::new();
    let factory = user(Some(Role::Factory), "Weaver");
    let store = stored_session(&identity, &factory, Some(Role::Factory)).await;
    let guard = guard(&identity, fast_guard());

    assert_redirect(&guard.check(&store, Some(Role::Admin)).await, "/factory");
    assert_redirect(&guard.check(&store, Some(Role::Buyer)).await, "/factory");
}

#[tokio::test]
async fn test_stale_hint_is_rewritten_and_never_grants_access() {
    let identity = FakeIdentity::new();
    let factory = user(Some(Role::Factory), "Weaver");
    // The hint claims admin; the provider says factory.
    let store = stored_session(&identity, &factory, Some(Role::Admin)).await;

    let outcome = guard(&identity, fast_guard())
        .check(&store, Some(Role::Admin))
        .await;

    assert_redirect(&outcome, "/factory");
    assert_eq!(stored_hint(&store).await, Some(Role::Factory));
}

#[tokio::test]
async fn test_unrecognized_role_goes_to_fallback() {
    let identity = FakeIdentity::new();
    let stranger = user(None, "Stranger");
    let store = stored_session(&identity, &stranger, None).await;
    let guard = guard(&identity, fast_guard());

    assert_redirect(&guard.check(&store, Some(Role::Buyer)).await, "/");
    assert!(matches!(
        guard.check(&store, None).await,
        GuardOutcome::Render { .. }
    ));
}

#[tokio::test]
async fn test_missing_or_corrupt_record_is_signed_out() {
    let identity = FakeIdentity::new();
    let guard = guard(&identity, fast_guard());
    let store = MemoryStore::new();

    assert_redirect(&guard.check(&store, None).await, LOGIN_PATH);

    store
        .set(AUTH_RECORD_KEY, "{\"access_token\":".to_string())
        .await
        .unwrap();
    assert_redirect(&guard.check(&store, None).await, LOGIN_PATH);
    assert_eq!(identity.check_calls(), 0);
}

// =============================================================================
// Sign-in and sign-out
// =============================================================================

#[tokio::test]
async fn test_sign_in_stores_record_with_hint() {
    let identity = FakeIdentity::new();
    let buyer = user(Some(Role::Buyer), "Ana");
    identity.add_account("ana@rewoven.test", "pw", buyer.clone());
    let guard = guard(&identity, fast_guard());
    let mut changes = guard.changes();
    let store = MemoryStore::new();

    let signed_in = guard
        .sign_in(&store, &Credentials::new(email("ana@rewoven.test"), "pw"))
        .await
        .unwrap();

    assert_eq!(signed_in, buyer);
    assert_eq!(stored_hint(&store).await, Some(Role::Buyer));
    assert_eq!(changes.recv().await.unwrap(), IdentityChange::SignedIn(buyer.id));
    // The fresh identity is reused without another provider round trip.
    assert!(matches!(
        guard.check(&store, Some(Role::Buyer)).await,
        GuardOutcome::Render { .. }
    ));
    assert_eq!(identity.check_calls(), 0);
}

#[tokio::test]
async fn test_bad_password_stores_nothing() {
    let identity = FakeIdentity::new();
    identity.add_account("ana@rewoven.test", "pw", user(Some(Role::Buyer), "Ana"));
    let guard = guard(&identity, fast_guard());
    let store = MemoryStore::new();

    let result = guard
        .sign_in(&store, &Credentials::new(email("ana@rewoven.test"), "nope"))
        .await;

    assert!(result.is_err());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_sign_out_forgets_token_and_hint_together() {
    let identity = FakeIdentity::new();
    let buyer = user(Some(Role::Buyer), "Ana");
    identity.add_account("ana@rewoven.test", "pw", buyer.clone());
    let guard = guard(&identity, fast_guard());
    let store = MemoryStore::new();
    guard
        .sign_in(&store, &Credentials::new(email("ana@rewoven.test"), "pw"))
        .await
        .unwrap();
    let mut changes = guard.changes();

    guard.sign_out(&store).await.unwrap();

    assert!(store.get(AUTH_RECORD_KEY).await.unwrap().is_none());
    assert_eq!(changes.recv().await.unwrap(), IdentityChange::SignedOut(buyer.id));
    assert_eq!(identity.sign_out_calls(), 1);
    assert_eq!(identity.open_sessions(), 0);
    assert_redirect(&guard.check(&store, Some(Role::Buyer)).await, LOGIN_PATH);
}

#[tokio::test]
async fn test_sign_out_without_session_is_a_no_op() {
    let identity = FakeIdentity::new();
    let guard = guard(&identity, fast_guard());
    let store = MemoryStore::new();

    guard.sign_out(&store).await.unwrap();
    assert_eq!(identity.sign_out_calls(), 0);
}
