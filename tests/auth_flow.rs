//! End-to-end auth-flow properties, exercised against the in-memory store
//! implementations so no external infrastructure is needed.

use std::sync::Arc;
use std::time::Duration;

use quill_server::auth::{BaseClaims, Role, TokenCodec};
use quill_server::configuration::JwtSettings;
use quill_server::error::{AppError, AuthError};
use quill_server::identity::{MemoryIdentityStore, User};
use quill_server::middleware::{authorize, Passage};
use quill_server::session::{
    MemoryRevocationLog, MemorySessionRegistry, RevocationStore, SessionRegistry,
};
use quill_server::startup::AppState;
use quill_server::verification::MemoryVerificationStore;

const SECRET: &str = "test-secret-key-at-least-32-characters-long";

fn jwt_settings(access_secs: u64, refresh_secs: u64) -> JwtSettings {
    JwtSettings {
        secret: SECRET.to_string(),
        access_ttl: Duration::from_secs(access_secs),
        refresh_ttl: Duration::from_secs(refresh_secs),
        issuer: "quill".to_string(),
    }
}

struct Harness {
    state: AppState,
    identities: Arc<MemoryIdentityStore>,
    sessions: Arc<MemorySessionRegistry>,
    log: Arc<MemoryRevocationLog>,
}

fn harness(single_session: bool) -> Harness {
    let identities = Arc::new(MemoryIdentityStore::new());
    let sessions = Arc::new(MemorySessionRegistry::new());
    let log = Arc::new(MemoryRevocationLog::new());
    let revocations = Arc::new(RevocationStore::new(log.clone()));
    let codec = TokenCodec::new(&jwt_settings(900, 604_800));

    let state = AppState::new(
        identities.clone(),
        sessions.clone(),
        revocations,
        Arc::new(MemoryVerificationStore::new()),
        None,
        codec,
        single_session,
        Duration::from_secs(5),
    );

    Harness {
        state,
        identities,
        sessions,
        log,
    }
}

async fn register_alice(harness: &Harness) -> (User, quill_server::identity::TokenPair) {
    harness
        .state
        .credentials
        .register("alice", "alice@example.com", "Password123")
        .await
        .expect("registration failed")
}

/// Codec sharing the process secret but minting already-expired access
/// tokens, for driving the rotation path.
fn expired_access_token(user: &User) -> String {
    let codec = TokenCodec::new(&jwt_settings(0, 1));
    let (token, _) = codec
        .mint_access(BaseClaims {
            user_id: user.id,
            uuid: user.uuid,
            role: user.role,
        })
        .unwrap();
    token
}

fn forged_token(token: &str) -> String {
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
    parts[2] = "A".repeat(parts[2].len());
    parts.join(".")
}

fn assert_rejected_with(result: Result<Passage, AppError>, expected: AuthError) {
    match result {
        Err(AppError::Auth(kind)) => assert_eq!(kind, expected),
        other => panic!("expected rejection {:?}, got {:?}", expected, other.map(|_| "passage")),
    }
}

#[tokio::test]
async fn login_returns_access_expiring_before_refresh() {
    let harness = harness(true);
    let (_, pair) = register_alice(&harness).await;

    let now = chrono::Utc::now();
    assert!(pair.access_expires_at > now);
    assert!(pair.refresh_expires_at > now);
    assert!(pair.access_expires_at < pair.refresh_expires_at);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let harness = harness(true);
    register_alice(&harness).await;

    let result = harness
        .state
        .credentials
        .register("alice2", "alice@example.com", "Password123")
        .await;
    assert!(matches!(
        result,
        Err(AppError::Auth(AuthError::DuplicateIdentity))
    ));
}

#[tokio::test]
async fn wrong_password_and_unknown_email_fail_identically() {
    let harness = harness(true);
    register_alice(&harness).await;

    let wrong_password = harness
        .state
        .credentials
        .email_login("alice@example.com", "WrongPassword1")
        .await;
    let unknown_email = harness
        .state
        .credentials
        .email_login("nobody@example.com", "Password123")
        .await;

    for result in [wrong_password, unknown_email] {
        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::InvalidCredential))
        ));
    }
}

#[tokio::test]
async fn revoked_refresh_token_is_rejected_even_with_valid_access() {
    let harness = harness(true);
    let (_, pair) = register_alice(&harness).await;

    harness
        .state
        .revocations
        .revoke(&pair.refresh_token)
        .await
        .unwrap();

    // Revocation wins over an otherwise perfectly valid access token.
    let result = authorize(
        &harness.state,
        Some(&pair.access_token),
        Some(&pair.refresh_token),
    )
    .await;
    assert_rejected_with(result, AuthError::Revoked);

    let result = authorize(&harness.state, None, Some(&pair.refresh_token)).await;
    assert_rejected_with(result, AuthError::Revoked);
}

#[tokio::test]
async fn second_login_displaces_the_first_session() {
    let harness = harness(true);
    let (_, pair_a) = register_alice(&harness).await;
    let (user, pair_b) = harness
        .state
        .credentials
        .email_login("alice@example.com", "Password123")
        .await
        .unwrap();

    // Session A's refresh token was revoked by session B's login.
    let result = authorize(&harness.state, None, Some(&pair_a.refresh_token)).await;
    assert_rejected_with(result, AuthError::Revoked);

    // Session B proceeds (via rotation, since no access token is sent).
    let result = authorize(&harness.state, None, Some(&pair_b.refresh_token)).await;
    assert!(matches!(result, Ok(Passage::Rotated { .. })));

    assert_eq!(
        harness.sessions.lookup(user.uuid).await.unwrap(),
        Some(pair_b.refresh_token.clone())
    );
}

#[tokio::test]
async fn without_single_session_mode_both_sessions_stay_valid() {
    let harness = harness(false);
    let (user, pair_a) = register_alice(&harness).await;
    let (_, pair_b) = harness
        .state
        .credentials
        .email_login("alice@example.com", "Password123")
        .await
        .unwrap();

    for pair in [&pair_a, &pair_b] {
        let result = authorize(&harness.state, None, Some(&pair.refresh_token)).await;
        assert!(matches!(result, Ok(Passage::Rotated { .. })));
    }

    // No registry entry is written when the mode is off.
    assert_eq!(harness.sessions.lookup(user.uuid).await.unwrap(), None);
}

#[tokio::test]
async fn expired_access_with_valid_refresh_rotates_silently() {
    let harness = harness(true);
    let (user, pair) = register_alice(&harness).await;

    let stale_access = expired_access_token(&user);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let passage = authorize(
        &harness.state,
        Some(&stale_access),
        Some(&pair.refresh_token),
    )
    .await
    .expect("rotation should succeed");

    match passage {
        Passage::Rotated { claims, rotation } => {
            assert_ne!(rotation.token, stale_access);
            // The replacement expires later than the token it replaces.
            assert!(rotation.expires_at_ms > chrono::Utc::now().timestamp_millis());
            assert_eq!(rotation.expires_at_ms, claims.expires_at().timestamp_millis());
            // The rotated token verifies under the live codec.
            let verified = harness.state.codec.verify_access(&rotation.token).unwrap();
            assert_eq!(verified.user_id, user.id);
            assert_eq!(verified.uuid, user.uuid);
        }
        Passage::Valid(_) => panic!("expired access token must not pass as valid"),
    }
}

#[tokio::test]
async fn missing_access_token_takes_the_rotation_path() {
    let harness = harness(true);
    let (_, pair) = register_alice(&harness).await;

    let passage = authorize(&harness.state, None, Some(&pair.refresh_token))
        .await
        .unwrap();
    assert!(matches!(passage, Passage::Rotated { .. }));
}

#[tokio::test]
async fn rotation_reads_the_role_fresh_from_the_identity_store() {
    let harness = harness(true);
    let (user, pair) = register_alice(&harness).await;

    // Role changed after the refresh token was issued.
    harness.identities.set_role(user.id, Role::Admin).await;

    let passage = authorize(&harness.state, None, Some(&pair.refresh_token))
        .await
        .unwrap();
    assert_eq!(passage.claims().role, Role::Admin);
}

#[tokio::test]
async fn revoked_refresh_cannot_be_used_to_rotate() {
    let harness = harness(true);
    let (user, pair) = register_alice(&harness).await;

    harness
        .state
        .revocations
        .revoke(&pair.refresh_token)
        .await
        .unwrap();

    let stale_access = expired_access_token(&user);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let result = authorize(
        &harness.state,
        Some(&stale_access),
        Some(&pair.refresh_token),
    )
    .await;
    assert_rejected_with(result, AuthError::Revoked);
}

#[tokio::test]
async fn forged_access_token_is_rejected_without_refresh_fallback() {
    let harness = harness(true);
    let (_, pair) = register_alice(&harness).await;

    let forged = forged_token(&pair.access_token);
    let result = authorize(&harness.state, Some(&forged), Some(&pair.refresh_token)).await;

    // A bad signature never falls back to the (valid) refresh cookie.
    assert_rejected_with(result, AuthError::BadSignature);
}

#[tokio::test]
async fn no_credentials_at_all_reads_as_an_expired_session() {
    let harness = harness(true);

    let result = authorize(&harness.state, None, None).await;
    assert_rejected_with(result, AuthError::Expired);

    let result = authorize(&harness.state, None, Some("not-a-token")).await;
    assert_rejected_with(result, AuthError::Expired);
}

#[tokio::test]
async fn frozen_identity_receives_no_tokens() {
    let harness = harness(true);
    let (user, _) = register_alice(&harness).await;

    harness.identities.set_frozen(user.id, true).await;

    let result = harness
        .state
        .credentials
        .email_login("alice@example.com", "Password123")
        .await;
    assert!(matches!(result, Err(AppError::Auth(AuthError::Frozen))));
}

#[tokio::test]
async fn revocation_survives_a_simulated_restart() {
    let harness = harness(true);
    let (_, pair) = register_alice(&harness).await;

    harness
        .state
        .revocations
        .revoke(&pair.refresh_token)
        .await
        .unwrap();

    // New process: fresh cache over the same durable log, rebuilt before
    // any request is served.
    let revocations = Arc::new(RevocationStore::new(harness.log.clone()));
    revocations.load_all().await.unwrap();
    let restarted = AppState::new(
        harness.identities.clone(),
        harness.sessions.clone(),
        revocations,
        Arc::new(MemoryVerificationStore::new()),
        None,
        TokenCodec::new(&jwt_settings(900, 604_800)),
        true,
        Duration::from_secs(5),
    );

    let result = authorize(&restarted, None, Some(&pair.refresh_token)).await;
    assert_rejected_with(result, AuthError::Revoked);
}

#[tokio::test]
async fn logout_revokes_the_session() {
    let harness = harness(true);
    let (user, pair) = register_alice(&harness).await;

    harness
        .state
        .credentials
        .logout(user.uuid, &pair.refresh_token)
        .await
        .unwrap();

    let result = authorize(&harness.state, None, Some(&pair.refresh_token)).await;
    assert_rejected_with(result, AuthError::Revoked);
    assert_eq!(harness.sessions.lookup(user.uuid).await.unwrap(), None);
}

/// Two logins racing under single-session mode may both read "no prior
/// session" before either writes. The accepted outcome is last-write-wins
/// on the registry: at most one of the two sessions stays reachable, and
/// no locking hides the window.
#[tokio::test]
async fn racing_logins_are_last_write_wins() {
    let harness = harness(true);
    let (user, _) = register_alice(&harness).await;

    let (a, b) = tokio::join!(
        harness
            .state
            .credentials
            .email_login("alice@example.com", "Password123"),
        harness
            .state
            .credentials
            .email_login("alice@example.com", "Password123"),
    );
    let (_, pair_a) = a.unwrap();
    let (_, pair_b) = b.unwrap();

    let entry = harness.sessions.lookup(user.uuid).await.unwrap().unwrap();
    assert!(entry == pair_a.refresh_token || entry == pair_b.refresh_token);
}
