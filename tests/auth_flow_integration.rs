//! Integration tests for the registration, verification and login flows.

mod common;

use chrono::Duration;
use common::{PASSWORD, TestHarness};
use tokenward::AuthError;
use tokenward::auth::PasswordResetConfirm;
use tokenward::db::UserStore;
use tokenward::email::EmailKind;

#[tokio::test]
async fn test_full_account_lifecycle() {
    let h = TestHarness::new();

    let (user, verification) = h.register("a@x.com").await;
    assert!(!user.email_verified);

    let result = h.login("a@x.com", PASSWORD).await;
    assert!(matches!(result, Err(AuthError::EmailNotVerified)));

    h.auth.verify_email(&verification).await.unwrap();

    let tokens = h.login("a@x.com", PASSWORD).await.unwrap();
    assert_eq!(tokens.token_type, "Bearer");
    assert_eq!(tokens.expires_in, 15 * 60);

    let claims = h
        .auth
        .authenticate(&format!("Bearer {}", tokens.access_token))
        .unwrap();
    assert_eq!(claims.sub, user.id);
    assert_eq!(claims.email, "a@x.com");

    let rotated = h.auth.refresh(&tokens.refresh_token).await.unwrap();
    assert_ne!(rotated.refresh_token, tokens.refresh_token);

    let reuse = h.auth.refresh(&tokens.refresh_token).await;
    assert!(matches!(reuse, Err(AuthError::TokenRevoked)));

    h.auth.request_password_reset("a@x.com").await.unwrap();
    let reset = h.next_email().await;
    assert_eq!(reset.kind, EmailKind::PasswordReset);

    h.clock.advance(Duration::hours(1) + Duration::seconds(1));
    let result = h
        .auth
        .reset_password(PasswordResetConfirm {
            token: reset.secret,
            new_password: "password2".to_string(),
        })
        .await;
    assert!(matches!(result, Err(AuthError::TokenNotFound)));
}

#[tokio::test]
async fn test_login_with_mixed_case_email() {
    let h = TestHarness::new();
    h.verified_login("player@example.com").await;

    let tokens = h.login("  Player@Example.COM ", PASSWORD).await;
    assert!(tokens.is_ok());
}

#[tokio::test]
async fn test_verification_link_second_use() {
    let h = TestHarness::new();
    let (_, secret) = h.register("a@x.com").await;

    h.auth.verify_email(&secret).await.unwrap();
    let again = h.auth.verify_email(&secret).await;
    assert!(matches!(again, Err(AuthError::AlreadyVerified)));
}

#[tokio::test]
async fn test_verification_link_never_issued() {
    let h = TestHarness::new();
    h.register("a@x.com").await;

    let result = h.auth.verify_email("made-up-token").await;
    assert!(matches!(result, Err(AuthError::TokenInvalid)));

    let result = h.auth.verify_email("   ").await;
    assert_eq!(result.unwrap_err().code(), "TOKEN_REQUIRED");
}

#[tokio::test]
async fn test_verification_link_expires() {
    let h = TestHarness::new();
    let (user, secret) = h.register("a@x.com").await;

    h.clock.advance(Duration::hours(24));
    let result = h.auth.verify_email(&secret).await;
    assert!(matches!(result, Err(AuthError::TokenExpired)));

    let stored = h.users.by_id(user.id).await.unwrap().unwrap();
    assert!(!stored.email_verified);
}

#[tokio::test]
async fn test_resend_replaces_verification_token() {
    let h = TestHarness::new();
    let (_, first) = h.register("a@x.com").await;

    h.clock.advance(Duration::hours(23));
    h.auth.resend_verification("a@x.com").await.unwrap();
    let resent = h.next_email().await;
    assert_eq!(resent.kind, EmailKind::Verification);
    assert_ne!(resent.secret, first);

    let stale = h.auth.verify_email(&first).await;
    assert!(matches!(stale, Err(AuthError::TokenInvalid)));

    // The clock restarted at the resend
    h.clock.advance(Duration::hours(23));
    h.auth.verify_email(&resent.secret).await.unwrap();
    assert!(h.login("a@x.com", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn test_resend_for_verified_user_sends_nothing() {
    let h = TestHarness::new();
    h.verified_login("a@x.com").await;

    h.auth.resend_verification("a@x.com").await.unwrap();
    assert!(!h.email_sent_within(std::time::Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_duplicate_registration() {
    let h = TestHarness::new();
    h.register("a@x.com").await;

    let result = h
        .auth
        .register(tokenward::auth::RegisterRequest {
            email: "A@X.COM".to_string(),
            password: "password2".to_string(),
        })
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, AuthError::DuplicateEmail));
    assert_eq!(err.code(), "EMAIL_EXISTS");
    assert_eq!(h.users.len().await, 1);
}

#[tokio::test]
async fn test_access_token_expires_but_refresh_still_works() {
    let h = TestHarness::new();
    let (_, tokens) = h.verified_login("a@x.com").await;

    h.clock.advance(Duration::minutes(15));
    let result = h.auth.verify_access_token(&tokens.access_token);
    assert!(matches!(result, Err(AuthError::TokenExpired)));

    let rotated = h.auth.refresh(&tokens.refresh_token).await.unwrap();
    assert!(h.auth.verify_access_token(&rotated.access_token).is_ok());
}

#[tokio::test]
async fn test_access_token_from_other_key_is_invalid() {
    let h = TestHarness::new();
    let (_, tokens) = h.verified_login("a@x.com").await;

    let mut config = h.config.clone();
    config.token_key = tokenward::config::TokenKey::new([1; 32]);
    let other = TestHarness::with_config(config);

    let result = other.auth.verify_access_token(&tokens.access_token);
    assert!(matches!(result, Err(AuthError::TokenInvalid)));
}
