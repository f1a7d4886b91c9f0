//! Encrypted access tokens.
//!
//! Format: `atk.v1.` followed by unpadded URL-safe base64 of
//! `nonce (24 bytes) || XChaCha20-Poly1305 ciphertext`. The plaintext is the
//! JSON-encoded [`AccessTokenClaims`]; the `atk.v1.` header is bound in as
//! associated data, so any bit flip anywhere fails authentication.
//!
//! Access tokens carry no revocation state. They are valid until `exp`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use chrono::Duration;
use rand::RngCore;
use std::fmt;
use thiserror::Error;

use super::models::{AccessTokenClaims, UserId};
use crate::clock::SharedClock;

/// Token header, also the AEAD associated data
pub const TOKEN_HEADER: &str = "atk.v1.";

/// Symmetric key length in bytes
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Access token verification failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Authentic but `now >= exp`
    #[error("Access token expired")]
    Expired,

    /// Bad structure, failed authentication, or missing claims
    #[error("Access token invalid")]
    Invalid,

    /// Sealing failed
    #[error("Access token encryption failed")]
    Encryption,
}

/// Issues and verifies access tokens under one symmetric key
#[derive(Clone)]
pub struct AccessTokenService {
    cipher: XChaCha20Poly1305,
    clock: SharedClock,
}

impl fmt::Debug for AccessTokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenService").finish_non_exhaustive()
    }
}

impl AccessTokenService {
    pub fn new(key: &[u8; KEY_LEN], clock: SharedClock) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
            clock,
        }
    }

    /// Issue a token for `sub` that expires `ttl` from now
    ///
    /// # Errors
    ///
    /// * `TokenError::Encryption` - `ttl` overflows, or claims could not be serialized or sealed
    pub fn issue(&self, sub: UserId, email: &str, ttl: Duration) -> Result<String, TokenError> {
        let iat = self.clock.now();
        let exp = iat.checked_add_signed(ttl).ok_or(TokenError::Encryption)?;
        let claims = AccessTokenClaims {
            sub,
            email: email.to_string(),
            iat,
            exp,
        };
        let plaintext = serde_json::to_vec(&claims).map_err(|_| TokenError::Encryption)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &plaintext,
                    aad: TOKEN_HEADER.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Encryption)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);

        Ok(format!("{TOKEN_HEADER}{}", URL_SAFE_NO_PAD.encode(envelope)))
    }

    /// Decrypt, authenticate, and check expiry
    ///
    /// # Errors
    ///
    /// * `TokenError::Expired` - Envelope authentic but `now >= exp`
    /// * `TokenError::Invalid` - Anything else wrong with the token
    pub fn verify(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let body = token
            .strip_prefix(TOKEN_HEADER)
            .ok_or(TokenError::Invalid)?;
        let envelope = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| TokenError::Invalid)?;
        if envelope.len() < NONCE_LEN + TAG_LEN {
            return Err(TokenError::Invalid);
        }

        let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: TOKEN_HEADER.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Invalid)?;

        let claims: AccessTokenClaims =
            serde_json::from_slice(&plaintext).map_err(|_| TokenError::Invalid)?;
        if claims.email.is_empty() || claims.sub.is_nil() {
            return Err(TokenError::Invalid);
        }

        if self.clock.now() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Extract the token from an `Authorization` header value
///
/// The scheme match is case-insensitive; anything other than
/// `Bearer <token>` is [`TokenError::Invalid`].
pub fn bearer_token(header: &str) -> Result<&str, TokenError> {
    let (scheme, token) = header.trim().split_once(' ').ok_or(TokenError::Invalid)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::Invalid);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Invalid);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use proptest::prelude::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn service() -> (AccessTokenService, ManualClock) {
        let clock = ManualClock::default();
        (
            AccessTokenService::new(&[7u8; KEY_LEN], Arc::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn test_issue_verify_roundtrip() {
        let (service, clock) = service();
        let id = Uuid::new_v4();

        let token = service.issue(id, "a@x.com", Duration::minutes(15)).unwrap();
        assert!(token.starts_with(TOKEN_HEADER));

        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.iat, clock.now());
        assert_eq!(claims.exp, clock.now() + Duration::minutes(15));
    }

    #[test]
    fn test_expiry_is_strict() {
        let (service, clock) = service();
        let token = service
            .issue(Uuid::new_v4(), "a@x.com", Duration::minutes(15))
            .unwrap();

        clock.advance(Duration::minutes(15) - Duration::milliseconds(1));
        assert!(service.verify(&token).is_ok());

        clock.advance(Duration::milliseconds(1));
        assert_eq!(service.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_overflowing_ttl_is_rejected() {
        let (service, _) = service();
        assert_eq!(
            service.issue(Uuid::new_v4(), "a@b.co", Duration::MAX),
            Err(TokenError::Encryption)
        );
    }

    #[test]
    fn test_wrong_key_is_invalid() {
        let (service, clock) = service();
        let other = AccessTokenService::new(&[8u8; KEY_LEN], Arc::new(clock));
        let token = service
            .issue(Uuid::new_v4(), "a@x.com", Duration::minutes(15))
            .unwrap();

        assert_eq!(other.verify(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn test_expired_token_under_wrong_key_is_invalid() {
        let (service, clock) = service();
        let other = AccessTokenService::new(&[8u8; KEY_LEN], Arc::new(clock.clone()));
        let token = service
            .issue(Uuid::new_v4(), "a@x.com", Duration::minutes(1))
            .unwrap();
        clock.advance(Duration::hours(1));

        assert_eq!(other.verify(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn test_malformed_tokens_are_invalid() {
        let (service, _) = service();
        for token in [
            "",
            "atk.v1.",
            "atk.v1.!!!",
            "atk.v2.AAAA",
            "eyJhbGciOiJIUzI1NiJ9.e30.sig",
        ] {
            assert_eq!(service.verify(token), Err(TokenError::Invalid), "{token}");
        }
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Ok("abc"));
        assert_eq!(bearer_token("bearer  abc "), Ok("abc"));
        assert_eq!(bearer_token("Basic abc"), Err(TokenError::Invalid));
        assert_eq!(bearer_token("Bearer"), Err(TokenError::Invalid));
        assert_eq!(bearer_token("Bearer    "), Err(TokenError::Invalid));
    }

    proptest! {
        #[test]
        fn prop_any_bit_flip_is_rejected(byte in 0usize..200, bit in 0u8..8) {
            let (service, _) = service();
            let token = service
                .issue(Uuid::new_v4(), "a@x.com", Duration::minutes(15))
                .unwrap();
            let body = token.strip_prefix(TOKEN_HEADER).unwrap();
            let mut envelope = URL_SAFE_NO_PAD.decode(body).unwrap();
            let idx = byte % envelope.len();
            envelope[idx] ^= 1 << bit;

            let tampered = format!("{TOKEN_HEADER}{}", URL_SAFE_NO_PAD.encode(envelope));
            prop_assert_eq!(service.verify(&tampered), Err(TokenError::Invalid));
        }

        #[test]
        fn prop_verify_before_expiry_returns_claims(
            ttl_secs in 1i64..86_400,
            elapsed_pct in 0i64..100,
        ) {
            let (service, clock) = service();
            let id = Uuid::new_v4();
            let ttl = Duration::seconds(ttl_secs);
            let token = service.issue(id, "p@x.com", ttl).unwrap();

            clock.advance(Duration::milliseconds(ttl.num_milliseconds() * elapsed_pct / 100));
            let claims = service.verify(&token).unwrap();
            prop_assert_eq!(claims.sub, id);

            clock.advance(ttl);
            prop_assert_eq!(service.verify(&token), Err(TokenError::Expired));
        }
    }
}
