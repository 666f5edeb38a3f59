//! The token triple and PKCE pair (spec §3).

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A bearer credential pair obtained from an OAuth 2.0 grant flow or a refresh.
///
/// `refresh_token == None` means this token can only be renewed by re-running
/// its originating grant flow; `Some` means it can be renewed silently via
/// `AuthBackend::refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Builds a token from a token-endpoint response, per spec §6.
    pub fn from_token_response(
        access_token: String,
        token_type: String,
        expires_in: u64,
        refresh_token: Option<String>,
        scope: Option<String>,
    ) -> Self {
        Token {
            access_token,
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in as i64),
            scope,
            token_type,
        }
    }

    /// A token is expired iff `now >= expires_at`. No safety skew is applied
    /// here; the core relies on 401-triggered forced refresh instead (spec §4.1).
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn seconds_until_expiration(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }

    pub fn bearer_header_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Proof Key for Code Exchange material for one authorization attempt.
///
/// A pair is single-use: the verifier is never transmitted before the
/// code-exchange step, and `state` round-trips through the authorization
/// redirect unchanged.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl PkcePair {
    /// Generates a fresh verifier (128 URL-safe chars, within the RFC 7636
    /// 43-128 range), its S256 challenge, and a cryptographically random
    /// state of at least 16 bytes.
    pub fn generate() -> Self {
        let verifier: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(128)
            .map(char::from)
            .collect();
        let challenge = Self::challenge_for(&verifier);
        let state = Self::random_state();
        PkcePair {
            verifier,
            challenge,
            state,
        }
    }

    fn challenge_for(verifier: &str) -> String {
        let hash = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }

    fn random_state() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: i64) -> Token {
        Token {
            access_token: "abc123".to_string(),
            refresh_token: Some("refresh-abc".to_string()),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
            scope: None,
            token_type: "Bearer".to_string(),
        }
    }

    #[test]
    fn bearer_header_value_joins_type_and_access_token() {
        assert_eq!(token(3600).bearer_header_value(), "Bearer abc123");
    }

    #[test]
    fn is_expired_reflects_expires_at() {
        assert!(!token(60).is_expired());
        assert!(token(-1).is_expired());
    }

    #[test]
    fn seconds_until_expiration_is_roughly_correct() {
        let remaining = token(120).seconds_until_expiration();
        assert!((118..=120).contains(&remaining), "was {remaining}");
    }

    #[test]
    fn from_token_response_defaults_scope_and_refresh_to_none() {
        let t = Token::from_token_response("tok".to_string(), "Bearer".to_string(), 3600, None, None);
        assert!(t.refresh_token.is_none());
        assert!(t.scope.is_none());
        assert!(!t.is_expired());
    }

    #[test]
    fn pkce_pair_verifier_is_within_rfc7636_length_range() {
        let pair = PkcePair::generate();
        assert!(pair.verifier.len() >= 43 && pair.verifier.len() <= 128);
        assert_eq!(pair.state.len(), 32);
    }

    #[test]
    fn pkce_challenge_is_deterministic_function_of_verifier() {
        let pair = PkcePair::generate();
        assert_eq!(PkcePair::challenge_for(&pair.verifier), pair.challenge);
    }

    #[test]
    fn pkce_pairs_are_not_reused_across_generations() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.state, b.state);
    }
}
