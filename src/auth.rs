//! Credential verification
//!
//! Credential issuance lives outside this crate; the server only needs to
//! turn a bearer token into a user identity during the handshake.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{ChatError, Result};
use crate::protocol::events::UserId;

/// Verifies a bearer credential and resolves the user identity behind it
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<UserId>;
}

/// Token-table verifier
///
/// Holds issued bearer tokens in memory; the dev server and tests issue
/// tokens directly, a deployment would swap in a verifier backed by the
/// credential service.
#[derive(Default)]
pub struct TokenVerifier {
    tokens: RwLock<HashMap<String, UserId>>,
}

impl TokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for a user and return it
    pub async fn issue(&self, user_id: impl Into<UserId>) -> String {
        let token = crate::generate_id();
        let mut tokens = self.tokens.write().await;
        tokens.insert(token.clone(), user_id.into());
        token
    }

    /// Revoke a previously issued token
    pub async fn revoke(&self, token: &str) -> bool {
        let mut tokens = self.tokens.write().await;
        tokens.remove(token).is_some()
    }
}

#[async_trait]
impl IdentityVerifier for TokenVerifier {
    async fn verify(&self, credential: &str) -> Result<UserId> {
        let tokens = self.tokens.read().await;
        tokens
            .get(credential)
            .cloned()
            .ok_or_else(|| ChatError::auth("unknown or expired credential"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_and_verify() {
        let verifier = TokenVerifier::new();
        let token = verifier.issue("user-1").await;

        let user_id = verifier.verify(&token).await.unwrap();
        assert_eq!(user_id, "user-1");
    }

    #[tokio::test]
    async fn test_unknown_token_fails() {
        let verifier = TokenVerifier::new();
        assert!(verifier.verify("bogus").await.is_err());
    }

    #[tokio::test]
    async fn test_revoked_token_fails() {
        let verifier = TokenVerifier::new();
        let token = verifier.issue("user-1").await;

        assert!(verifier.revoke(&token).await);
        assert!(verifier.verify(&token).await.is_err());
        assert!(!verifier.revoke(&token).await);
    }
}
