//! Access and refresh token issuance, verification, rotation and revocation

use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::{
        token::{check_token, TokenKind, TokenRecord, TokenRejection},
        user::AccessClaims,
    },
    repository::Repository,
};

/// Random secret of `len` bytes, hex encoded
pub fn generate_secret(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 digest of a secret, hex encoded; the only form that is persisted
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Freshly issued access token
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenService {
    repository: Repository,
    config: AuthConfig,
}

impl TokenService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    pub fn access_lifetime(&self) -> Duration {
        Duration::minutes(self.config.access_token_minutes)
    }

    pub fn refresh_lifetime(&self) -> Duration {
        Duration::days(self.config.refresh_token_days)
    }

    /// Sign a short-lived access token for a user
    pub fn issue_access_token(&self, user_id: i32) -> AppResult<AccessToken> {
        let claims = AccessClaims::new(user_id, Utc::now(), self.access_lifetime());
        let token = claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))?;
        Ok(AccessToken {
            token,
            expires_in: self.access_lifetime().num_seconds(),
        })
    }

    /// Verify an access token and return its user id. No store lookup.
    pub fn verify_access_token(&self, token: &str) -> AppResult<i32> {
        let claims = AccessClaims::from_token(token, &self.config.jwt_secret)
            .map_err(|e| AppError::Authentication(format!("Invalid access token: {}", e)))?;
        claims
            .user_id()
            .ok_or_else(|| AppError::Authentication("Invalid access token subject".to_string()))
    }

    /// Generate a one-time secret of `kind`, store its hash and return the plaintext
    pub async fn issue_stored_token(&self, kind: TokenKind, user_id: i32, lifetime: Duration) -> AppResult<String> {
        let token = generate_secret(kind.secret_len());
        let expires_at = Utc::now() + lifetime;
        self.repository
            .tokens_insert(kind, user_id, &hash_token(&token), expires_at)
            .await?;
        Ok(token)
    }

    /// Look up a presented secret and check ownership/expiry. Expired rows are deleted.
    pub async fn find_valid(
        &self,
        kind: TokenKind,
        token: &str,
        user_id: Option<i32>,
    ) -> AppResult<Result<TokenRecord, TokenRejection>> {
        let record = self
            .repository
            .tokens_find(kind, &hash_token(token), user_id)
            .await?;

        match check_token(record.as_ref(), user_id, Utc::now()) {
            Ok(()) => Ok(record.ok_or(TokenRejection::Unknown)),
            Err(TokenRejection::Expired) => {
                if let Some(ref expired) = record {
                    self.repository.tokens_consume(kind, expired.id).await?;
                }
                Ok(Err(TokenRejection::Expired))
            }
            Err(rejection) => Ok(Err(rejection)),
        }
    }

    /// Validate, then delete a single-use token. Fails if someone else consumed it first.
    pub async fn consume(
        &self,
        kind: TokenKind,
        token: &str,
        user_id: Option<i32>,
    ) -> AppResult<Result<TokenRecord, TokenRejection>> {
        let record = match self.find_valid(kind, token, user_id).await? {
            Ok(record) => record,
            Err(rejection) => return Ok(Err(rejection)),
        };
        if !self.repository.tokens_consume(kind, record.id).await? {
            return Ok(Err(TokenRejection::Unknown));
        }
        Ok(Ok(record))
    }

    /// Create a refresh token for a user
    pub async fn issue_refresh_token(&self, user_id: i32) -> AppResult<String> {
        self.issue_stored_token(TokenKind::Refresh, user_id, self.refresh_lifetime())
            .await
    }

    /// Exchange a refresh token for a new one; the presented token stops working
    pub async fn rotate_refresh_token(&self, token: &str) -> AppResult<(i32, String)> {
        let record = self
            .consume(TokenKind::Refresh, token, None)
            .await?
            .map_err(|rejection| {
                tracing::debug!("Refresh token rejected: {:?}", rejection);
                AppError::Authentication("Invalid or expired refresh token".to_string())
            })?;

        let replacement = self.issue_refresh_token(record.user_id).await?;
        Ok((record.user_id, replacement))
    }

    /// Revoke a single refresh token (logout). Unknown tokens are ignored.
    pub async fn revoke_refresh_token(&self, token: &str) -> AppResult<()> {
        self.repository
            .tokens_delete_by_hash(TokenKind::Refresh, &hash_token(token))
            .await?;
        Ok(())
    }

    /// Revoke every refresh token of a user
    pub async fn revoke_all_refresh_tokens(&self, user_id: i32) -> AppResult<u64> {
        let revoked = self
            .repository
            .tokens_delete_for_user(TokenKind::Refresh, user_id)
            .await?;
        tracing::info!("Revoked {} refresh token(s) for user {}", revoked, user_id);
        Ok(revoked)
    }
}
