//! Stored one-time and session tokens
//!
//! Verification, password-reset and refresh tokens share one row shape: the
//! owning user, the SHA-256 digest of the secret and an expiry. The plaintext
//! secret is never persisted.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Which table a token lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    EmailVerification,
    PasswordReset,
    Refresh,
}

impl TokenKind {
    pub fn table(&self) -> &'static str {
        match self {
            TokenKind::EmailVerification => "email_verifications",
            TokenKind::PasswordReset => "password_resets",
            TokenKind::Refresh => "refresh_tokens",
        }
    }

    /// Number of random bytes in a freshly issued secret
    pub fn secret_len(&self) -> usize {
        match self {
            TokenKind::EmailVerification | TokenKind::PasswordReset => 32,
            TokenKind::Refresh => 40,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TokenRecord {
    pub id: i32,
    pub user_id: i32,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Why a presented token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Unknown,
    WrongUser,
    Expired,
}

impl TokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check ownership and expiry. The hash has already matched when a record exists.
    pub fn check(&self, claimed_user: Option<i32>, now: DateTime<Utc>) -> Result<(), TokenRejection> {
        if let Some(user_id) = claimed_user {
            if user_id != self.user_id {
                return Err(TokenRejection::WrongUser);
            }
        }
        if self.is_expired(now) {
            return Err(TokenRejection::Expired);
        }
        Ok(())
    }
}

/// Validate an optional lookup result in one step
pub fn check_token(
    record: Option<&TokenRecord>,
    claimed_user: Option<i32>,
    now: DateTime<Utc>,
) -> Result<(), TokenRejection> {
    record
        .ok_or(TokenRejection::Unknown)?
        .check(claimed_user, now)
}
