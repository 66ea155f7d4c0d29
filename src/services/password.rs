//! Password reset flow

use chrono::Duration;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::{
        token::{TokenKind, TokenRejection},
        user::normalize_email,
    },
    repository::Repository,
    services::{auth::hash_password, email::EmailService, tokens::TokenService},
};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct PasswordService {
    repository: Repository,
    tokens: TokenService,
    email: EmailService,
    config: AuthConfig,
    expose_tokens: bool,
}

impl PasswordService {
    pub fn new(
        repository: Repository,
        tokens: TokenService,
        email: EmailService,
        config: AuthConfig,
        expose_tokens: bool,
    ) -> Self {
        Self {
            repository,
            tokens,
            email,
            config,
            expose_tokens,
        }
    }

    /// Issue a reset token. Unknown addresses succeed silently.
    pub async fn request_reset(&self, email: &str) -> AppResult<Option<String>> {
        let email = normalize_email(email);
        let Some(user) = self.repository.users_get_by_email(&email).await? else {
            tracing::debug!("Password reset requested for unknown address");
            return Ok(None);
        };

        self.repository
            .tokens_delete_for_user(TokenKind::PasswordReset, user.id)
            .await?;

        let token = self
            .tokens
            .issue_stored_token(
                TokenKind::PasswordReset,
                user.id,
                Duration::minutes(self.config.password_reset_minutes),
            )
            .await?;

        if let Err(e) = self.email.send_password_reset(&user.email, user.id, &token).await {
            tracing::warn!("Password reset email to user {} not delivered: {}", user.id, e);
        }

        tracing::info!("Password reset issued for user {}", user.id);
        Ok(self.expose_tokens.then_some(token))
    }

    /// Redeem a reset token (single use) and store the new password
    pub async fn reset_password(&self, user_id: i32, token: &str, new_password: &str) -> AppResult<()> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let outcome = self
            .tokens
            .consume(TokenKind::PasswordReset, token, Some(user_id))
            .await?;

        match outcome {
            Ok(_) => {}
            Err(TokenRejection::Expired) => return Err(AppError::BadRequest("Token expired".to_string())),
            Err(_) => return Err(AppError::BadRequest("Invalid or expired token".to_string())),
        }

        let password_hash = hash_password(new_password)?;
        self.repository.users_set_password(user_id, &password_hash).await?;
        self.tokens.revoke_all_refresh_tokens(user_id).await?;

        tracing::info!("Password reset completed for user {}", user_id);
        Ok(())
    }
}
