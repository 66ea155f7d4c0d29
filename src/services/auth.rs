//! Registration, email verification, login and session management

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use validator::Validate;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::{
        token::{TokenKind, TokenRejection},
        user::{normalize_email, LoginRequest, RegisterRequest, RegisteredUser, User},
    },
    repository::Repository,
    services::{
        email::EmailService,
        tokens::{AccessToken, TokenService},
    },
};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored Argon2 hash
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Result of a registration
#[derive(Debug)]
pub struct Registration {
    pub user: RegisteredUser,
    /// Plaintext verification token, only outside production
    pub verify_token: Option<String>,
}

/// Tokens handed out on login or refresh
#[derive(Debug)]
pub struct Session {
    pub user_id: i32,
    pub access: AccessToken,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct AuthService {
    repository: Repository,
    tokens: TokenService,
    email: EmailService,
    config: AuthConfig,
    expose_tokens: bool,
}

impl AuthService {
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

    fn verification_lifetime(&self) -> Duration {
        Duration::hours(self.config.verification_token_hours)
    }

    /// Create an account and send the verification email
    pub async fn register(&self, mut request: RegisterRequest) -> AppResult<Registration> {
        request.name = request.name.trim().to_string();
        request.email = normalize_email(&request.email);
        request.validate()?;

        let email = request.email;
        if self.repository.users_email_exists(&email, None).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        let password_hash = hash_password(&request.password)?;
        let user = self
            .repository
            .users_create(&request.name, &email, &password_hash)
            .await?;

        tracing::info!("Registered user {} <{}>", user.id, user.email);

        let token = self.issue_verification(&user).await?;

        Ok(Registration {
            user: RegisteredUser::from(&user),
            verify_token: self.expose_tokens.then_some(token),
        })
    }

    /// Replace any outstanding verification token and email a new one
    async fn issue_verification(&self, user: &User) -> AppResult<String> {
        self.repository
            .tokens_delete_for_user(TokenKind::EmailVerification, user.id)
            .await?;

        let token = self
            .tokens
            .issue_stored_token(TokenKind::EmailVerification, user.id, self.verification_lifetime())
            .await?;

        // Delivery failure must not undo the account; the user can ask for a new link
        if let Err(e) = self.email.send_verification(&user.email, user.id, &token).await {
            tracing::warn!("Verification email to user {} not delivered: {}", user.id, e);
        }

        Ok(token)
    }

    /// Redeem a verification token (single use)
    pub async fn verify_email(&self, user_id: i32, token: &str) -> AppResult<()> {
        let outcome = self
            .tokens
            .consume(TokenKind::EmailVerification, token, Some(user_id))
            .await?;

        match outcome {
            Ok(_) => {
                self.repository.users_mark_verified(user_id, Utc::now()).await?;
                tracing::info!("Email verified for user {}", user_id);
                Ok(())
            }
            Err(TokenRejection::Expired) => Err(AppError::BadRequest("Verification token expired".to_string())),
            Err(_) => Err(AppError::BadRequest("Invalid verification token".to_string())),
        }
    }

    /// Send a fresh verification link. Never reveals whether the address exists.
    pub async fn resend_verification(&self, email: &str) -> AppResult<Option<String>> {
        let email = normalize_email(email);
        let Some(user) = self.repository.users_get_by_email(&email).await? else {
            return Ok(None);
        };
        if user.is_verified() {
            return Ok(None);
        }

        let token = self.issue_verification(&user).await?;
        Ok(self.expose_tokens.then_some(token))
    }

    /// Check credentials and open a session
    pub async fn login(&self, request: LoginRequest) -> AppResult<(User, Session)> {
        request.validate()?;

        let invalid = || AppError::Authentication("Invalid credentials".to_string());

        let user = self
            .repository
            .users_get_by_email(&normalize_email(&request.email))
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&request.password, &user.password_hash)? {
            return Err(invalid());
        }

        let session = self.open_session(user.id).await?;
        tracing::info!("User {} logged in", user.id);
        Ok((user, session))
    }

    async fn open_session(&self, user_id: i32) -> AppResult<Session> {
        let access = self.tokens.issue_access_token(user_id)?;
        let refresh_token = self.tokens.issue_refresh_token(user_id).await?;
        Ok(Session {
            user_id,
            access,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a new access token; the refresh token is rotated
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<Session> {
        let (user_id, refresh_token) = self.tokens.rotate_refresh_token(refresh_token).await?;
        let access = self.tokens.issue_access_token(user_id)?;
        Ok(Session {
            user_id,
            access,
            refresh_token,
        })
    }

    /// End the session bound to a refresh token
    pub async fn logout(&self, refresh_token: Option<&str>) -> AppResult<()> {
        if let Some(token) = refresh_token {
            self.tokens.revoke_refresh_token(token).await?;
        }
        Ok(())
    }

    /// End every session of a user
    pub async fn logout_all(&self, user_id: i32) -> AppResult<u64> {
        self.tokens.revoke_all_refresh_tokens(user_id).await
    }

    /// Resolve the user behind a verified access token
    pub async fn current_user(&self, user_id: i32) -> AppResult<User> {
        self.repository.users_get_by_id(user_id).await
    }
}
