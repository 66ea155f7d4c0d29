//! Authentication endpoints

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, NoneAsEmptyString, PickFirst};

use crate::{
    error::{AppError, AppResult},
    models::user::{LoginRequest, RegisterRequest, RegisteredUser, User},
    services::auth::Session,
};

use super::{
    response::{ok, ApiResponse},
    AppJson, AppQuery, AuthenticatedUser,
};

/// Cookie carrying the access JWT
pub const ACCESS_COOKIE: &str = "accessToken";
/// Cookie carrying the opaque refresh token
pub const REFRESH_COOKIE: &str = "refreshToken";

const REFRESH_COOKIE_PATH: &str = "/api/auth";
const TOKEN_TYPE: &str = "Bearer";

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: RegisteredUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_token: Option<String>,
}

#[serde_as]
#[derive(Deserialize)]
pub struct VerifyEmailQuery {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub id: Option<i32>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Serialize)]
pub struct VerificationResent {
    pub verify_token: String,
}

#[derive(Serialize)]
pub struct ResetRequested {
    pub reset_token: String,
}

/// Reset form; `id` may arrive as a number or a numeric string
#[serde_as]
#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

/// Tokens returned by login and refresh
#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenResponse,
    pub user: User,
}

#[derive(Serialize)]
pub struct RevokedSessions {
    pub revoked: u64,
}

impl From<Session> for TokenResponse {
    fn from(session: Session) -> Self {
        Self {
            access_token: session.access.token,
            token_type: TOKEN_TYPE,
            expires_in: session.access.expires_in,
            refresh_token: session.refresh_token,
        }
    }
}

/// Store both session tokens as HttpOnly cookies
fn with_session_cookies(jar: CookieJar, state: &crate::AppState, session: &Session) -> CookieJar {
    let secure = state.config.auth.secure_cookies;
    let tokens = &state.services.tokens;

    let access = Cookie::build((ACCESS_COOKIE, session.access.token.clone()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(tokens.access_lifetime().num_seconds()));

    let refresh = Cookie::build((REFRESH_COOKIE, session.refresh_token.clone()))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(tokens.refresh_lifetime().num_seconds()));

    jar.add(access).add(refresh)
}

fn without_session_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path(REFRESH_COOKIE_PATH))
}

/// Refresh token from the JSON body, else from the cookie
fn presented_refresh_token(jar: &CookieJar, body: Option<AppJson<RefreshRequest>>) -> Option<String> {
    body.and_then(|AppJson(body)| body.refresh_token)
        .filter(|token| !token.is_empty())
        .or_else(|| jar.get(REFRESH_COOKIE).map(|cookie| cookie.value().to_string()))
}

/// Register a new account
pub async fn register(
    State(state): State<crate::AppState>,
    AppJson(request): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<RegisterResponse>>)> {
    let registration = state.services.auth.register(request).await?;

    Ok((
        StatusCode::CREATED,
        ok(
            "User registered successfully. Please check your email to verify your account.",
            RegisterResponse {
                user: registration.user,
                verify_token: registration.verify_token,
            },
        ),
    ))
}

/// Confirm an email address from the emailed link
pub async fn verify_email(
    State(state): State<crate::AppState>,
    AppQuery(query): AppQuery<VerifyEmailQuery>,
) -> AppResult<Json<ApiResponse<()>>> {
    let (Some(id), Some(token)) = (query.id, query.token) else {
        return Err(AppError::BadRequest("Missing parameters".to_string()));
    };

    state.services.auth.verify_email(id, &token).await?;
    Ok(Json(ApiResponse::message("Email verified successfully")))
}

/// Send a new verification link
pub async fn resend_verification(
    State(state): State<crate::AppState>,
    AppJson(request): AppJson<EmailRequest>,
) -> AppResult<Json<ApiResponse<VerificationResent>>> {
    if request.email.trim().is_empty() {
        return Err(AppError::BadRequest("Email is required".to_string()));
    }

    let message = "If the account exists and is not verified, a new link has been sent.";
    let response = match state.services.auth.resend_verification(&request.email).await? {
        Some(verify_token) => ApiResponse::success(message, VerificationResent { verify_token }),
        None => ApiResponse::message(message),
    };
    Ok(Json(response))
}

/// Login with email and password
pub async fn login(
    State(state): State<crate::AppState>,
    jar: CookieJar,
    AppJson(request): AppJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<ApiResponse<LoginResponse>>)> {
    let (user, session) = state.services.auth.login(request).await?;
    let jar = with_session_cookies(jar, &state, &session);

    Ok((
        jar,
        ok(
            "Login successful",
            LoginResponse {
                tokens: session.into(),
                user,
            },
        ),
    ))
}

/// Exchange a refresh token for a new token pair
pub async fn refresh_token(
    State(state): State<crate::AppState>,
    jar: CookieJar,
    body: Option<AppJson<RefreshRequest>>,
) -> AppResult<(CookieJar, Json<ApiResponse<TokenResponse>>)> {
    let token = presented_refresh_token(&jar, body)
        .ok_or_else(|| AppError::Authentication("Refresh token missing".to_string()))?;

    let session = state.services.auth.refresh(&token).await?;
    let jar = with_session_cookies(jar, &state, &session);

    Ok((jar, ok("Token refreshed", session.into())))
}

/// Revoke the presented refresh token and clear cookies
pub async fn logout(
    State(state): State<crate::AppState>,
    jar: CookieJar,
    body: Option<AppJson<RefreshRequest>>,
) -> AppResult<(CookieJar, Json<ApiResponse<()>>)> {
    let token = presented_refresh_token(&jar, body);
    state.services.auth.logout(token.as_deref()).await?;

    Ok((without_session_cookies(jar), Json(ApiResponse::message("Logged out successfully"))))
}

/// Revoke every refresh token of the current user
pub async fn logout_all(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<ApiResponse<RevokedSessions>>)> {
    let revoked = state.services.auth.logout_all(user_id).await?;

    Ok((
        without_session_cookies(jar),
        ok("Logged out from all sessions", RevokedSessions { revoked }),
    ))
}

/// Get current user
pub async fn me(
    State(state): State<crate::AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = state.services.auth.current_user(user_id).await?;
    Ok(ok("User fetched successfully", user))
}

/// Start a password reset
pub async fn forgot_password(
    State(state): State<crate::AppState>,
    AppJson(request): AppJson<EmailRequest>,
) -> AppResult<Json<ApiResponse<ResetRequested>>> {
    if request.email.trim().is_empty() {
        return Err(AppError::BadRequest("Email is required".to_string()));
    }

    let message = "If the email is registered, a reset link has been sent.";
    let response = match state.services.password.request_reset(&request.email).await? {
        Some(reset_token) => ApiResponse::success(message, ResetRequested { reset_token }),
        None => ApiResponse::message(message),
    };
    Ok(Json(response))
}

/// Set a new password with a reset token
pub async fn reset_password(
    State(state): State<crate::AppState>,
    AppJson(request): AppJson<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<()>>> {
    let (Some(id), Some(token), Some(password)) = (
        request.id,
        request.token.filter(|t| !t.is_empty()),
        request.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::BadRequest("Missing parameters".to_string()));
    };

    state.services.password.reset_password(id, &token, &password).await?;
    Ok(Json(ApiResponse::message("Password has been reset successfully")))
}
