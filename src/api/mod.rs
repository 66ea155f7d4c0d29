//! API handlers for Bookshelf REST endpoints

pub mod auth;
pub mod books;
pub mod health;
pub mod response;
pub mod users;

use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::{CookieJar, Multipart};
use tower_governor::{governor::GovernorConfigBuilder, GovernorError, GovernorLayer};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{
    api::response::ApiResponse,
    error::{AppError, AppResult},
    services::storage::{UploadedFile, PUBLIC_PREFIX},
    AppState,
};

/// JSON body whose rejections render as the error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Query string whose rejections render as the error envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Path parameters whose rejections render as the error envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

/// Extractor for the authenticated user id.
///
/// Reads `Authorization: Bearer <jwt>` first and falls back to the
/// `accessToken` cookie set at login.
pub struct AuthenticatedUser(pub i32);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = match parts.headers.get(AUTHORIZATION) {
            Some(value) => bearer_token(value)
                .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?,
            None => CookieJar::from_headers(&parts.headers)
                .get(auth::ACCESS_COOKIE)
                .map(|cookie| cookie.value().to_string())
                .ok_or_else(|| AppError::Authentication("Unauthorized".to_string()))?,
        };

        let user_id = state.services.tokens.verify_access_token(&token)?;
        Ok(AuthenticatedUser(user_id))
    }
}

fn bearer_token(value: &HeaderValue) -> Option<String> {
    let token = value.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Text fields and files of a multipart form
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl FormData {
    /// Drain a multipart body. Empty file inputs are ignored.
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = FormData::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let bytes = field.bytes().await?;
                    if bytes.is_empty() {
                        continue;
                    }
                    form.files.insert(
                        name,
                        UploadedFile {
                            file_name: Some(file_name),
                            bytes: bytes.to_vec(),
                        },
                    );
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    /// Trimmed text field, `None` when absent or blank
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Checkbox-style flag (`true`, `1`, `on`)
    pub fn flag(&self, name: &str) -> bool {
        self.text(name)
            .map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "on"))
            .unwrap_or(false)
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }
}

/// Build the application router with all routes
pub fn router(state: AppState) -> Router {
    // Endpoints that take credentials or send mail are rate limited per client IP
    let mut credential_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/login", post(auth::login))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        let governor = GovernorConfigBuilder::default()
            .per_second(limits.replenish_seconds)
            .burst_size(limits.burst_size)
            .error_handler(rate_limit_rejection)
            .finish();
        match governor {
            Some(config) => {
                credential_routes = credential_routes.layer(GovernorLayer {
                    config: Box::leak(Box::new(config)),
                });
            }
            None => tracing::warn!("Invalid rate limit settings, auth routes are not rate limited"),
        }
    }

    let auth_routes = Router::new()
        .route("/verify-email", get(auth::verify_email))
        .route("/refresh-token", post(auth::refresh_token))
        .route("/logout", post(auth::logout))
        .route("/logout-all", post(auth::logout_all))
        .route("/me", get(auth::me))
        .merge(credential_routes);

    let api = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Authentication
        .nest("/auth", auth_routes)
        // Books
        .route("/books", get(books::list_books).post(books::create_book))
        .route(
            "/books/:id",
            get(books::get_book).put(books::update_book).delete(books::delete_book),
        )
        // Users
        .route("/users", get(users::list_users))
        .route("/users/profile", get(users::get_profile).put(users::update_profile))
        .route("/users/avatar", put(users::upload_avatar).delete(users::remove_avatar))
        .layer(DefaultBodyLimit::max(state.config.uploads.max_file_bytes))
        .with_state(state.clone());

    Router::new()
        .nest("/api", api)
        .nest_service(PUBLIC_PREFIX, ServeDir::new(&state.config.uploads.dir))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config.server.cors_origin))
}

/// Render limiter rejections as the error envelope
fn rate_limit_rejection(error: GovernorError) -> Response {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut response =
                AppError::TooManyRequests(format!("Too many requests, retry in {wait_time}s")).into_response();
            if let Some(headers) = headers {
                response.headers_mut().extend(headers);
            }
            response
        }
        GovernorError::UnableToExtractKey => {
            AppError::Internal("Unable to determine client address for rate limiting".to_string()).into_response()
        }
        GovernorError::Other { code, msg, .. } => {
            let message = msg.unwrap_or_else(|| "Request rejected".to_string());
            (code, Json(ApiResponse::<()>::failure(message, None))).into_response()
        }
    }
}

/// CORS for the configured frontend origin; cookies require credentials
fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, axum::http::header::CONTENT_TYPE])
        .allow_credentials(true);

    // Credentialed requests cannot use a literal wildcard
    if origin == "*" {
        return layer.allow_origin(AllowOrigin::mirror_request());
    }

    match origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            tracing::warn!("Invalid CORS origin {:?}, cross-origin requests are refused", origin);
            layer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, test_support};
    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{header::CONTENT_TYPE, Request, StatusCode},
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let app = router(test_support::state());
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(&HeaderValue::from_static("Bearer abc")), Some("abc".into()));
        assert_eq!(bearer_token(&HeaderValue::from_static("Bearer  ")), None);
        assert_eq!(bearer_token(&HeaderValue::from_static("Basic abc")), None);
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = send(get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn protected_route_without_token_is_unauthorized() {
        let (status, body) = send(get("/api/auth/me")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Unauthorized");
    }

    #[tokio::test]
    async fn malformed_authorization_header_is_rejected() {
        let request = Request::builder()
            .uri("/api/users")
            .header(AUTHORIZATION, "Token abc")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn forged_access_token_is_rejected() {
        let request = Request::builder()
            .uri("/api/users/profile")
            .header(AUTHORIZATION, "Bearer not.a.jwt")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forged_access_cookie_is_rejected() {
        let request = Request::builder()
            .uri("/api/auth/me")
            .header("cookie", "accessToken=garbage")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn mutations_require_authentication() {
        for (method, uri) in [
            ("POST", "/api/books"),
            ("PUT", "/api/books/1"),
            ("DELETE", "/api/books/1"),
            ("PUT", "/api/users/avatar"),
            ("POST", "/api/auth/logout-all"),
        ] {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let (status, _) = send(request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
    }

    fn login_from(addr: SocketAddr) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("not json"))
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[tokio::test]
    async fn rate_limited_login_renders_envelope() {
        let mut config = AppConfig::default();
        config.rate_limit.enabled = true;
        config.rate_limit.burst_size = 1;
        config.rate_limit.replenish_seconds = 60;
        let app = router(test_support::state_with(config));
        let addr = SocketAddr::from(([127, 0, 0, 1], 40000));

        let response = app.clone().oneshot(login_from(addr)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.clone().oneshot(login_from(addr)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("x-ratelimit-after"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().unwrap().starts_with("Too many requests"));
        assert!(body["data"].is_null());

        // Session endpoints stay outside the limiter
        let mut me = get("/api/auth/me");
        me.extensions_mut().insert(ConnectInfo(addr));
        let response = app.oneshot(me).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_book_id_is_a_bad_request() {
        let (status, body) = send(get("/api/books/abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn invalid_book_filter_is_a_bad_request() {
        let (status, body) = send(get("/api/books?date=yesterday")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }
}
