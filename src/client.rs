//! HTTP client for the Bookshelf API.
//!
//! Keeps the session cookies and the last access token. A `401` on a
//! protected path triggers one refresh through `/auth/refresh-token` and a
//! single replay of the request; concurrent callers share that refresh.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use reqwest::{
    header::AUTHORIZATION,
    multipart::{Form, Part},
    Method, RequestBuilder, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::{
    api::response::ApiResponse,
    models::{
        book::Book,
        pagination::Paginated,
        user::{RegisteredUser, User, UserSummary},
    },
};

const REFRESH_PATH: &str = "/auth/refresh-token";

/// Paths that never trigger a refresh on `401`
const PUBLIC_PATHS: &[&str] = &["/auth/login", "/auth/register", REFRESH_PATH];

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api {
        status: StatusCode,
        message: String,
        errors: Option<serde_json::Value>,
    },

    #[error("Session expired")]
    SessionExpired,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Tokens returned by login and refresh
#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    #[serde(flatten)]
    pub tokens: AuthTokens,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub user: RegisteredUser,
    #[serde(default)]
    pub verify_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResetRequested {
    reset_token: String,
}

#[derive(Debug, Deserialize)]
struct VerificationResent {
    verify_token: String,
}

#[derive(Debug, Deserialize)]
struct RevokedSessions {
    revoked: u64,
}

/// Query for `GET /books`
#[derive(Debug, Default, Clone, Serialize)]
pub struct BookFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// Query for `GET /users`
#[derive(Debug, Default, Clone, Serialize)]
pub struct UserFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// Image attached to a form
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Book fields for create and update; unset fields are left out of the form
#[derive(Debug, Default, Clone)]
pub struct BookForm {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub rating: Option<i16>,
    pub thumbnail: Option<ImageFile>,
    pub remove_thumbnail: bool,
}

/// Profile changes for `PUT /users/profile`
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProfileChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

enum FormValue {
    Text(String),
    File(ImageFile),
}

/// Request body, rebuilt for every attempt so a request can be replayed
enum Payload {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<(&'static str, FormValue)>),
}

impl Payload {
    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Payload::Empty => builder,
            Payload::Json(value) => builder.json(value),
            Payload::Multipart(fields) => {
                let form = fields.iter().fold(Form::new(), |form, (name, value)| match value {
                    FormValue::Text(text) => form.text(*name, text.clone()),
                    FormValue::File(file) => form.part(
                        *name,
                        Part::bytes(file.bytes.clone()).file_name(file.file_name.clone()),
                    ),
                });
                builder.multipart(form)
            }
        }
    }
}

impl BookForm {
    fn into_payload(self) -> Payload {
        let mut fields = Vec::new();
        if let Some(title) = self.title {
            fields.push(("title", FormValue::Text(title)));
        }
        if let Some(author) = self.author {
            fields.push(("author", FormValue::Text(author)));
        }
        if let Some(description) = self.description {
            fields.push(("description", FormValue::Text(description)));
        }
        if let Some(rating) = self.rating {
            fields.push(("rating", FormValue::Text(rating.to_string())));
        }
        if let Some(thumbnail) = self.thumbnail {
            fields.push(("thumbnail", FormValue::File(thumbnail)));
        }
        if self.remove_thumbnail {
            fields.push(("remove_thumbnail", FormValue::Text("true".to_string())));
        }
        Payload::Multipart(fields)
    }
}

#[derive(Default)]
struct SessionTokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// Bookshelf API client
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session: RwLock<SessionTokens>,
    /// Bumped after every refresh attempt
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
}

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

impl ApiClient {
    /// Create a client for an API root such as `http://localhost:4000/api`
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self::with_http_client(http, base_url))
    }

    /// Use a preconfigured reqwest client (it should keep a cookie store)
    pub fn with_http_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: RwLock::new(SessionTokens::default()),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn access_token(&self) -> Option<String> {
        self.session.read().await.access.clone()
    }

    /// Adopt tokens obtained elsewhere
    pub async fn set_tokens(&self, access: Option<String>, refresh: Option<String>) {
        let mut session = self.session.write().await;
        session.access = access;
        session.refresh = refresh;
    }

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        query: &[(String, String)],
        payload: &Payload,
    ) -> ClientResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method.clone(), url).query(query);
        if let Some(token) = self.access_token().await {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(payload.apply(builder).send().await?)
    }

    /// Send a request, refreshing the session once if a protected path answers `401`
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        payload: Payload,
    ) -> ClientResult<ApiResponse<T>> {
        let observed = self.generation.load(Ordering::Acquire);
        let response = self.dispatch(&method, path, query, &payload).await?;

        if response.status() != StatusCode::UNAUTHORIZED || is_public(path) {
            return decode(response).await;
        }

        self.refresh_since(observed).await?;

        let response = self.dispatch(&method, path, query, &payload).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::SessionExpired);
        }
        decode(response).await
    }

    /// Refresh unless another caller already did since `observed`
    async fn refresh_since(&self, observed: u64) -> ClientResult<()> {
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            return match self.access_token().await {
                Some(_) => Ok(()),
                None => Err(ClientError::SessionExpired),
            };
        }

        let outcome = self.refresh_session().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn refresh_session(&self) -> ClientResult<()> {
        let refresh = self.session.read().await.refresh.clone();
        let payload = match refresh {
            Some(token) => Payload::Json(serde_json::json!({ "refresh_token": token })),
            None => Payload::Empty,
        };

        let url = format!("{}{}", self.base_url, REFRESH_PATH);
        let response = payload.apply(self.http.post(url)).send().await?;

        if !response.status().is_success() {
            tracing::debug!("Session refresh rejected with {}", response.status());
            self.set_tokens(None, None).await;
            return Err(ClientError::SessionExpired);
        }

        let body: ApiResponse<AuthTokens> = response.json().await?;
        let tokens = body.data.ok_or(ClientError::SessionExpired)?;
        self.set_tokens(Some(tokens.access_token), Some(tokens.refresh_token))
            .await;
        Ok(())
    }

    async fn data<T: DeserializeOwned>(&self, method: Method, path: &str, payload: Payload) -> ClientResult<T> {
        self.query_data(method, path, &[], payload).await
    }

    async fn query_data<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        payload: Payload,
    ) -> ClientResult<T> {
        self.request::<T>(method, path, query, payload)
            .await?
            .data
            .ok_or_else(|| ClientError::UnexpectedResponse(format!("{} returned no data", path)))
    }

    async fn message(&self, method: Method, path: &str, payload: Payload) -> ClientResult<String> {
        Ok(self
            .request::<serde_json::Value>(method, path, &[], payload)
            .await?
            .message)
    }

    // Auth

    pub async fn register(&self, name: &str, email: &str, password: &str) -> ClientResult<Registration> {
        let body = serde_json::json!({ "name": name, "email": email, "password": password });
        self.data(Method::POST, "/auth/register", Payload::Json(body)).await
    }

    pub async fn verify_email(&self, id: i32, token: &str) -> ClientResult<String> {
        let query = [("id".to_string(), id.to_string()), ("token".to_string(), token.to_string())];
        Ok(self
            .request::<serde_json::Value>(Method::GET, "/auth/verify-email", &query, Payload::Empty)
            .await?
            .message)
    }

    /// Returns the new token outside production
    pub async fn resend_verification(&self, email: &str) -> ClientResult<Option<String>> {
        let body = serde_json::json!({ "email": email });
        let response = self
            .request::<VerificationResent>(Method::POST, "/auth/resend-verification", &[], Payload::Json(body))
            .await?;
        Ok(response.data.map(|d| d.verify_token))
    }

    /// Log in and keep the returned tokens for later requests
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<User> {
        let body = serde_json::json!({ "email": email, "password": password });
        let data: LoginData = self.data(Method::POST, "/auth/login", Payload::Json(body)).await?;
        self.set_tokens(Some(data.tokens.access_token), Some(data.tokens.refresh_token))
            .await;
        Ok(data.user)
    }

    /// Force a token refresh
    pub async fn refresh(&self) -> ClientResult<()> {
        let observed = self.generation.load(Ordering::Acquire);
        self.refresh_since(observed).await
    }

    pub async fn logout(&self) -> ClientResult<()> {
        let refresh = self.session.read().await.refresh.clone();
        let payload = match refresh {
            Some(token) => Payload::Json(serde_json::json!({ "refresh_token": token })),
            None => Payload::Empty,
        };
        let result = self.message(Method::POST, "/auth/logout", payload).await;
        self.set_tokens(None, None).await;
        result.map(|_| ())
    }

    /// Revoke every session of the current user; returns the number revoked
    pub async fn logout_all(&self) -> ClientResult<u64> {
        let data: RevokedSessions = self.data(Method::POST, "/auth/logout-all", Payload::Empty).await?;
        self.set_tokens(None, None).await;
        Ok(data.revoked)
    }

    pub async fn me(&self) -> ClientResult<User> {
        self.data(Method::GET, "/auth/me", Payload::Empty).await
    }

    /// Returns the reset token outside production
    pub async fn forgot_password(&self, email: &str) -> ClientResult<Option<String>> {
        let body = serde_json::json!({ "email": email });
        let response = self
            .request::<ResetRequested>(Method::POST, "/auth/forgot-password", &[], Payload::Json(body))
            .await?;
        Ok(response.data.map(|d| d.reset_token))
    }

    pub async fn reset_password(&self, id: i32, token: &str, password: &str) -> ClientResult<String> {
        let body = serde_json::json!({ "id": id, "token": token, "password": password });
        self.message(Method::POST, "/auth/reset-password", Payload::Json(body))
            .await
    }

    // Books

    pub async fn list_books(&self, filter: &BookFilter) -> ClientResult<Paginated<Book>> {
        let query = query_pairs(filter)?;
        self.query_data(Method::GET, "/books", &query, Payload::Empty).await
    }

    pub async fn get_book(&self, id: i32) -> ClientResult<Book> {
        self.data(Method::GET, &format!("/books/{}", id), Payload::Empty).await
    }

    pub async fn create_book(&self, form: BookForm) -> ClientResult<Book> {
        self.data(Method::POST, "/books", form.into_payload()).await
    }

    pub async fn update_book(&self, id: i32, form: BookForm) -> ClientResult<Book> {
        self.data(Method::PUT, &format!("/books/{}", id), form.into_payload())
            .await
    }

    pub async fn delete_book(&self, id: i32) -> ClientResult<()> {
        self.message(Method::DELETE, &format!("/books/{}", id), Payload::Empty)
            .await
            .map(|_| ())
    }

    // Users

    pub async fn list_users(&self, filter: &UserFilter) -> ClientResult<Paginated<UserSummary>> {
        let query = query_pairs(filter)?;
        self.query_data(Method::GET, "/users", &query, Payload::Empty).await
    }

    pub async fn profile(&self) -> ClientResult<User> {
        self.data(Method::GET, "/users/profile", Payload::Empty).await
    }

    pub async fn update_profile(&self, changes: &ProfileChanges) -> ClientResult<User> {
        let body = serde_json::to_value(changes)
            .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;
        self.data(Method::PUT, "/users/profile", Payload::Json(body)).await
    }

    pub async fn upload_avatar(&self, image: ImageFile) -> ClientResult<User> {
        let payload = Payload::Multipart(vec![("avatar", FormValue::File(image))]);
        self.data(Method::PUT, "/users/avatar", payload).await
    }

    pub async fn remove_avatar(&self) -> ClientResult<User> {
        self.data(Method::DELETE, "/users/avatar", Payload::Empty).await
    }
}

/// Turn a response into its envelope, mapping failures to `ClientError::Api`
async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<ApiResponse<T>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await?;
    let (message, errors) = match serde_json::from_str::<ApiResponse<serde_json::Value>>(&text) {
        Ok(envelope) => (envelope.message, envelope.errors),
        Err(_) => (text, None),
    };
    Err(ClientError::Api {
        status,
        message,
        errors,
    })
}

/// Flatten a filter struct into query pairs, skipping unset fields
fn query_pairs<Q: Serialize>(query: &Q) -> ClientResult<Vec<(String, String)>> {
    let encoded = serde_json::to_value(query)
        .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))?;
    let serde_json::Value::Object(map) = encoded else {
        return Ok(Vec::new());
    };

    Ok(map
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect())
}
