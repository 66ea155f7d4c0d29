//! Client tests against an in-process mock of the auth endpoints

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bookshelf_server::client::{ApiClient, ClientError};
use serde_json::{json, Value};

#[derive(Clone)]
struct MockServer {
    refreshes: Arc<AtomicUsize>,
    protected_calls: Arc<AtomicUsize>,
    /// Whether `/auth/refresh-token` hands out a new token
    refresh_succeeds: bool,
    /// Whether `/auth/me` accepts the refreshed token
    accepts_fresh_token: bool,
    refresh_delay: Duration,
}

impl MockServer {
    fn new() -> Self {
        Self {
            refreshes: Arc::new(AtomicUsize::new(0)),
            protected_calls: Arc::new(AtomicUsize::new(0)),
            refresh_succeeds: true,
            accepts_fresh_token: true,
            refresh_delay: Duration::ZERO,
        }
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn protected_calls(&self) -> usize {
        self.protected_calls.load(Ordering::SeqCst)
    }
}

fn user_json() -> Value {
    json!({
        "id": 1,
        "name": "A",
        "email": "a@x.com",
        "avatar": null,
        "email_verified_at": null,
        "created_at": "2024-06-01T12:00:00Z",
        "updated_at": "2024-06-01T12:00:00Z"
    })
}

fn failure(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "success": false, "message": message, "data": null, "errors": null })),
    )
}

async fn login(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if body["password"] != "secret1" {
        return failure(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    let mut data = json!({
        "access_token": "stale",
        "token_type": "Bearer",
        "expires_in": 900,
        "refresh_token": "refresh-1",
    });
    data["user"] = user_json();
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Login successful", "data": data, "errors": null })),
    )
}

async fn refresh(State(mock): State<MockServer>) -> (StatusCode, Json<Value>) {
    mock.refreshes.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(mock.refresh_delay).await;

    if !mock.refresh_succeeds {
        return failure(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Token refreshed",
            "data": {
                "access_token": "fresh",
                "token_type": "Bearer",
                "expires_in": 900,
                "refresh_token": "refresh-2"
            },
            "errors": null
        })),
    )
}

async fn me(State(mock): State<MockServer>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    mock.protected_calls.fetch_add(1, Ordering::SeqCst);

    let bearer = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if mock.accepts_fresh_token && bearer == Some("Bearer fresh") {
        return (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "User fetched successfully", "data": user_json(), "errors": null })),
        );
    }
    failure(StatusCode::UNAUTHORIZED, "Unauthorized")
}

async fn spawn(mock: MockServer) -> ApiClient {
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh-token", post(refresh))
        .route("/api/auth/me", get(me))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ApiClient::new(format!("http://{}/api", addr)).unwrap()
}

#[tokio::test]
async fn test_login_stores_access_token() {
    let client = spawn(MockServer::new()).await;

    let user = client.login("a@x.com", "secret1").await.unwrap();
    assert_eq!(user.id, 1);
    assert_eq!(client.access_token().await.as_deref(), Some("stale"));
}

#[tokio::test]
async fn test_unauthorized_request_refreshes_once_and_replays() {
    let mock = MockServer::new();
    let client = spawn(mock.clone()).await;
    client.login("a@x.com", "secret1").await.unwrap();

    let user = client.me().await.unwrap();
    assert_eq!(user.email, "a@x.com");
    assert_eq!(mock.refreshes(), 1);
    assert_eq!(mock.protected_calls(), 2);
    assert_eq!(client.access_token().await.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_failed_refresh_reports_session_expired() {
    let mock = MockServer {
        refresh_succeeds: false,
        ..MockServer::new()
    };
    let client = spawn(mock.clone()).await;
    client.login("a@x.com", "secret1").await.unwrap();

    let err = client.me().await.unwrap_err();
    assert!(matches!(err, ClientError::SessionExpired));
    assert_eq!(mock.refreshes(), 1);
    assert_eq!(mock.protected_calls(), 1);
    assert_eq!(client.access_token().await, None);
}

#[tokio::test]
async fn test_replay_is_not_retried_again() {
    let mock = MockServer {
        accepts_fresh_token: false,
        ..MockServer::new()
    };
    let client = spawn(mock.clone()).await;
    client.login("a@x.com", "secret1").await.unwrap();

    let err = client.me().await.unwrap_err();
    assert!(matches!(err, ClientError::SessionExpired));
    assert_eq!(mock.refreshes(), 1);
    assert_eq!(mock.protected_calls(), 2);
}

#[tokio::test]
async fn test_public_paths_never_refresh() {
    let mock = MockServer::new();
    let client = spawn(mock.clone()).await;

    let err = client.login("a@x.com", "wrong").await.unwrap_err();
    match err {
        ClientError::Api { status, message, .. } => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(message, "Invalid credentials");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(mock.refreshes(), 0);
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    let mock = MockServer {
        refresh_delay: Duration::from_millis(100),
        ..MockServer::new()
    };
    let client = spawn(mock.clone()).await;
    client.login("a@x.com", "secret1").await.unwrap();

    let (first, second, third) = tokio::join!(client.me(), client.me(), client.me());
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(third.is_ok());
    assert_eq!(mock.refreshes(), 1);
}
