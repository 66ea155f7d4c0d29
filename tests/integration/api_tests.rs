//! API integration tests
//!
//! These run against a live server in non-production mode (tokens are
//! echoed in responses). Run with: cargo test -- --ignored

use reqwest::{multipart, Client, StatusCode};
use serde_json::{json, Value};

fn base_url() -> String {
    std::env::var("BOOKSHELF_TEST_URL").unwrap_or_else(|_| "http://localhost:4000/api".to_string())
}

/// Address that has never been registered
fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, uuid::Uuid::new_v4().simple())
}

async fn register(client: &Client, name: &str, email: &str, password: &str) -> (StatusCode, Value) {
    let response = client
        .post(format!("{}/auth/register", base_url()))
        .json(&json!({ "name": name, "email": email, "password": password }))
        .send()
        .await
        .expect("Failed to send register request");
    let status = response.status();
    (status, response.json().await.expect("Failed to parse register response"))
}

async fn login(client: &Client, email: &str, password: &str) -> (StatusCode, Value) {
    let response = client
        .post(format!("{}/auth/login", base_url()))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .expect("Failed to send login request");
    let status = response.status();
    (status, response.json().await.expect("Failed to parse login response"))
}

/// Register a fresh account and return (id, access token, refresh token)
async fn signed_in_user(client: &Client, prefix: &str) -> (i64, String, String) {
    let email = unique_email(prefix);
    let (status, body) = register(client, "Reader", &email, "secret1").await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["user"]["id"].as_i64().expect("No user ID");

    let (status, body) = login(client, &email, "secret1").await;
    assert_eq!(status, StatusCode::OK);
    (
        id,
        body["data"]["access_token"].as_str().expect("No access token").to_string(),
        body["data"]["refresh_token"].as_str().expect("No refresh token").to_string(),
    )
}

async fn create_book(client: &Client, token: &str, title: &str, author: &str) -> Value {
    let form = multipart::Form::new()
        .text("title", title.to_string())
        .text("author", author.to_string())
        .text("rating", "4");

    let response = client
        .post(format!("{}/books", base_url()))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json::<Value>().await.expect("Failed to parse response")["data"].clone()
}

#[tokio::test]
#[ignore]
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", base_url()))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_register_verify_and_login() {
    let client = Client::new();
    let email = unique_email("a");

    let (status, body) = register(&client, "A", &email, "secret1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let id = body["data"]["user"]["id"].as_i64().expect("No user ID");
    let token = body["data"]["verify_token"].as_str().expect("No verification token");

    let response = client
        .get(format!("{}/auth/verify-email", base_url()))
        .query(&[("id", id.to_string()), ("token", token.to_string())])
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = login(&client, &email, "secret1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["access_token"].is_string());
    assert_eq!(body["data"]["token_type"], "Bearer");
    assert!(body["data"]["user"]["email_verified_at"].is_string());

    let (status, body) = login(&client, &email, "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
#[ignore]
async fn test_verification_token_is_single_use() {
    let client = Client::new();
    let (status, body) = register(&client, "Once", &unique_email("once"), "secret1").await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["user"]["id"].as_i64().unwrap().to_string();
    let token = body["data"]["verify_token"].as_str().unwrap().to_string();

    let verify = || {
        client
            .get(format!("{}/auth/verify-email", base_url()))
            .query(&[("id", id.clone()), ("token", token.clone())])
            .send()
    };

    assert_eq!(verify().await.unwrap().status(), StatusCode::OK);
    assert_eq!(verify().await.unwrap().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_email_conflicts() {
    let client = Client::new();
    let email = unique_email("dup");

    let (status, _) = register(&client, "First", &email, "secret1").await;
    assert_eq!(status, StatusCode::CREATED);

    // Case and whitespace do not make a new address
    let (status, body) = register(&client, "Second", &format!("  {} ", email.to_uppercase()), "secret1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
#[ignore]
async fn test_overlong_text_is_a_validation_error() {
    let client = Client::new();
    let long = "x".repeat(300);

    let (status, body) = register(&client, &long, &unique_email("long"), "secret1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["errors"]["name"].is_array());

    let (_, token, _) = signed_in_user(&client, "long-book").await;
    let form = multipart::Form::new()
        .text("title", long)
        .text("author", "Herbert");
    let response = client
        .post(format!("{}/books", base_url()))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .get(format!("{}/users?page=&limit=", base_url()))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore]
async fn test_login_invalid_credentials() {
    let client = Client::new();
    let (status, body) = login(&client, &unique_email("ghost"), "whatever").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
#[ignore]
async fn test_get_current_user() {
    let client = Client::new();
    let (id, token, _) = signed_in_user(&client, "me").await;

    let response = client
        .get(format!("{}/auth/me", base_url()))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["id"].as_i64(), Some(id));
    assert!(body["data"].get("password_hash").is_none());
}

#[tokio::test]
#[ignore]
async fn test_refresh_token_rotation_rejects_replay() {
    let client = Client::new();
    let (_, _, refresh) = signed_in_user(&client, "rotate").await;

    let response = client
        .post(format!("{}/auth/refresh-token", base_url()))
        .json(&json!({ "refresh_token": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_ne!(body["data"]["refresh_token"].as_str(), Some(refresh.as_str()));

    let replay = client
        .post(format!("{}/auth/refresh-token", base_url()))
        .json(&json!({ "refresh_token": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_login_sets_session_cookies() {
    let client = Client::builder().cookie_store(true).build().unwrap();
    let (_, _, _) = signed_in_user(&client, "cookie").await;

    // No bearer header: the access cookie authenticates
    let response = client.get(format!("{}/auth/me", base_url())).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // No body: the refresh cookie is used
    let response = client
        .post(format!("{}/auth/refresh-token", base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.post(format!("{}/auth/logout", base_url())).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.get(format!("{}/auth/me", base_url())).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_password_reset_flow() {
    let client = Client::new();
    let email = unique_email("reset");
    let (status, body) = register(&client, "Reset", &email, "secret1").await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["user"]["id"].as_i64().unwrap();

    let (_, old_session) = login(&client, &email, "secret1").await;
    let old_refresh = old_session["data"]["refresh_token"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/auth/forgot-password", base_url()))
        .json(&json!({ "email": email }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let token = body["data"]["reset_token"].as_str().expect("No reset token").to_string();

    let reset = |password: &'static str| {
        client
            .post(format!("{}/auth/reset-password", base_url()))
            .json(&json!({ "id": id, "token": token, "password": password }))
            .send()
    };

    assert_eq!(reset("brand-new").await.unwrap().status(), StatusCode::OK);
    assert_eq!(reset("another-one").await.unwrap().status(), StatusCode::BAD_REQUEST);

    let (status, _) = login(&client, &email, "secret1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = login(&client, &email, "brand-new").await;
    assert_eq!(status, StatusCode::OK);

    // Sessions opened before the reset are gone
    let response = client
        .post(format!("{}/auth/refresh-token", base_url()))
        .json(&json!({ "refresh_token": old_refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_forgot_password_does_not_reveal_accounts() {
    let client = Client::new();
    let response = client
        .post(format!("{}/auth/forgot-password", base_url()))
        .json(&json!({ "email": unique_email("nobody") }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["data"].is_null());
}

#[tokio::test]
#[ignore]
async fn test_only_uploader_can_modify_book() {
    let client = Client::new();
    let (_, owner, _) = signed_in_user(&client, "owner").await;
    let (_, other, _) = signed_in_user(&client, "other").await;

    let book = create_book(&client, &owner, "Dune", "Frank Herbert").await;
    let book_id = book["id"].as_i64().expect("No book ID");

    let response = client
        .put(format!("{}/books/{}", base_url(), book_id))
        .bearer_auth(&other)
        .multipart(multipart::Form::new().text("title", "Stolen"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .delete(format!("{}/books/{}", base_url(), book_id))
        .bearer_auth(&other)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .put(format!("{}/books/{}", base_url(), book_id))
        .bearer_auth(&owner)
        .multipart(multipart::Form::new().text("rating", "5"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["rating"], 5);
    assert_eq!(body["data"]["title"], "Dune");

    let response = client
        .delete(format!("{}/books/{}", base_url(), book_id))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .get(format!("{}/books/{}", base_url(), book_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore]
async fn test_book_thumbnail_upload() {
    let client = Client::new();
    let (_, token, _) = signed_in_user(&client, "thumb").await;

    let png = multipart::Part::bytes(vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]).file_name("cover.png");
    let form = multipart::Form::new()
        .text("title", "Covered")
        .text("author", "Someone")
        .part("thumbnail", png);

    let response = client
        .post(format!("{}/books", base_url()))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    let thumbnail = body["data"]["thumbnail"].as_str().expect("No thumbnail").to_string();
    assert!(thumbnail.starts_with("/uploads/"));

    let server = base_url().trim_end_matches("/api").to_string();
    let response = client.get(format!("{}{}", server, thumbnail)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bad = multipart::Part::bytes(b"#!/bin/sh".to_vec()).file_name("cover.sh");
    let form = multipart::Form::new()
        .text("title", "Bad")
        .text("author", "Someone")
        .part("thumbnail", bad);
    let response = client
        .post(format!("{}/books", base_url()))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[ignore]
async fn test_book_listing_windows_and_counts() {
    let client = Client::new();
    let (uploader, token, _) = signed_in_user(&client, "lister").await;
    let marker = uuid::Uuid::new_v4().simple().to_string();

    for n in 0..3 {
        create_book(&client, &token, &format!("{} volume {}", marker, n), "Series Author").await;
    }

    let list = |page: u32| {
        client
            .get(format!("{}/books", base_url()))
            .query(&[
                ("search", marker.clone()),
                ("limit", "2".to_string()),
                ("page", page.to_string()),
            ])
            .send()
    };

    let first: Value = list(1).await.unwrap().json().await.unwrap();
    assert_eq!(first["data"]["total"], 3);
    assert_eq!(first["data"]["total_pages"], 2);
    assert_eq!(first["data"]["items"].as_array().unwrap().len(), 2);
    // Newest first
    assert_eq!(first["data"]["items"][0]["title"], format!("{} volume 2", marker));

    let second: Value = list(2).await.unwrap().json().await.unwrap();
    assert_eq!(second["data"]["total"], 3);
    assert_eq!(second["data"]["items"].as_array().unwrap().len(), 1);

    let by_uploader: Value = client
        .get(format!("{}/books", base_url()))
        .query(&[("uploader", uploader.to_string())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_uploader["data"]["total"], 3);
}

#[tokio::test]
#[ignore]
async fn test_list_users() {
    let client = Client::new();
    let (_, token, _) = signed_in_user(&client, "directory").await;

    let response = client
        .get(format!("{}/users", base_url()))
        .bearer_auth(&token)
        .query(&[("search", "directory-"), ("isVerified", "false")])
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["data"]["items"].is_array());
    assert!(body["data"]["total"].as_i64().unwrap() >= 1);
}

#[tokio::test]
#[ignore]
async fn test_profile_email_change_conflicts() {
    let client = Client::new();
    let taken = unique_email("taken");
    let (status, _) = register(&client, "Taken", &taken, "secret1").await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, token, _) = signed_in_user(&client, "mover").await;
    let response = client
        .put(format!("{}/users/profile", base_url()))
        .bearer_auth(&token)
        .json(&json!({ "email": taken }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore]
async fn test_client_refreshes_expired_access_token() {
    let api = bookshelf_server::client::ApiClient::new(base_url()).unwrap();
    let email = unique_email("client");
    api.register("Client", &email, "secret1").await.unwrap();
    api.login(&email, "secret1").await.unwrap();

    // Swap in a bogus access token; the refresh token still works
    let refresh = {
        let client = Client::new();
        let (_, body) = login(&client, &email, "secret1").await;
        body["data"]["refresh_token"].as_str().unwrap().to_string()
    };
    api.set_tokens(Some("expired".to_string()), Some(refresh)).await;

    let me = api.me().await.unwrap();
    assert_eq!(me.email, email);
    assert_ne!(api.access_token().await.as_deref(), Some("expired"));
}
