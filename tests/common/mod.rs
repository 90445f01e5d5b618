//! Shared harness for the integration tests: the real router over
//! `MemoryStore`, with in-process fakes for the external services.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use echo_reads::config::StorageConfig;
use echo_reads::integrations::{
    BillingProvider, BookCatalog, CheckoutRequest, EmailMessage, IdentityProvider, Mailer,
    ObjectStorage, SessionClaims,
};
use echo_reads::models::{Book, NewBook, NewUser, Role};
use echo_reads::store::{MemoryStore, Store};
use echo_reads::{AppError, AppState, Config, Result};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const PREMIUM_PRICE_ID: &str = "price_premium_test";

// =============================================================================
// Fakes
// =============================================================================

/// Accepts tokens of the form `token:<subject>`
#[derive(Default)]
pub struct FakeIdentity {
    profiles: Mutex<HashMap<String, NewUser>>,
}

impl FakeIdentity {
    pub fn set_profile(&self, subject: &str, profile: NewUser) {
        self.profiles
            .lock()
            .unwrap()
            .insert(subject.to_string(), profile);
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn verify_session(&self, token: &str) -> Result<SessionClaims> {
        let subject = token
            .strip_prefix("token:")
            .filter(|s| !s.is_empty())
            .ok_or(AppError::Unauthorized)?;
        Ok(SessionClaims {
            sub: subject.to_string(),
            azp: None,
            exp: Utc::now().timestamp() + 3600,
        })
    }

    async fn fetch_profile(&self, subject: &str) -> Result<NewUser> {
        let preset = self.profiles.lock().unwrap().get(subject).cloned();
        Ok(preset.unwrap_or_else(|| NewUser {
            clerk_id: subject.to_string(),
            email: Some(format!("{subject}@example.com")),
            username: Some(subject.to_lowercase()),
            display_name: None,
            avatar_url: None,
        }))
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    results: Mutex<Vec<NewBook>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn set_results(&self, books: Vec<NewBook>) {
        *self.results.lock().unwrap() = books;
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookCatalog for FakeCatalog {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<NewBook>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("catalog unavailable".to_string()));
        }
        Ok(self
            .results
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeBilling {
    pub checkouts: Mutex<Vec<CheckoutRequest>>,
    pub portals: Mutex<Vec<String>>,
}

#[async_trait]
impl BillingProvider for FakeBilling {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String> {
        self.checkouts.lock().unwrap().push(request);
        Ok("https://checkout.stripe.test/c/session_1".to_string())
    }

    async fn create_portal_session(&self, customer_id: &str, _return_url: &str) -> Result<String> {
        self.portals.lock().unwrap().push(customer_id.to_string());
        Ok("https://billing.stripe.test/p/session_1".to_string())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub objects: Mutex<Vec<(String, usize, String)>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), body.len(), content_type.to_string()));
        Ok(format!("https://cdn.echoreads.test/{key}"))
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.subject.clone())
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// =============================================================================
// Test application
// =============================================================================

pub fn test_config() -> Config {
    Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        database_url: String::new(),
        database_max_connections: 1,
        allowed_origins: vec!["http://localhost:3000".to_string()],
        environment: "test".to_string(),
        app_url: "https://echoreads.test".to_string(),
        clerk_jwt_key: String::new(),
        clerk_secret_key: None,
        clerk_authorized_parties: Vec::new(),
        stripe_secret_key: "sk_test".to_string(),
        stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
        stripe_premium_price_id: PREMIUM_PRICE_ID.to_string(),
        resend_api_key: None,
        email_from: "Echo Reads <test@echoreads.test>".to_string(),
        storage: StorageConfig {
            bucket: "test-bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: "test".to_string(),
            secret_access_key: "test".to_string(),
            public_base_url: None,
        },
        open_library_base_url: "http://openlibrary.invalid".to_string(),
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub identity: Arc<FakeIdentity>,
    pub catalog: Arc<FakeCatalog>,
    pub billing: Arc<FakeBilling>,
    pub storage: Arc<FakeStorage>,
    pub mailer: Arc<RecordingMailer>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(FakeIdentity::default());
        let catalog = Arc::new(FakeCatalog::default());
        let billing = Arc::new(FakeBilling::default());
        let storage = Arc::new(FakeStorage::default());
        let mailer = Arc::new(RecordingMailer::default());

        let state = AppState {
            store: store.clone(),
            config: test_config(),
            identity: identity.clone(),
            catalog: catalog.clone(),
            billing: billing.clone(),
            storage: storage.clone(),
            mailer: mailer.clone(),
        };

        Self {
            router: echo_reads::router(state),
            store,
            identity,
            catalog,
            billing,
            storage,
            mailer,
        }
    }

    /// Send a request and return status plus JSON body (`Null` when empty)
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_to_json(response.into_body()).await)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(make_request("GET", uri, token, None)).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(make_request("POST", uri, token, Some(body))).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(make_request("PUT", uri, token, Some(body))).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(make_request("PATCH", uri, token, Some(body))).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(make_request("DELETE", uri, token, None)).await
    }

    /// Provision a user through the API; returns (token, user id)
    pub async fn sign_in(&self, subject: &str) -> (String, Uuid) {
        let token = format!("token:{subject}");
        let (status, body) = self.get("/api/v1/profile", Some(&token)).await;
        assert_eq!(status, StatusCode::OK, "sign-in failed: {body}");
        let id = body["id"].as_str().unwrap().parse().unwrap();
        (token, id)
    }

    pub async fn make_premium(&self, user_id: Uuid) {
        self.store
            .set_premium(user_id, true, Utc::now())
            .await
            .unwrap();
    }

    pub async fn make_admin(&self, user_id: Uuid) {
        self.store.set_role(user_id, Role::Admin).await.unwrap();
    }

    pub async fn seed_book(&self, title: &str, author: &str, page_count: Option<i32>) -> Book {
        let book = Book {
            id: Uuid::new_v4(),
            open_library_key: None,
            title: title.to_string(),
            author: author.to_string(),
            isbn: None,
            cover_url: None,
            description: None,
            published_year: None,
            page_count,
            created_at: Utc::now(),
        };
        self.store.insert_book(book.clone()).await;
        book
    }

    /// Add a book to a user's library through the API
    pub async fn shelve(&self, token: &str, book_id: Uuid, status: &str) -> Value {
        let (code, body) = self
            .post(
                "/api/v1/library",
                Some(token),
                serde_json::json!({ "bookId": book_id, "status": status }),
            )
            .await;
        assert_eq!(code, StatusCode::CREATED, "shelve failed: {body}");
        body
    }

    /// Wait for background email tasks to deliver at least `count` messages
    pub async fn wait_for_emails(&self, count: usize) -> Vec<String> {
        for _ in 0..50 {
            if self.mailer.sent.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.mailer.subjects()
    }
}

// =============================================================================
// Request helpers
// =============================================================================

/// Parse response body as JSON
pub async fn body_to_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

pub fn make_request(
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn error_message(body: &Value) -> &str {
    body["error"].as_str().unwrap_or_default()
}
