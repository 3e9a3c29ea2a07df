#![allow(dead_code)]

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc, sync::Mutex};
use tower::ServiceExt;
use turnstile::{
    account::store::{MemoryUserStore, UserStore},
    account::User,
    notify::{Notification, NotificationKind, Notifier},
    paywall::{AddressDeriver, PaywallConfig, Transaction, TxLookup},
    session::MemorySessionStore,
    AppState, AuthConfig, Backends,
};
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse battery";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn last_token(&self, email: &str, kind: NotificationKind) -> Option<String> {
        lock(&self.sent)
            .iter()
            .rev()
            .find(|n| n.kind == kind && n.to_email == email)
            .and_then(|n| n.token.clone())
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        lock(&self.sent).iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWallet {
    transactions: Mutex<HashMap<String, Vec<Transaction>>>,
}

impl FakeWallet {
    pub fn pay(&self, address: &str, txid: &str, amount: u64, confirmations: u32, timestamp: i64) {
        lock(&self.transactions)
            .entry(address.to_string())
            .or_default()
            .push(Transaction {
                txid: txid.to_string(),
                amount,
                confirmations,
                timestamp,
            });
    }
}

#[async_trait]
impl AddressDeriver for FakeWallet {
    async fn derive(&self, user_id: Uuid) -> Result<String> {
        Ok(format!("addr-{user_id}"))
    }
}

#[async_trait]
impl TxLookup for FakeWallet {
    async fn transactions(&self, address: &str) -> Result<Vec<Transaction>> {
        Ok(lock(&self.transactions)
            .get(address)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub users: Arc<MemoryUserStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub wallet: Arc<FakeWallet>,
}

impl Harness {
    pub fn new(paywall_amount: u64) -> Result<Self> {
        let users = Arc::new(MemoryUserStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let wallet = Arc::new(FakeWallet::default());
        let config = AuthConfig::new("http://localhost:3000".to_string())
            .with_max_failed_logins(3)
            .with_password_cost(8, 1);
        let state = AppState::new(
            config,
            PaywallConfig::new(paywall_amount).with_confirmations(1),
            Backends {
                users: users.clone(),
                sessions: Arc::new(MemorySessionStore::new()),
                notifier: notifier.clone(),
                deriver: wallet.clone(),
                lookup: wallet.clone(),
            },
        )?;
        Ok(Self {
            state: Arc::new(state),
            users,
            notifier,
            wallet,
        })
    }

    pub fn client(&self) -> Result<TestClient> {
        Ok(TestClient::new(turnstile::api::app(Arc::clone(&self.state))?))
    }

    pub async fn user(&self, id: Uuid) -> Result<User> {
        self.users.get_by_id(id).await?.context("user not found")
    }

    pub async fn update(&self, id: Uuid, f: impl FnOnce(&mut User)) -> Result<()> {
        let mut user = self.user(id).await?;
        f(&mut user);
        self.users
            .update(&user)
            .await
            .map_err(|err| anyhow!("update failed: {err:?}"))
    }

    /// Sign up through the API and redeem the emailed token.
    pub async fn verified_user(&self, client: &mut TestClient, n: u8) -> Result<Uuid> {
        let email = email(n);
        let (status, body) = client
            .post(
                "/api/v1/user/new",
                json!({
                    "email": email,
                    "username": format!("user{n}"),
                    "password": PASSWORD,
                    "public_key": public_key(n),
                }),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::OK, "signup failed: {body}");

        let token = self
            .notifier
            .last_token(&email, NotificationKind::VerifyNewUser)
            .context("no verification token sent")?;
        let (status, body) = client.get(&verify_uri(&email, &token)).await?;
        anyhow::ensure!(status == StatusCode::OK, "verify failed: {body}");
        body["user_id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .context("missing user_id")
    }

    pub async fn login(&self, client: &mut TestClient, n: u8) -> Result<Value> {
        let (status, body) = client
            .post(
                "/api/v1/login",
                json!({ "email": email(n), "password": PASSWORD }),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::OK, "login failed: {body}");
        Ok(body)
    }
}

pub fn email(n: u8) -> String {
    format!("user{n}@example.com")
}

pub fn public_key(n: u8) -> String {
    format!("{n:02x}").repeat(32)
}

pub fn verify_uri(email: &str, token: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("email", email)
        .append_pair("verification_token", token)
        .finish();
    format!("/api/v1/user/verify?{query}")
}

pub fn error_code(body: &Value) -> &str {
    body["error_code"].as_str().unwrap_or_default()
}

/// Browser-like client: keeps cookies and echoes the anti-forgery token.
pub struct TestClient {
    router: Router,
    cookies: HashMap<String, String>,
    csrf_token: Option<String>,
}

impl TestClient {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            cookies: HashMap::new(),
            csrf_token: None,
        }
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    pub async fn get(&mut self, uri: &str) -> Result<(StatusCode, Value)> {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&mut self, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&mut self, uri: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.send(Method::PUT, uri, Some(body)).await
    }

    async fn send(
        &mut self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        if method != Method::GET && self.csrf_token.is_none() {
            self.request(Method::GET, "/api/v1/version", None, None).await?;
        }
        let csrf = self.csrf_token.clone();
        self.request(method, uri, body, csrf).await
    }

    /// Send one request with an explicit anti-forgery header.
    pub async fn request(
        &mut self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        csrf: Option<String>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, cookie);
        }
        if let Some(csrf) = csrf {
            builder = builder.header("x-csrf-token", csrf);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => builder.body(Body::empty())?,
        };

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();

        for value in response.headers().get_all(header::SET_COOKIE) {
            self.store_cookie(value);
        }
        if let Some(token) = response
            .headers()
            .get("x-csrf-token")
            .and_then(|value| value.to_str().ok())
        {
            self.csrf_token = Some(token.to_string());
        }

        let bytes = response.into_body().collect().await?.to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, body))
    }

    fn store_cookie(&mut self, value: &HeaderValue) {
        let Ok(cookie) = value.to_str() else {
            return;
        };
        let pair = cookie.split(';').next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        if value.is_empty() || cookie.contains("Max-Age=0") {
            self.cookies.remove(name.trim());
        } else {
            self.cookies.insert(name.trim().to_string(), value.to_string());
        }
    }
}
