//! # Authentication
//!
//! Email/password sign-in against the managed identity service.
//!
//! ## State observation
//!
//! Callers never poll the provider. They [`AuthProvider::subscribe`] to a uid and get an
//! [`AuthSubscription`] backed by a `watch` channel; sign-in and sign-out publish into it.
//! Sign-out waits on that subscription before redirecting, so the redirect only happens
//! after the provider has actually dropped the session.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::{sync::watch, time::Instant};
use tracing::debug;
use uuid::Uuid;

const IDENTITY_ROOT: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_ROOT: &str = "https://securetoken.googleapis.com/v1";
/// Tokens are refreshed this long before the provider says they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Session expired")]
    SessionExpired,

    #[error("Auth request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Auth provider returned {status}: {message}")]
    Provider { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub id_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedIn(String),
    SignedOut,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn sign_out(&self, user: &AuthUser) -> Result<(), AuthError>;

    fn subscribe(&self, uid: &str) -> AuthSubscription;

    /// A currently valid ID token for `user`.
    async fn id_token(&self, user: &AuthUser) -> Result<String, AuthError>;
}

/// Per-uid auth state channels. An entry lives while its uid is signed in or observed.
#[derive(Clone, Default)]
pub struct AuthStates {
    channels: Arc<Mutex<HashMap<String, watch::Sender<AuthState>>>>,
}

impl AuthStates {
    pub fn publish(&self, uid: &str, state: AuthState) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);

        match channels.get(uid) {
            Some(sender) if state == AuthState::SignedOut && sender.receiver_count() == 0 => {
                channels.remove(uid);
            }
            Some(sender) => {
                sender.send_replace(state);
            }
            None if state == AuthState::SignedOut => {}
            None => {
                channels.insert(uid.to_string(), watch::channel(state).0);
            }
        }
    }

    pub fn subscribe(&self, uid: &str) -> AuthSubscription {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = channels
            .entry(uid.to_string())
            .or_insert_with(|| watch::channel(AuthState::SignedOut).0);

        AuthSubscription {
            uid: uid.to_string(),
            receiver: sender.subscribe(),
            states: self.clone(),
        }
    }

    /// Number of uids with a live channel.
    pub fn tracked(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, uid: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = channels.get(uid).is_some_and(|sender| {
            sender.receiver_count() == 0 && *sender.borrow() == AuthState::SignedOut
        });

        if idle {
            channels.remove(uid);
        }
    }
}

/// Dropping the subscription releases its uid's channel once nobody observes a signed-out uid.
pub struct AuthSubscription {
    uid: String,
    receiver: watch::Receiver<AuthState>,
    states: AuthStates,
}

impl AuthSubscription {
    pub fn current(&self) -> AuthState {
        self.receiver.borrow().clone()
    }

    /// Next state change, or `None` once the provider is gone.
    pub async fn changed(&mut self) -> Option<AuthState> {
        self.receiver.changed().await.ok()?;

        Some(self.receiver.borrow_and_update().clone())
    }

    /// Resolves once the uid is signed out. `false` if the provider went away first.
    pub async fn signed_out(&mut self) -> bool {
        self.receiver
            .wait_for(|state| *state == AuthState::SignedOut)
            .await
            .is_ok()
    }

    pub fn unsubscribe(self) {
        debug!("Auth subscription for {} closed", self.uid);
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        // Swap out our receiver first so the count below no longer includes it.
        drop(std::mem::replace(
            &mut self.receiver,
            watch::channel(AuthState::SignedOut).1,
        ));
        self.states.release(&self.uid);
    }
}

struct CachedToken {
    id_token: String,
    fresh_until: Instant,
}

impl CachedToken {
    fn new(id_token: String, expires_in: &str) -> Self {
        let lifetime = Duration::from_secs(expires_in.parse().unwrap_or(3600));

        Self {
            id_token,
            fresh_until: Instant::now() + lifetime.saturating_sub(TOKEN_MARGIN),
        }
    }
}

pub struct FirebaseAuth {
    client: Client,
    api_key: String,
    states: AuthStates,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    email: String,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    #[serde(default)]
    expires_in: String,
}

#[derive(Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    message: String,
}

impl FirebaseAuth {
    pub fn new(client: Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            states: AuthStates::default(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn cached_token(&self, uid: &str) -> Option<String> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uid)
            .filter(|token| Instant::now() < token.fresh_until)
            .map(|token| token.id_token.clone())
    }

    fn cache_token(&self, uid: &str, token: CachedToken) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid.to_string(), token);
    }
}

async fn provider_error(response: reqwest::Response) -> AuthError {
    let status = response.status().as_u16();
    let message = response
        .json::<ProviderError>()
        .await
        .map(|e| e.error.message)
        .unwrap_or_default();

    match message.as_str() {
        "INVALID_PASSWORD" | "EMAIL_NOT_FOUND" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_EMAIL"
        | "USER_DISABLED" => AuthError::InvalidCredentials,
        "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "USER_NOT_FOUND" => AuthError::SessionExpired,
        _ => AuthError::Provider { status, message },
    }
}

#[async_trait]
impl AuthProvider for FirebaseAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let response = self
            .client
            .post(format!("{IDENTITY_ROOT}/accounts:signInWithPassword"))
            .query(&[("key", &self.api_key)])
            .json(&json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }

        let signed_in: SignInResponse = response.json().await?;
        self.cache_token(
            &signed_in.local_id,
            CachedToken::new(signed_in.id_token.clone(), &signed_in.expires_in),
        );
        self.states
            .publish(&signed_in.local_id, AuthState::SignedIn(signed_in.local_id.clone()));

        Ok(AuthUser {
            uid: signed_in.local_id,
            email: signed_in.email,
            id_token: signed_in.id_token,
            refresh_token: signed_in.refresh_token,
        })
    }

    // The identity service keeps no server-side session for password sign-in; dropping the
    // tokens is the sign-out.
    async fn sign_out(&self, user: &AuthUser) -> Result<(), AuthError> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user.uid);
        self.states.publish(&user.uid, AuthState::SignedOut);

        Ok(())
    }

    fn subscribe(&self, uid: &str) -> AuthSubscription {
        self.states.subscribe(uid)
    }

    async fn id_token(&self, user: &AuthUser) -> Result<String, AuthError> {
        if let Some(id_token) = self.cached_token(&user.uid) {
            return Ok(id_token);
        }

        let response = self
            .client
            .post(format!("{SECURE_TOKEN_ROOT}/token"))
            .query(&[("key", &self.api_key)])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", user.refresh_token.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }

        let refreshed: RefreshResponse = response.json().await?;
        debug!("Refreshed ID token for {}", user.uid);
        self.cache_token(
            &user.uid,
            CachedToken::new(refreshed.id_token.clone(), &refreshed.expires_in),
        );

        Ok(refreshed.id_token)
    }
}

struct Account {
    uid: String,
    password: String,
}

/// Accounts held in process. Backs development mode and tests.
#[derive(Default)]
pub struct MemoryAuth {
    accounts: Mutex<HashMap<String, Account>>,
    states: AuthStates,
}

impl MemoryAuth {
    /// Registers an account and returns its uid.
    pub fn register(&self, email: &str, password: &str) -> String {
        let uid = Uuid::new_v4().simple().to_string();

        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                email.trim().to_lowercase(),
                Account {
                    uid: uid.clone(),
                    password: password.to_string(),
                },
            );

        uid
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = email.trim().to_lowercase();
        let uid = {
            let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);

            match accounts.get(&email) {
                Some(account) if account.password == password => account.uid.clone(),
                _ => return Err(AuthError::InvalidCredentials),
            }
        };

        self.states.publish(&uid, AuthState::SignedIn(uid.clone()));

        Ok(AuthUser {
            uid,
            email,
            id_token: Uuid::new_v4().to_string(),
            refresh_token: Uuid::new_v4().to_string(),
        })
    }

    async fn sign_out(&self, user: &AuthUser) -> Result<(), AuthError> {
        self.states.publish(&user.uid, AuthState::SignedOut);

        Ok(())
    }

    fn subscribe(&self, uid: &str) -> AuthSubscription {
        self.states.subscribe(uid)
    }

    async fn id_token(&self, user: &AuthUser) -> Result<String, AuthError> {
        Ok(user.id_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sign_in() {
        let auth = MemoryAuth::default();
        let uid = auth.register("Owner@Hills.go", "secret");

        let user = auth.sign_in("owner@hills.go", "secret").await.unwrap();
        assert_eq!(user.uid, uid);
        assert_eq!(auth.id_token(&user).await.unwrap(), user.id_token);

        let wrong = auth.sign_in("owner@hills.go", "nope").await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_subscription_sees_sign_out() {
        let auth = MemoryAuth::default();
        auth.register("d@hills.go", "pw");
        let user = auth.sign_in("d@hills.go", "pw").await.unwrap();

        let mut subscription = auth.subscribe(&user.uid);
        assert_eq!(subscription.current(), AuthState::SignedIn(user.uid.clone()));

        auth.sign_out(&user).await.unwrap();
        assert_eq!(subscription.changed().await, Some(AuthState::SignedOut));
        assert!(subscription.signed_out().await);
        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn test_unknown_uid_starts_signed_out() {
        let states = AuthStates::default();
        let subscription = states.subscribe("ghost");
        assert_eq!(subscription.current(), AuthState::SignedOut);

        drop(subscription);
        assert_eq!(states.tracked(), 0);
    }

    #[tokio::test]
    async fn test_signed_out_channels_are_released() {
        let auth = MemoryAuth::default();
        auth.register("d@hills.go", "pw");

        for _ in 0..3 {
            let user = auth.sign_in("d@hills.go", "pw").await.unwrap();
            assert_eq!(auth.states.tracked(), 1);

            let mut subscription = auth.subscribe(&user.uid);
            auth.sign_out(&user).await.unwrap();
            assert!(subscription.signed_out().await);
            assert_eq!(auth.states.tracked(), 1);

            subscription.unsubscribe();
            assert_eq!(auth.states.tracked(), 0);
        }
    }

    #[tokio::test]
    async fn test_sign_out_without_observers_releases_channel() {
        let auth = MemoryAuth::default();
        auth.register("d@hills.go", "pw");
        let user = auth.sign_in("d@hills.go", "pw").await.unwrap();

        auth.sign_out(&user).await.unwrap();
        assert_eq!(auth.states.tracked(), 0);
    }

    #[tokio::test]
    async fn test_channel_kept_while_another_subscriber_waits() {
        let states = AuthStates::default();
        let first = states.subscribe("uid");
        let second = states.subscribe("uid");

        first.unsubscribe();
        assert_eq!(states.tracked(), 1);
        assert_eq!(second.current(), AuthState::SignedOut);

        drop(second);
        assert_eq!(states.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_token_goes_stale() {
        let auth = FirebaseAuth::new(Client::new(), "key");
        auth.cache_token("uid", CachedToken::new("token-1".to_string(), "3600"));
        assert_eq!(auth.cached_token("uid").as_deref(), Some("token-1"));

        tokio::time::advance(Duration::from_secs(3600) - TOKEN_MARGIN).await;
        assert_eq!(auth.cached_token("uid"), None);
    }
}
