//! # Sessions
//!
//! Browser sessions are keyed by an opaque id in the `hillsgo_session` cookie. The cookie has
//! no `Max-Age`, so it lives exactly as long as the browser session, which is the lifetime
//! the deep-link `tried` flag needs.
//!
//! ## Sign-out
//!
//! 1. Subscribe to the user's auth state
//! 2. Ask the provider to sign out
//! 3. Drop the session and every value stored in it
//! 4. Wait for the `SignedOut` notification, bounded by a timeout
//! 5. Redirect home, expiring every cookie under `/` and sending `Clear-Site-Data`
//!
//! A session that already tried the deep link is replaced by an anonymous one that only
//! holds the flag, so signing out does not re-arm the handoff.
//!
//! Sessions are created lazily and expire after an idle TTL.
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use axum::{
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::LOCATION,
    },
    response::{IntoResponse, Response},
};
use bank::models::Role;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{AuthProvider, AuthUser},
    error::AppError,
    utils::{append_cookie, cookie_value, expired_cookie, parse_cookies, session_cookie},
};

pub const SESSION_COOKIE: &str = "hillsgo_session";
pub const CLEAR_SITE_DATA: HeaderName = HeaderName::from_static("clear-site-data");
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    pub user: AuthUser,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub signed_in: Option<SignedIn>,
    /// Local key/value data, cleared wholesale on sign-out.
    pub values: HashMap<String, String>,
    pub handoff_tried: bool,
}

struct Entry {
    session: Session,
    last_seen: Instant,
}

/// Sessions idle for longer than the TTL are treated as absent and dropped by [`sweep_idle`].
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
    idle_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::default(),
            idle_ttl,
        }
    }

    pub fn create(&self) -> String {
        self.insert(Session::default())
    }

    /// Stores `session` under a fresh id and returns the id.
    pub fn insert(&self, session: Session) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let entry = Entry {
            session,
            last_seen: Instant::now(),
        };

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), entry);

        id
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.update(id, |session| session.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` against the live session at `id` and marks it as seen.
    /// `None` if there is no such session or it has gone idle.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        match sessions.get_mut(id) {
            Some(entry) if now.duration_since(entry.last_seen) < self.idle_ttl => {
                entry.last_seen = now;
                Some(f(&mut entry.session))
            }
            Some(_) => {
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|entry| entry.session)
    }

    /// Drops every idle session and returns them.
    pub fn evict_idle(&self) -> Vec<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) >= self.idle_ttl)
            .map(|(id, _)| id.clone())
            .collect();

        idle.iter()
            .filter_map(|id| sessions.remove(id))
            .map(|entry| entry.session)
            .collect()
    }

    /// The request's live session id, if it has one.
    pub fn current(&self, headers: &HeaderMap) -> Option<String> {
        cookie_value(headers, SESSION_COOKIE).filter(|id| self.contains(id))
    }

    pub fn signed_in(&self, headers: &HeaderMap) -> Option<SignedIn> {
        let id = cookie_value(headers, SESSION_COOKIE)?;

        self.get(&id)?.signed_in
    }

    /// Test-and-set of the session's deep-link flag. `true` when this call set it.
    pub fn claim_handoff(&self, id: &str) -> bool {
        self.update(id, |session| !std::mem::replace(&mut session.handoff_tried, true))
            .unwrap_or(false)
    }
}

/// Evicts idle sessions every `every`, signing out the users they held.
pub async fn sweep_idle(sessions: SessionStore, auth: Arc<dyn AuthProvider>, every: Duration) {
    let mut ticker = interval(every.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let evicted = sessions.evict_idle();
        if evicted.is_empty() {
            continue;
        }
        debug!("Evicted {} idle session(s)", evicted.len());

        for signed_in in evicted.into_iter().filter_map(|session| session.signed_in) {
            if let Err(e) = auth.sign_out(&signed_in.user).await {
                warn!("Failed to sign out idle user {}: {e}", signed_in.user.uid);
            }
        }
    }
}

/// Signs the session's user out and drops the session. Returns the dropped session.
pub async fn sign_out(
    auth: &dyn AuthProvider,
    sessions: &SessionStore,
    session_id: &str,
    wait: Duration,
) -> Result<Option<Session>, AppError> {
    let Some(signed_in) = sessions.get(session_id).and_then(|session| session.signed_in) else {
        return Ok(sessions.remove(session_id));
    };

    let mut subscription = auth.subscribe(&signed_in.user.uid);
    let result = auth.sign_out(&signed_in.user).await;

    let removed = sessions.remove(session_id);
    if let Some(session) = &removed {
        debug!(
            "Cleared session {session_id} ({} stored value(s))",
            session.values.len()
        );
    }
    result?;

    match timeout(wait, subscription.signed_out()).await {
        Ok(true) => info!("Signed out {}", signed_in.user.uid),
        Ok(false) => warn!("Auth provider closed before confirming sign-out"),
        Err(_) => warn!("Sign-out not confirmed within {wait:?}"),
    }
    subscription.unsubscribe();

    Ok(removed)
}

/// Redirect home that expires every cookie the request carried and clears browser storage.
///
/// `carry` is a session that outlives the sign-out, holding nothing but the deep-link flag.
/// Its cookie is set after the expiring ones, and `Clear-Site-Data` then leaves cookies alone
/// so the browser keeps it.
pub fn teardown_response(headers: &HeaderMap, carry: Option<&str>) -> Response {
    let clear = match carry {
        Some(_) => HeaderValue::from_static("\"storage\""),
        None => HeaderValue::from_static("\"cookies\", \"storage\""),
    };
    let mut response = (
        StatusCode::SEE_OTHER,
        [(LOCATION, HeaderValue::from_static("/")), (CLEAR_SITE_DATA, clear)],
    )
        .into_response();

    let mut names: Vec<String> = parse_cookies(headers)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    names.sort();
    names.dedup();

    for name in names {
        append_cookie(&mut response, &expired_cookie(&name));
    }
    if let Some(id) = carry {
        append_cookie(&mut response, &session_cookie(SESSION_COOKIE, id));
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::http::header::{COOKIE, SET_COOKIE};

    use tokio::time::advance;

    use super::*;
    use crate::auth::{AuthState, MemoryAuth};

    async fn signed_in_session(auth: &MemoryAuth, sessions: &SessionStore) -> String {
        auth.register("o@hills.go", "pw");
        let user = auth.sign_in("o@hills.go", "pw").await.unwrap();

        let id = sessions.create();
        sessions.update(&id, |session| {
            session.signed_in = Some(SignedIn {
                user,
                role: Role::Estore,
            });
            session.values.insert("cart".to_string(), "3".to_string());
        });

        id
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let auth = MemoryAuth::default();
        let sessions = SessionStore::default();
        let id = signed_in_session(&auth, &sessions).await;
        let other = sessions.create();

        let removed = sign_out(&auth, &sessions, &id, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(removed.values["cart"], "3");
        assert!(sessions.get(&id).is_none());
        assert!(sessions.contains(&other));
    }

    #[tokio::test]
    async fn test_sign_out_anonymous_session() {
        let auth = MemoryAuth::default();
        let sessions = SessionStore::default();
        let id = sessions.create();

        sign_out(&auth, &sessions, &id, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_claim_handoff_once() {
        let sessions = SessionStore::default();
        let id = sessions.create();

        assert!(sessions.claim_handoff(&id));
        assert!(!sessions.claim_handoff(&id));
        assert!(!sessions.claim_handoff("missing"));
    }

    #[test]
    fn test_current_needs_live_session() {
        let sessions = SessionStore::default();
        let id = sessions.create();
        assert_eq!(sessions.current(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={id}")).unwrap(),
        );
        assert_eq!(sessions.current(&headers), Some(id));

        let mut stale = HeaderMap::new();
        stale.insert(COOKIE, HeaderValue::from_static("hillsgo_session=gone"));
        assert_eq!(sessions.current(&stale), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_expires() {
        let sessions = SessionStore::new(Duration::from_secs(60));
        let idle = sessions.create();
        let active = sessions.create();

        advance(Duration::from_secs(45)).await;
        assert!(sessions.claim_handoff(&active));

        advance(Duration::from_secs(15)).await;
        assert!(!sessions.contains(&idle));
        assert!(sessions.contains(&active));
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_returns_dropped_sessions() {
        let auth = MemoryAuth::default();
        let sessions = SessionStore::new(Duration::from_secs(60));
        let signed_in = signed_in_session(&auth, &sessions).await;
        sessions.create();

        advance(Duration::from_secs(30)).await;
        let fresh = sessions.create();
        advance(Duration::from_secs(30)).await;

        let evicted = sessions.evict_idle();
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted.iter().filter(|s| s.signed_in.is_some()).count(), 1);
        assert!(!sessions.contains(&signed_in));
        assert!(sessions.contains(&fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_signs_out_idle_users() {
        let auth = Arc::new(MemoryAuth::default());
        let sessions = SessionStore::new(Duration::from_secs(60));
        let id = signed_in_session(&auth, &sessions).await;
        let uid = sessions.get(&id).unwrap().signed_in.unwrap().user.uid;
        let subscription = auth.subscribe(&uid);

        let sweeper = tokio::spawn(sweep_idle(
            sessions.clone(),
            auth.clone(),
            Duration::from_secs(10),
        ));
        tokio::time::sleep(Duration::from_secs(75)).await;

        assert!(sessions.is_empty());
        assert_eq!(subscription.current(), AuthState::SignedOut);
        sweeper.abort();
    }

    #[test]
    fn test_teardown_expires_every_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("hillsgo_session=abc; theme=dark; theme=light"),
        );

        let response = teardown_response(&headers, None);
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/");
        assert_eq!(response.headers()[CLEAR_SITE_DATA], "\"cookies\", \"storage\"");

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|cookie| cookie.contains("Max-Age=0")));
        assert!(cookies.iter().all(|cookie| cookie.contains("Path=/")));
    }

    #[test]
    fn test_teardown_sets_carried_session_last() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("hillsgo_session=abc; theme=dark"));

        let response = teardown_response(&headers, Some("fresh"));
        assert_eq!(response.headers()[CLEAR_SITE_DATA], "\"storage\"");

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 3);
        assert!(cookies[..2].iter().all(|cookie| cookie.contains("Max-Age=0")));
        assert!(cookies[2].starts_with("hillsgo_session=fresh;"));
        assert!(!cookies[2].contains("Max-Age"));
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect()
    }
}
