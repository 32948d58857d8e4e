use std::sync::Arc;

use axum::{
    Form,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Redirect, Response},
};
use bank::{
    collections::{BLOGS, CATEGORIES, PRODUCTS, USERS, WORKERS, fetch, fetch_all, find},
    models::{Blog, Category, Product, Role, UserRecord, Worker},
};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::{error, info, warn};

use crate::{
    auth::AuthError,
    deeplink::{DeepLinkAttempt, HandoffPlan, SessionTriedFlag, TargetKind, TriedFlag},
    roles::dashboard_path,
    session::{SESSION_COOKIE, Session, SignedIn, sign_out, teardown_response},
    state::AppState,
    utils::{append_cookie, cookie_value, session_cookie},
    views,
};

pub async fn home_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match fetch_all::<Category>(state.store.as_ref(), CATEGORIES).await {
        Ok(categories) => views::home(&categories, None),
        Err(e) => {
            error!("Failed to load categories: {e}");
            views::home(&[], Some("Categories could not be loaded right now."))
        }
    }
}

pub async fn blog_index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match fetch_all::<Blog>(state.store.as_ref(), BLOGS).await {
        Ok(mut blogs) => {
            blogs.sort_by(|a, b| b.data.published_at.cmp(&a.data.published_at));
            views::blog_index(&blogs, None)
        }
        Err(e) => {
            error!("Failed to load blogs: {e}");
            views::blog_index(&[], Some("Posts could not be loaded right now."))
        }
    }
}

pub async fn blog_post_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Response {
    match find::<Blog>(state.store.as_ref(), BLOGS, "slug", slug.as_str()).await {
        Ok(blogs) => match blogs.into_iter().next() {
            Some(blog) => views::blog_post(&blog.data).into_response(),
            None => (StatusCode::NOT_FOUND, views::not_found("Post")).into_response(),
        },
        Err(e) => {
            error!("Failed to load blog {slug}: {e}");
            let message = "This post could not be loaded right now.";
            (StatusCode::BAD_GATEWAY, views::error_page(StatusCode::BAD_GATEWAY, message))
                .into_response()
        }
    }
}

pub async fn product_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    detail_page(&state, &headers, TargetKind::Product, PRODUCTS, &id, views::product_page).await
}

pub async fn worker_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    detail_page(&state, &headers, TargetKind::Worker, WORKERS, &id, views::worker_page).await
}

/// Shareable detail page. The session's deep-link flag is checked before the document is
/// fetched; a session that already tried never gets another plan. A session is only created
/// once a plan is actually handed out.
async fn detail_page<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    kind: TargetKind,
    collection: &str,
    id: &str,
    render: impl FnOnce(&T, Option<&HandoffPlan>) -> axum::response::Html<String>,
) -> Response {
    let session_id = state.sessions.current(headers);
    let already_tried = session_id.as_deref().is_some_and(|session_id| {
        SessionTriedFlag::new(state.sessions.clone(), session_id).is_tried()
    });

    let document = match fetch::<T>(state.store.as_ref(), collection, id).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            let what = match kind {
                TargetKind::Product => "Product",
                TargetKind::Worker => "Worker",
            };
            return (StatusCode::NOT_FOUND, views::not_found(what)).into_response();
        }
        Err(e) => {
            error!("Failed to load {collection}/{id}: {e}");
            let message = "This page could not be loaded right now.";
            return (StatusCode::BAD_GATEWAY, views::error_page(StatusCode::BAD_GATEWAY, message))
                .into_response();
        }
    };

    if already_tried {
        return render(&document.data, None).into_response();
    }

    let (session_id, new_cookie) = match session_id {
        Some(session_id) => (session_id, None),
        None => {
            let session_id = state.sessions.create();
            let cookie = session_cookie(SESSION_COOKIE, &session_id);
            (session_id, Some(cookie))
        }
    };

    let plan = SessionTriedFlag::new(state.sessions.clone(), &session_id)
        .claim()
        .then(|| {
            let attempt = DeepLinkAttempt::new(
                kind,
                id,
                &state.config.deep_link_scheme,
                &state.config.public_base_url,
            );
            HandoffPlan::new(&attempt, state.config.handoff)
        });

    let mut response = render(&document.data, plan.as_ref()).into_response();
    if let Some(cookie) = new_cookie {
        append_cookie(&mut response, &cookie);
    }

    response
}

pub async fn login_form_handler() -> impl IntoResponse {
    views::login(None)
}

#[derive(Deserialize)]
pub struct LoginForm {
    email: String,
    password: String,
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let user = match state.auth.sign_in(form.email.trim(), &form.password).await {
        Ok(user) => user,
        Err(AuthError::InvalidCredentials) => {
            return (
                StatusCode::UNAUTHORIZED,
                views::login(Some("Invalid email or password.")),
            )
                .into_response();
        }
        Err(e) => {
            error!("Sign-in failed: {e}");
            return (
                StatusCode::BAD_GATEWAY,
                views::login(Some("Sign-in failed, please try again.")),
            )
                .into_response();
        }
    };

    let store = state.store.authorized(&user.id_token);
    let role = match fetch::<UserRecord>(store.as_ref(), USERS, &user.uid).await {
        Ok(Some(record)) => record.data.role,
        Ok(None) => {
            warn!("No user record for {}", user.uid);
            Role::default()
        }
        Err(e) => {
            error!("Failed to load user record {}: {e}", user.uid);
            return (
                StatusCode::BAD_GATEWAY,
                views::login(Some("Your account could not be loaded, please try again.")),
            )
                .into_response();
        }
    };

    let destination = dashboard_path(&role);
    info!("{} signed in as {role}", user.uid);

    // Fresh id on sign-in; the deep-link flag carries over from the anonymous session.
    let previous = cookie_value(&headers, SESSION_COOKIE).and_then(|id| state.sessions.remove(&id));
    let session_id = state.sessions.insert(Session {
        signed_in: Some(SignedIn { user, role }),
        handoff_tried: previous.is_some_and(|previous| previous.handoff_tried),
        ..Session::default()
    });

    let mut response = Redirect::to(destination).into_response();
    append_cookie(&mut response, &session_cookie(SESSION_COOKIE, &session_id));

    response
}

pub async fn logout_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let mut handoff_tried = false;

    if let Some(session_id) = cookie_value(&headers, SESSION_COOKIE) {
        match sign_out(
            state.auth.as_ref(),
            &state.sessions,
            &session_id,
            state.config.sign_out_timeout,
        )
        .await
        {
            Ok(removed) => handoff_tried = removed.is_some_and(|session| session.handoff_tried),
            Err(e) => {
                error!("Sign-out failed: {e}");
                return e.into_response();
            }
        }
    }

    // The deep-link flag is per browser session and survives signing out.
    let carry = handoff_tried.then(|| {
        state.sessions.insert(Session {
            handoff_tried: true,
            ..Session::default()
        })
    });

    teardown_response(&headers, carry.as_deref())
}

/// Serves files uploaded to the memory backend.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Response {
    let Some(uploads) = &state.uploads else {
        return (StatusCode::NOT_FOUND, views::not_found("File")).into_response();
    };

    match uploads.get(&path).await {
        Some((content_type, bytes)) => ([(CONTENT_TYPE, content_type)], bytes).into_response(),
        None => (StatusCode::NOT_FOUND, views::not_found("File")).into_response(),
    }
}
