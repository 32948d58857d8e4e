//! Role dashboards. Every handler starts with [`require_role`]; anyone else is sent home.
//! Reads and writes then go out with the signed-in user's ID token.
use std::sync::Arc;

use axum::{
    Form,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use bank::{
    BankError, Document, DocumentStore, Fields,
    collections::{CATEGORIES, ORDERS, PRODUCTS, USERS, WORKERS, fetch, fetch_all, find, insert},
    models::{Category, Order, OrderStatus, Product, Role, UserRecord, Worker},
    storage::store_upload,
    timestamp::Timestamp,
    workers::{NewWorker, create_worker},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    auth::AuthError,
    roles::require_role,
    session::SignedIn,
    state::{AppState, UserBackends},
    utils::{MultipartForm, read_multipart},
    views,
};

const PRODUCT_IMAGE_PREFIX: &str = "products";

macro_rules! signed_in_as {
    ($state:expr, $headers:expr, $role:expr) => {{
        let signed_in = match require_role(&$state.sessions, &$headers, $role) {
            Ok(signed_in) => signed_in,
            Err(redirect) => return redirect.into_response(),
        };
        match $state.acting_as(&signed_in).await {
            Ok(backends) => (signed_in, backends),
            Err(e) => return credentials_failed(&$state, &$headers, e),
        }
    }};
}

fn credentials_failed(state: &AppState, headers: &HeaderMap, e: AuthError) -> Response {
    match e {
        AuthError::SessionExpired => {
            if let Some(id) = state.sessions.current(headers) {
                state.sessions.update(&id, |session| session.signed_in = None);
            }
            info!("Sign-in expired, asking for credentials again");
            Redirect::to("/login").into_response()
        }
        e => {
            error!("Failed to get an ID token: {e}");
            let message = "Your account could not be verified right now.";
            (StatusCode::BAD_GATEWAY, views::error_page(StatusCode::BAD_GATEWAY, message))
                .into_response()
        }
    }
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Fields {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

// Estore

async fn render_estore(
    store: &dyn DocumentStore,
    owner: &SignedIn,
    message: Option<&str>,
) -> Response {
    match find::<Product>(store, PRODUCTS, "store_id", owner.user.uid.as_str()).await {
        Ok(mut products) => {
            products.sort_by(|a, b| b.data.created_at.cmp(&a.data.created_at));
            views::estore_dashboard(&products, message).into_response()
        }
        Err(e) => {
            error!("Failed to load products for {}: {e}", owner.user.uid);
            views::estore_dashboard(&[], Some("Your products could not be loaded right now."))
                .into_response()
        }
    }
}

pub async fn estore_dashboard_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let (owner, backends) = signed_in_as!(state, headers, Role::Estore);

    render_estore(backends.store.as_ref(), &owner, None).await
}

async fn add_product(
    backends: &UserBackends,
    owner: &SignedIn,
    mut form: MultipartForm,
) -> Result<String, String> {
    let name = form.text("name");
    if name.is_empty() {
        return Err("A product needs a name.".to_string());
    }

    let price = form
        .text("price")
        .parse::<f64>()
        .ok()
        .filter(|price| price.is_finite() && *price >= 0.0)
        .ok_or_else(|| "Price must be a positive number.".to_string())?;

    let image_url = match form.take_file("image") {
        Some(upload) => {
            let stored = store_upload(backends.storage.as_ref(), PRODUCT_IMAGE_PREFIX, upload)
                .await
                .map_err(|e| {
                    error!("Image upload failed: {e}");
                    "The image could not be uploaded.".to_string()
                })?;
            Some(stored.download_url)
        }
        None => None,
    };

    let product = Product {
        name,
        description: form.text("description"),
        price,
        image_url,
        store_id: owner.user.uid.clone(),
        created_at: Some(Timestamp::now()),
    };

    insert(backends.store.as_ref(), PRODUCTS, &product)
        .await
        .map_err(|e| {
            error!("Failed to create product: {e}");
            "The product could not be saved.".to_string()
        })
}

pub async fn create_product_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let (owner, backends) = signed_in_as!(state, headers, Role::Estore);

    let form = match read_multipart(multipart).await {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };

    match add_product(&backends, &owner, form).await {
        Ok(id) => {
            info!("{} added product {id}", owner.user.uid);
            Redirect::to("/estore/dashboard").into_response()
        }
        Err(message) => render_estore(backends.store.as_ref(), &owner, Some(&message)).await,
    }
}

pub async fn delete_product_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let (owner, backends) = signed_in_as!(state, headers, Role::Estore);
    let store = backends.store.as_ref();

    let result = match fetch::<Product>(store, PRODUCTS, &id).await {
        Ok(Some(product)) if product.data.store_id == owner.user.uid => {
            store.delete(PRODUCTS, &id).await
        }
        Ok(Some(_)) => {
            warn!("{} tried to delete product {id} of another store", owner.user.uid);
            return Redirect::to("/estore/dashboard").into_response();
        }
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => Redirect::to("/estore/dashboard").into_response(),
        Err(e) => {
            error!("Failed to delete product {id}: {e}");
            render_estore(store, &owner, Some("The product could not be deleted.")).await
        }
    }
}

// Skilled worker

async fn own_worker(
    store: &dyn DocumentStore,
    worker: &SignedIn,
) -> Result<Option<Document<Worker>>, BankError> {
    let email = worker.user.email.trim().to_lowercase();

    Ok(find::<Worker>(store, WORKERS, "email", email)
        .await?
        .into_iter()
        .next())
}

async fn render_worker(
    store: &dyn DocumentStore,
    worker: &SignedIn,
    message: Option<&str>,
) -> Response {
    match own_worker(store, worker).await {
        Ok(profile) => views::worker_dashboard(profile.as_ref(), message).into_response(),
        Err(e) => {
            error!("Failed to load worker profile for {}: {e}", worker.user.email);
            views::worker_dashboard(None, Some("Your profile could not be loaded right now."))
                .into_response()
        }
    }
}

pub async fn worker_dashboard_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let (worker, backends) = signed_in_as!(state, headers, Role::Worker);

    render_worker(backends.store.as_ref(), &worker, None).await
}

#[derive(Deserialize)]
pub struct ProfileForm {
    #[serde(default)]
    phone: String,
    #[serde(default)]
    description: String,
}

pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<ProfileForm>,
) -> Response {
    let (worker, backends) = signed_in_as!(state, headers, Role::Worker);
    let store = backends.store.as_ref();

    let result = match own_worker(store, &worker).await {
        Ok(Some(profile)) => {
            let changes = fields([
                ("phone", Value::String(form.phone.trim().to_string())),
                ("description", Value::String(form.description.trim().to_string())),
            ]);
            store.update(WORKERS, &profile.id, changes).await
        }
        Ok(None) => return render_worker(store, &worker, Some("No profile to update.")).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => Redirect::to("/skilled-worker/dashboard").into_response(),
        Err(e) => {
            error!("Failed to update profile of {}: {e}", worker.user.email);
            render_worker(store, &worker, Some("Your profile could not be saved.")).await
        }
    }
}

// Driver

async fn render_driver(
    store: &dyn DocumentStore,
    driver: &SignedIn,
    message: Option<&str>,
) -> Response {
    match find::<Order>(store, ORDERS, "driver_id", driver.user.uid.as_str()).await {
        Ok(mut orders) => {
            orders.sort_by_key(|order| order.data.status == OrderStatus::Delivered);
            views::driver_dashboard(&orders, message).into_response()
        }
        Err(e) => {
            error!("Failed to load orders for {}: {e}", driver.user.uid);
            views::driver_dashboard(&[], Some("Your deliveries could not be loaded right now."))
                .into_response()
        }
    }
}

pub async fn driver_dashboard_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let (driver, backends) = signed_in_as!(state, headers, Role::Driver);

    render_driver(backends.store.as_ref(), &driver, None).await
}

pub async fn order_delivered_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let (driver, backends) = signed_in_as!(state, headers, Role::Driver);
    let store = backends.store.as_ref();
    let uid = driver.user.uid.as_str();

    let result = match fetch::<Order>(store, ORDERS, &id).await {
        Ok(Some(order)) if order.data.driver_id.as_deref() == Some(uid) => {
            let changes = fields([(
                "status",
                Value::String(OrderStatus::Delivered.as_str().to_string()),
            )]);
            store.update(ORDERS, &id, changes).await
        }
        Ok(_) => {
            let message = "That delivery is not assigned to you.";
            return render_driver(store, &driver, Some(message)).await;
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => Redirect::to("/driver/dashboard").into_response(),
        Err(e) => {
            error!("Failed to update order {id}: {e}");
            render_driver(store, &driver, Some("The delivery could not be updated.")).await
        }
    }
}

// Admin

async fn render_admin(store: &dyn DocumentStore, message: Option<&str>) -> Response {
    let loaded = async {
        let workers = fetch_all::<Worker>(store, WORKERS).await?;
        let categories = fetch_all::<Category>(store, CATEGORIES).await?;
        let users = fetch_all::<UserRecord>(store, USERS).await?;

        Ok::<_, BankError>((workers, categories, users))
    }
    .await;

    match loaded {
        Ok((workers, categories, users)) => {
            views::admin_dashboard(&workers, &categories, &users, message).into_response()
        }
        Err(e) => {
            error!("Failed to load admin dashboard: {e}");
            let message = "The dashboard could not be loaded right now.";
            (StatusCode::BAD_GATEWAY, views::admin_dashboard(&[], &[], &[], Some(message)))
                .into_response()
        }
    }
}

pub async fn admin_dashboard_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let (_, backends) = signed_in_as!(state, headers, Role::Admin);

    render_admin(backends.store.as_ref(), None).await
}

fn new_worker(mut form: MultipartForm) -> Result<NewWorker, &'static str> {
    let new_worker = NewWorker {
        name: form.text("name"),
        email: form.text("email"),
        phone: form.text("phone"),
        category: form.text("category"),
        description: form.text("description"),
        photo: form.take_file("photo"),
    };

    if new_worker.name.is_empty() || new_worker.email.is_empty() || new_worker.category.is_empty() {
        return Err("Name, email and category are required.");
    }

    Ok(new_worker)
}

pub async fn create_worker_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let (_, backends) = signed_in_as!(state, headers, Role::Admin);
    let store = backends.store.as_ref();

    let form = match read_multipart(multipart).await {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };
    let new_worker = match new_worker(form) {
        Ok(new_worker) => new_worker,
        Err(message) => return render_admin(store, Some(message)).await,
    };

    match create_worker(store, backends.storage.as_ref(), new_worker).await {
        Ok(_) => Redirect::to("/admin/dashboard").into_response(),
        Err(e) => {
            error!("Failed to create worker: {e}");
            render_admin(store, Some("The worker could not be created.")).await
        }
    }
}

pub async fn delete_worker_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let (_, backends) = signed_in_as!(state, headers, Role::Admin);
    let store = backends.store.as_ref();

    match store.delete(WORKERS, &id).await {
        Ok(()) => {
            info!("Deleted worker {id}");
            Redirect::to("/admin/dashboard").into_response()
        }
        Err(e) => {
            error!("Failed to delete worker {id}: {e}");
            render_admin(store, Some("The worker could not be deleted.")).await
        }
    }
}
