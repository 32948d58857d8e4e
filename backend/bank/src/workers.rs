//! Worker creation.
//!
//! A worker lives in three places at once:
//! - `workers/{id}`: the profile itself
//! - `categories/{slug}`: created the first time a category is used, never duplicated
//! - `users/{uid}`: any account with the worker's email gets `role = worker` and the worker id
use serde_json::Value;
use tracing::info;

use crate::{
    collections::{CATEGORIES, USERS, WORKERS, insert, to_fields},
    error::BankError,
    models::{Category, Role, Worker},
    storage::{ObjectStorage, Upload, store_upload},
    store::{DocumentStore, Fields},
    timestamp::Timestamp,
    utils::slugify,
};

pub const PHOTO_PREFIX: &str = "workers";

#[derive(Debug, Clone, PartialEq)]
pub struct NewWorker {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub category: String,
    pub description: String,
    pub photo: Option<Upload>,
}

pub async fn create_worker(
    store: &dyn DocumentStore,
    storage: &dyn ObjectStorage,
    new_worker: NewWorker,
) -> Result<String, BankError> {
    let photo_url = match new_worker.photo {
        Some(upload) => Some(store_upload(storage, PHOTO_PREFIX, upload).await?.download_url),
        None => None,
    };

    let worker = Worker {
        name: new_worker.name.trim().to_string(),
        email: new_worker.email.trim().to_lowercase(),
        phone: new_worker.phone.trim().to_string(),
        category: new_worker.category.trim().to_string(),
        description: new_worker.description,
        photo_url,
        created_at: Some(Timestamp::now()),
    };

    let new_category = ensure_category(store, &worker.category).await?;
    let worker_id = insert(store, WORKERS, &worker).await?;
    let linked = link_users(store, &worker.email, &worker_id).await?;

    info!(
        "Created worker {worker_id} in {} (new category: {new_category}, {linked} linked)",
        worker.category
    );

    Ok(worker_id)
}

/// Document id for a category. Names with no letters or digits get a hex id of their bytes.
pub fn category_id(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let slug = slugify(name);
    if !slug.is_empty() {
        return Some(slug);
    }

    let hex: String = name.bytes().map(|byte| format!("{byte:02x}")).collect();
    Some(format!("x-{hex}"))
}

/// Creates `categories/{id}` if it does not exist yet. Returns whether it was created.
pub async fn ensure_category(store: &dyn DocumentStore, name: &str) -> Result<bool, BankError> {
    let Some(id) = category_id(name) else {
        return Err(BankError::Codec("category name is empty".to_string()));
    };

    if store.get(CATEGORIES, &id).await?.is_some() {
        return Ok(false);
    }

    let category = Category {
        name: name.trim().to_string(),
        slug: id.clone(),
        created_at: Some(Timestamp::now()),
    };
    store.set(CATEGORIES, &id, to_fields(&category)?).await?;

    Ok(true)
}

async fn link_users(
    store: &dyn DocumentStore,
    email: &str,
    worker_id: &str,
) -> Result<usize, BankError> {
    let users = store
        .find_eq(USERS, "email", &Value::String(email.to_string()))
        .await?;

    for user in &users {
        let mut fields = Fields::new();
        fields.insert("role".to_string(), Value::String(Role::Worker.to_string()));
        fields.insert("worker_id".to_string(), Value::String(worker_id.to_string()));

        store.update(USERS, &user.id, fields).await?;
    }

    Ok(users.len())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::{
        collections::{fetch, fetch_all},
        memory::{MemoryStorage, MemoryStore},
        models::UserRecord,
    };

    fn plumber(email: &str) -> NewWorker {
        NewWorker {
            name: "Jean".to_string(),
            email: email.to_string(),
            phone: "0788".to_string(),
            category: "Plumbing".to_string(),
            description: String::new(),
            photo: None,
        }
    }

    #[tokio::test]
    async fn test_category_created_once() {
        let store = MemoryStore::default();
        let storage = MemoryStorage::default();

        create_worker(&store, &storage, plumber("a@hills.go")).await.unwrap();
        create_worker(&store, &storage, plumber("b@hills.go")).await.unwrap();

        let categories = fetch_all::<Category>(&store, CATEGORIES).await.unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].id, "plumbing");
        assert_eq!(store.len(WORKERS).await, 2);
    }

    #[tokio::test]
    async fn test_ensure_category_reports_creation() {
        let store = MemoryStore::default();

        assert!(ensure_category(&store, "Home Cleaning").await.unwrap());
        assert!(!ensure_category(&store, "home cleaning").await.unwrap());
        assert!(ensure_category(&store, "???").await.unwrap());
        assert!(store.get(CATEGORIES, "x-3f3f3f").await.unwrap().is_some());
        assert!(ensure_category(&store, "  ").await.is_err());
    }

    #[tokio::test]
    async fn test_categories_in_any_script_stay_distinct() {
        let store = MemoryStore::default();
        let storage = MemoryStorage::default();

        for category in ["Électricité", "水道", "C++", "C"] {
            let mut new_worker = plumber("d@hills.go");
            new_worker.category = category.to_string();
            create_worker(&store, &storage, new_worker).await.unwrap();
        }

        let mut ids: Vec<String> = fetch_all::<Category>(&store, CATEGORIES)
            .await
            .unwrap()
            .into_iter()
            .map(|category| category.id)
            .collect();
        ids.sort();
        assert_eq!(ids, ["c", "c-plus-plus", "électricité", "水道"]);
    }

    #[tokio::test]
    async fn test_empty_category_writes_nothing() {
        let store = MemoryStore::default();
        let storage = MemoryStorage::default();
        let mut new_worker = plumber("e@hills.go");
        new_worker.category = " ".to_string();

        assert!(create_worker(&store, &storage, new_worker).await.is_err());
        assert_eq!(store.len(WORKERS).await, 0);
        assert_eq!(store.len(CATEGORIES).await, 0);
    }

    #[tokio::test]
    async fn test_links_existing_account() {
        let store = MemoryStore::default();
        let storage = MemoryStorage::default();
        store
            .set(
                USERS,
                "uid-1",
                to_fields(&json!({"email": "jean@hills.go", "role": "customer"})).unwrap(),
            )
            .await
            .unwrap();

        let worker_id = create_worker(&store, &storage, plumber(" Jean@Hills.go "))
            .await
            .unwrap();

        let user = fetch::<UserRecord>(&store, USERS, "uid-1").await.unwrap().unwrap();
        assert_eq!(user.data.role, Role::Worker);
        assert_eq!(user.data.worker_id.as_deref(), Some(worker_id.as_str()));
    }

    #[tokio::test]
    async fn test_photo_uploaded() {
        let store = MemoryStore::default();
        let storage = MemoryStorage::default();
        let mut new_worker = plumber("c@hills.go");
        new_worker.photo = Some(Upload {
            file_name: "face.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: Bytes::from_static(b"png"),
        });

        let id = create_worker(&store, &storage, new_worker).await.unwrap();
        let worker = fetch::<Worker>(&store, WORKERS, &id).await.unwrap().unwrap();
        let url = worker.data.photo_url.unwrap();

        let path = url.trim_start_matches("memory://objects/");
        assert!(path.starts_with("workers/"));
        assert!(storage.get(path).await.is_some());
    }
}
