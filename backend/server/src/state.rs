use std::sync::Arc;

use bank::{
    DocumentStore, ObjectStorage,
    collections::{USERS, to_fields},
    firestore::Firestore,
    memory::{MemoryStorage, MemoryStore},
    models::{Role, UserRecord},
    storage::FirebaseStorage,
    timestamp::Timestamp,
};
use reqwest::Client;
use tracing::info;

use super::{
    auth::{AuthError, AuthProvider, FirebaseAuth, MemoryAuth},
    config::{Backend, Config},
    error::AppError,
    session::{SessionStore, SignedIn},
};

pub struct UserBackends {
    pub store: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn ObjectStorage>,
}

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub auth: Arc<dyn AuthProvider>,
    pub sessions: SessionStore,
    /// Set in memory mode so uploaded files can be served back.
    pub uploads: Option<Arc<MemoryStorage>>,
}

impl AppState {
    pub async fn new() -> Result<Arc<Self>, AppError> {
        let config = Config::load()?;

        match config.backend {
            Backend::Firebase => {
                info!("Using Firebase project {}", config.firebase_project_id);
                let client = Client::new();

                let store = Arc::new(Firestore::new(
                    client.clone(),
                    &config.firebase_project_id,
                    &config.firebase_api_key,
                ));
                let storage = Arc::new(FirebaseStorage::new(
                    client.clone(),
                    &config.firebase_storage_bucket,
                ));
                let auth = Arc::new(FirebaseAuth::new(client, &config.firebase_api_key));

                Ok(Self::with_backends(config, store, storage, auth))
            }
            Backend::Memory => {
                info!("Using in-memory backends, data is lost on restart");
                let store = Arc::new(MemoryStore::default());
                let uploads = Arc::new(MemoryStorage::new(&format!(
                    "{}/uploads",
                    config.public_base_url
                )));
                let auth = Arc::new(MemoryAuth::default());

                if let Some((email, password)) = &config.dev_admin {
                    let uid = auth.register(email, password);
                    let admin = UserRecord {
                        email: email.clone(),
                        name: "Admin".to_string(),
                        role: Role::Admin,
                        worker_id: None,
                        created_at: Some(Timestamp::now()),
                    };
                    store.set(USERS, &uid, to_fields(&admin)?).await?;
                    info!("Seeded admin account {email}");
                }

                Ok(Arc::new(Self {
                    sessions: SessionStore::new(config.session_idle_ttl),
                    config,
                    store,
                    storage: uploads.clone(),
                    auth,
                    uploads: Some(uploads),
                }))
            }
        }
    }

    pub fn with_backends(
        config: Config,
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        auth: Arc<dyn AuthProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: SessionStore::new(config.session_idle_ttl),
            config,
            store,
            storage,
            auth,
            uploads: None,
        })
    }

    /// Store and storage handles that act with the signed-in user's credentials.
    pub async fn acting_as(&self, signed_in: &SignedIn) -> Result<UserBackends, AuthError> {
        let id_token = self.auth.id_token(&signed_in.user).await?;

        Ok(UserBackends {
            store: self.store.authorized(&id_token),
            storage: self.storage.authorized(&id_token),
        })
    }
}
