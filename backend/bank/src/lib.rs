//! # Bank
//!
//! Data-access boundary for HillsGo. Every page and the importer go through here
//! to reach the document store and the object store.
//!
//! ## Collections
//!
//! - `users/{uid}`: email, name, role, optional worker id
//! - `products/{id}`: owned by a store through `store_id`
//! - `workers/{id}`: skilled-worker profiles, looked up by email
//! - `categories/{slug}`: one document per category, id is the slug
//! - `blogs/{id}`: looked up by slug
//! - `orders/{id}`: assigned to drivers through `driver_id`
//!
//! ## Backends
//!
//! - [`firestore::Firestore`] and [`storage::FirebaseStorage`] talk REST to the managed services
//! - [`memory::MemoryStore`] and [`memory::MemoryStorage`] keep everything in process, used by
//!   development mode and tests
//!
//! ## Timestamps
//!
//! Providers hand back timestamps in several shapes. [`timestamp::Timestamp`] is the single
//! conversion point; models never look at raw `seconds` fields themselves.

pub mod collections;
pub mod error;
pub mod firestore;
pub mod memory;
pub mod models;
pub mod storage;
pub mod store;
pub mod timestamp;
pub mod utils;
pub mod workers;

pub use error::BankError;
pub use store::{Document, DocumentStore, Fields, RawDocument};
pub use storage::{ObjectStorage, StoredObject, Upload};
pub use timestamp::Timestamp;
