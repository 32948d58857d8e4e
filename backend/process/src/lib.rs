//! # Importer
//!
//! Bulk-loads HillsGo data from JSON files.
//!
//! ## Workers
//! A JSON array of `{ name, email, phone?, category, description?, photo? }`. Each entry goes
//! through [`bank::workers::create_worker`], so the photo is uploaded, the category is created
//! when missing and matching user accounts become workers.
//!
//! ## Blogs
//! A JSON array of `{ title, slug?, body?, cover_url?, published_at? }`. Without a slug one is
//! derived from the title. Entries whose slug already exists are skipped, so re-running an
//! import is harmless.
use std::path::Path;

use anyhow::{Context, Result, bail};
use bank::{
    DocumentStore, ObjectStorage,
    collections::{BLOGS, find, insert},
    models::Blog,
    utils::slugify,
    workers::{NewWorker, create_worker},
};

pub mod models;
pub mod utils;

use models::{BlogEntry, Summary, WorkerEntry};
use utils::{progress_bar, read_upload, resolve};

fn new_worker(entry: WorkerEntry, base: &Path) -> Result<NewWorker> {
    if entry.name.trim().is_empty() || entry.email.trim().is_empty() {
        bail!("Worker entries need a name and an email");
    }
    if entry.category.trim().is_empty() {
        bail!("Worker {} has no category", entry.name);
    }

    let photo = entry
        .photo
        .map(|photo| read_upload(&resolve(base, &photo)))
        .transpose()?;

    Ok(NewWorker {
        name: entry.name,
        email: entry.email,
        phone: entry.phone,
        category: entry.category,
        description: entry.description,
        photo,
    })
}

/// Creates every worker in `entries`. Photo paths are resolved against `base`.
pub async fn import_workers(
    store: &dyn DocumentStore,
    storage: &dyn ObjectStorage,
    entries: Vec<WorkerEntry>,
    base: &Path,
    dry_run: bool,
) -> Result<Summary> {
    let pb = progress_bar(entries.len())?;
    let mut summary = Summary::default();

    for entry in entries {
        pb.set_message(format!("Importing {}", entry.name));
        let new_worker = new_worker(entry, base)?;

        if dry_run {
            pb.println(format!(
                "Would create {} <{}> in {}",
                new_worker.name, new_worker.email, new_worker.category
            ));
        } else {
            let name = new_worker.name.clone();
            create_worker(store, storage, new_worker)
                .await
                .with_context(|| format!("Failed to create worker {name}"))?;
        }

        summary.created += 1;
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    Ok(summary)
}

fn blog(entry: BlogEntry) -> Result<Blog> {
    let slug = match entry.slug.as_deref().map(str::trim) {
        Some(slug) if !slug.is_empty() => slugify(slug),
        _ => slugify(&entry.title),
    };

    if slug.is_empty() {
        bail!("Blog \"{}\" has no usable slug", entry.title);
    }

    Ok(Blog {
        title: entry.title,
        slug,
        body: entry.body,
        cover_url: entry.cover_url,
        published_at: entry.published_at,
    })
}

/// Creates the blogs in `entries`, skipping slugs that already exist.
pub async fn import_blogs(
    store: &dyn DocumentStore,
    entries: Vec<BlogEntry>,
    dry_run: bool,
) -> Result<Summary> {
    let pb = progress_bar(entries.len())?;
    let mut summary = Summary::default();
    let mut seen = Vec::new();

    for entry in entries {
        let blog = blog(entry)?;
        pb.set_message(format!("Importing {}", blog.slug));

        let exists = seen.contains(&blog.slug)
            || !find::<Blog>(store, BLOGS, "slug", blog.slug.as_str())
                .await?
                .is_empty();

        if exists {
            pb.println(format!("Skipping {}, slug exists", blog.slug));
            summary.skipped += 1;
        } else {
            if dry_run {
                pb.println(format!("Would create {}", blog.slug));
            } else {
                insert(store, BLOGS, &blog)
                    .await
                    .with_context(|| format!("Failed to create blog {}", blog.slug))?;
            }
            seen.push(blog.slug);
            summary.created += 1;
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");
    Ok(summary)
}
