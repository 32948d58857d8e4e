use std::path::{Path, PathBuf};

use anyhow::Result;
use bank::{firestore::Firestore, storage::FirebaseStorage};
use clap::{Parser, Subcommand};
use reqwest::Client;

use process::{
    import_blogs, import_workers,
    models::{BlogEntry, WorkerEntry},
    utils::read_entries,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "FIREBASE_PROJECT_ID")]
    project_id: String,

    #[arg(long, env = "FIREBASE_STORAGE_BUCKET", default_value = "")]
    bucket: String,

    #[arg(long, env = "FIREBASE_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Parse and report without writing anything.
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import workers from a JSON array
    Workers { file: PathBuf },
    /// Import blog posts from a JSON array
    Blogs { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let client = Client::new();
    let store = Firestore::new(client.clone(), &args.project_id, &args.api_key);

    let summary = match &args.command {
        Command::Workers { file } => {
            let entries: Vec<WorkerEntry> = read_entries(file)?;
            println!("Loaded Workers: {}\n", entries.len());

            let storage = FirebaseStorage::new(client, &args.bucket);
            let base = file.parent().unwrap_or(Path::new("."));
            import_workers(&store, &storage, entries, base, args.dry_run).await?
        }
        Command::Blogs { file } => {
            let entries: Vec<BlogEntry> = read_entries(file)?;
            println!("Loaded Blogs: {}\n", entries.len());

            import_blogs(&store, entries, args.dry_run).await?
        }
    };

    println!("Created: {}", summary.created);
    println!("Skipped: {}", summary.skipped);

    Ok(())
}
