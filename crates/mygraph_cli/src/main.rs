//! CLI smoke entry point.
//!
//! # Responsibility
//! - Exercise `mygraph_core` end to end against the SQLite document backend.
//! - Keep output line-oriented for quick local sanity checks.
//!
//! Usage: `mygraph_cli [db_path] [headline]`

use mygraph_core::{
    core_version, default_log_level, init_logging, ItemStore, Principal, SqliteBackend,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_DB_FILE_NAME: &str = "mygraph.sqlite3";

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let db_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_DB_FILE_NAME));
    let headline = args.next();

    let log_dir = std::env::temp_dir().join("mygraph-logs");
    if let Err(err) = init_logging(default_log_level(), &log_dir.to_string_lossy()) {
        eprintln!("logging disabled: {err}");
    }

    println!("mygraph_core version={}", core_version());
    match run(db_path, headline).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    db_path: PathBuf,
    headline: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let principal = Principal::new("local", whoami());
    let backend = Arc::new(SqliteBackend::open(&db_path, principal));
    let store = ItemStore::new(backend);

    store.initialize().await?;
    store.sign_in().await?;
    println!(
        "db={} items_loaded={}",
        db_path.display(),
        store.items_loaded()
    );

    if let Some(headline) = headline {
        let id = store.create_item(headline).await?;
        println!("created id={id}");
    }

    let mut items = store.search("").into_values().collect::<Vec<_>>();
    items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    for mut item in items {
        let state = item.state();
        println!(
            "{}\t{:?}\t{:?}\t{}",
            item.id(),
            state,
            item.privacy,
            item.short_headline()
        );
    }
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local user".to_string())
}
