//! Script to recompute every representative's average score from its ratings.
//!
//! Repairs drift after manual SQL edits. Each target is recomputed in its own
//! locked transaction, so the script is safe to run against a live service.

use anyhow::Context;
use dotenvy::dotenv;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use rep_callback_api::db::Database;
use rep_callback_api::pg_store::PgStore;
use rep_callback_api::rating_aggregator::RatingAggregator;
use rep_callback_api::store::RatingStore;

/// Main entry point for the recompute script.
///
/// Pass `--dry-run` to list the targets without writing anything.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let dry_run = env::args().any(|arg| arg == "--dry-run");

    // Database connection
    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .context("DATABASE_URL must be set")?;
    let db = Database::with_options(&database_url, 5, Duration::from_secs(10)).await?;

    let store = Arc::new(PgStore::new(db.pool.clone(), Duration::from_secs(30)));
    let aggregator = RatingAggregator::new(store.clone(), store.clone(), Duration::from_secs(60));

    let targets = store.all_targets().await?;
    tracing::info!(
        "Connected to database. Recomputing averages for {} targets{}",
        targets.len(),
        if dry_run { " (dry run)" } else { "" }
    );

    let mut failed = 0usize;
    for target in targets {
        if dry_run {
            println!("{}", target);
            continue;
        }
        match aggregator.recompute(target).await {
            Ok(average) => tracing::debug!("{} -> {:?}", target, average),
            Err(e) => {
                failed += 1;
                tracing::error!("Failed to recompute {}: {}", target, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} targets could not be recomputed", failed);
    }

    tracing::info!("Recompute complete.");
    Ok(())
}
