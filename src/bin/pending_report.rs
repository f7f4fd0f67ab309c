//! Lists responses whose enrichment never committed.
//!
//! Usage: `pending_report [minutes]` (default 30). Rows older than the cutoff
//! that are still `pending` lost their single enrichment attempt.

use chrono::{Duration, Utc};
use dotenvy::dotenv;
use feedback_api::db::Database;
use feedback_api::db_storage::PgStore;
use feedback_api::store::ResponseStore;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let database_url =
        env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let minutes: i64 = match env::args().nth(1) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("minutes must be a whole number, got '{}'", raw))?,
        None => 30,
    };

    let db = Database::new(&database_url).await?;
    let store = PgStore::new(db.pool.clone());

    let cutoff = Utc::now() - Duration::minutes(minutes);
    let stale = store.stale_pending(cutoff).await?;

    println!(
        "Found {} responses pending enrichment for more than {} minutes:",
        stale.len(),
        minutes
    );
    for r in &stale {
        println!(
            "- {} business={} created={} audio={}",
            r.id,
            r.business_id,
            r.created_at.to_rfc3339(),
            r.audio_url.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
