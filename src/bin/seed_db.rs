//! Build the seed database bundled with the app.
//!
//! Fetches one Bible version, one commentary language, and one topics
//! language from the live API and writes them into a fresh database with
//! the app's offline schema. Re-run when backend content changes and
//! commit the resulting file so app builds include it.
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use versemate_core::api::ApiClient;
use versemate_core::auth::StaticTokenProvider;
use versemate_core::content::ContentService;
use versemate_core::db::repo;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Build the bundled seed database from the live VerseMate API"
)]
struct Args {
    /// Output path for the seed database
    #[arg(long, default_value = "assets/data/versemate-seed.db")]
    output: PathBuf,

    /// API base URL
    #[arg(long, default_value = "https://api.versemate.org")]
    api_base: String,

    /// Bible version to bundle
    #[arg(long, default_value = "NASB1995")]
    bible: String,

    /// Commentary language to bundle
    #[arg(long, default_value = "en-US")]
    commentaries: String,

    /// Topics language to bundle
    #[arg(long, default_value = "en")]
    topics: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    if args.output.exists() {
        std::fs::remove_file(&args.output)?;
        info!(path = %args.output.display(), "removed existing seed database");
    }

    let base_url = reqwest::Url::parse(&args.api_base)?;
    let tokens = Arc::new(StaticTokenProvider::anonymous());
    // Offline content endpoints are public; generous timeout for the big
    // bundle responses.
    let api = ApiClient::with_base_url(tokens, base_url, Duration::from_secs(120));

    let database_url = format!("sqlite://{}", args.output.display());
    let pool = repo::init_pool(&database_url).await?;
    repo::run_migrations(&pool).await?;

    let content = ContentService::new(pool.clone(), Arc::new(api));

    info!("fetching offline manifest");
    let manifest = content.manifest().await?;

    let bible = content.download_bible(&manifest, &args.bible).await?;
    let commentary = content
        .download_commentaries(&manifest, &args.commentaries)
        .await?;
    let topics = content.download_topics(&manifest, &args.topics).await?;

    info!("vacuuming database");
    sqlx::query("VACUUM").execute(&pool).await?;
    pool.close().await;

    let size_bytes = std::fs::metadata(&args.output)?.len();
    info!(
        path = %args.output.display(),
        verses = bible.rows,
        commentaries = commentary.rows,
        topic_rows = topics.rows,
        size_bytes,
        "seed database complete"
    );
    Ok(())
}
