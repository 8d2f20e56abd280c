use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use page_content::{
    ArchiveEntry, ContentContext, FileEntry, JobPriority, JobRequestOptions, JobStatus, Page,
    Prefetcher,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thumbnail_cache::{Thumbnail, ThumbnailCache, ThumbnailType};
use thumbnail_db::ThumbnailDb;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod config;
mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "leafview")]
#[command(about = "Load book pages and manage the Leafview thumbnail cache")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the Leafview crates
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not read or write the thumbnail cache
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate thumbnails for every page of a folder
    Thumbs {
        /// Folder to treat as a book
        folder: PathBuf,
    },

    /// Load pages around a view position and report what was loaded
    Load {
        folder: PathBuf,

        /// First page of the view
        #[arg(short, long, default_value = "0")]
        index: usize,

        /// Pages shown at once
        #[arg(long, default_value = "1")]
        view: usize,

        /// Pages preloaded on each side of the view
        #[arg(long, default_value = "2")]
        ahead: usize,
    },

    /// Inspect or reset the thumbnail cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the cache location and entry count
    Stats,
    /// Remove every cached thumbnail
    Clear,
    /// Delete the cache database file
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.no_cache {
        config.cache.enabled = false;
    }

    match cli.command {
        Commands::Thumbs { folder } => generate_thumbnails(&config, &folder).await,
        Commands::Load {
            folder,
            index,
            view,
            ahead,
        } => load_pages(&config, &folder, index, view, ahead).await,
        Commands::Cache { action } => manage_cache(&config, action),
    }
}

fn open_context(config: &AppConfig) -> Result<Arc<ContentContext>> {
    let cache = ThumbnailCache::open(&config.cache).context("Failed to open thumbnail cache")?;
    let context = ContentContext::builder(config.content.clone())
        .thumbnail_cache(Arc::new(cache))
        .build()?;
    Ok(context)
}

/// Pages for the direct children of `folder`, in name order
fn open_book(folder: &Path, context: &Arc<ContentContext>) -> Result<Vec<Arc<Page>>> {
    let book = FileEntry::new(folder)
        .with_context(|| format!("Failed to open {}", folder.display()))?;
    if !book.is_directory() {
        anyhow::bail!("Path is not a directory: {}", folder.display());
    }
    let entries = book
        .entries()
        .with_context(|| format!("Failed to list {}", folder.display()))?;
    debug!(folder = %folder.display(), entries = entries.len(), "book opened");
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| Page::new(index, entry, context))
        .collect())
}

async fn generate_thumbnails(config: &AppConfig, folder: &Path) -> Result<()> {
    let context = open_context(config)?;
    let pages = open_book(folder, &context)?;
    if pages.is_empty() {
        println!("No pages found in {}", folder.display());
        return Ok(());
    }
    println!("🖼️  Generating thumbnails for {} pages", pages.len());

    let started = Instant::now();
    let handles = pages
        .iter()
        .map(|page| page.request_thumbnail(JobPriority::Thumbnail, JobRequestOptions::default()))
        .collect::<page_content::Result<Vec<_>>>()?;

    let token = CancellationToken::new();
    let mut failed = 0;
    for handle in &handles {
        if handle.wait(&token).await? != JobStatus::Completed {
            failed += 1;
        }
    }

    for page in &pages {
        println!(
            "  {:>4}  {:<40} {}",
            page.index(),
            page.entry().entry_name(),
            describe_thumbnail(&page.thumbnail())
        );
    }

    context.close();
    let stats = context.thumbnail_cache().stats();
    println!(
        "\n✅ {} thumbnails in {:.2}s ({} failed)",
        handles.len() - failed,
        started.elapsed().as_secs_f64(),
        failed
    );
    if context.thumbnail_cache().is_enabled() {
        println!(
            "Cache: {} hits, {} misses ({:.1}% hit rate), {} saved, {} dropped",
            stats.hits,
            stats.misses,
            stats.hit_rate_percent(),
            stats.saved,
            stats.dropped
        );
    }
    Ok(())
}

/// Encoded size for real thumbnails, the sentinel name otherwise
fn describe_thumbnail(thumbnail: &Thumbnail) -> String {
    match thumbnail.thumbnail_type() {
        Some(ThumbnailType::Unique) => match thumbnail.bytes() {
            Some(bytes) => format!("{} bytes", bytes.len()),
            None => "missing".to_string(),
        },
        Some(kind) => format!("{:?}", kind),
        None => "missing".to_string(),
    }
}

async fn load_pages(
    config: &AppConfig,
    folder: &Path,
    index: usize,
    view: usize,
    ahead: usize,
) -> Result<()> {
    let context = open_context(config)?;
    let pages = open_book(folder, &context)?;
    if pages.is_empty() {
        println!("No pages found in {}", folder.display());
        return Ok(());
    }

    let prefetcher = Prefetcher::new(pages, Arc::clone(&context), ahead);
    let plan = prefetcher.view(index, view.max(1))?;
    info!(
        start = plan.viewport_start,
        end = plan.viewport_end,
        "loading view"
    );

    let token = CancellationToken::new();
    prefetcher.wait_viewport(&token).await?;

    println!("📖 View {}..{}", plan.viewport_start, plan.viewport_end);
    for page_index in plan.viewport_start..plan.viewport_end {
        let page = &prefetcher.pages()[page_index];
        let content = page.content();
        let size = content
            .size()
            .map(|size| size.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>4}  {:<40} {:<8} {:>11}  {:>8} bytes",
            page_index,
            page.entry().entry_name(),
            content.kind(),
            size,
            content.content_memory_size()
        );
        if let Some(message) = content.message() {
            println!("        {}", message);
        }
    }

    let progress = prefetcher.progress();
    let pool = context.content_pool().stats();
    println!(
        "\nPrefetch: {}/{} pages ({:.0}%), {} failed",
        progress.completed,
        progress.total,
        progress.completion_percentage(),
        progress.failed
    );
    println!(
        "Memory: {} pages, {} / {} bytes",
        pool.count, pool.memory, pool.limit
    );

    prefetcher.cancel();
    context.close();
    Ok(())
}

fn manage_cache(config: &AppConfig, action: CacheAction) -> Result<()> {
    let path = config.cache.resolved_path()?;
    match action {
        CacheAction::Stats => {
            if !path.exists() {
                println!("No thumbnail cache at {}", path.display());
                return Ok(());
            }
            let db = ThumbnailDb::open(&path)?;
            println!("Cache: {}", path.display());
            println!("Thumbnails: {}", db.count()?);
            println!("Size: {} bytes", db.total_size()?);
        }
        CacheAction::Clear => {
            let db = ThumbnailDb::open(&path)?;
            db.clear()?;
            println!("🧹 Cleared {}", path.display());
        }
        CacheAction::Delete => {
            ThumbnailDb::delete_file(&path)?;
            println!("🗑️  Deleted {}", path.display());
        }
    }
    Ok(())
}
