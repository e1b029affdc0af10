use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hsof_cache::UrlCache;
use hsof_core::{SystemClock, UrlNormalizer};

#[derive(Debug, Parser)]
#[command(name = "hsof-cli")]
#[command(about = "URL cache and recheck queue tooling")]
struct Cli {
    /// SQLite database path for the URL cache.
    #[arg(long, default_value = "hsof.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Per-status totals and the due-now queue depth.
    Stats,
    /// URLs currently due for recheck, oldest first.
    Pending {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Inspect one cache entry.
    Show { url: String },
    /// Delete stale failed/blocked/invalid entries.
    Cleanup {
        #[arg(long, default_value_t = 90)]
        older_than_days: u32,
    },
    /// Print the canonical form of a URL.
    Normalize { url: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Normalize { url } = &cli.command {
        println!("{}", UrlNormalizer.normalize(url));
        return Ok(());
    }

    let cache = UrlCache::open(&cli.db, UrlNormalizer, Arc::new(SystemClock))?;
    match cli.command {
        Commands::Stats => {
            let stats = cache.stats()?;
            println!("entries: {}  due now: {}", stats.total, stats.due_now);
            for (status, count) in stats.by_status {
                println!("  {status}: {count}");
            }
        }
        Commands::Pending { limit } => {
            for (url, status) in cache.get_pending_rechecks(limit)? {
                println!("{status}\t{url}");
            }
        }
        Commands::Show { url } => match cache.get(&url)? {
            Some(entry) => {
                println!("url:          {}", entry.url);
                println!("domain:       {}", entry.domain);
                println!("status:       {}", entry.status);
                println!("first seen:   {}", entry.first_seen);
                println!("last checked: {}", entry.last_checked);
                match entry.next_recheck {
                    Some(at) => println!("next recheck: {at}"),
                    None => println!("next recheck: never"),
                }
                println!(
                    "checks:       {} ({} successful)",
                    entry.check_count, entry.success_count
                );
                if let Some(notes) = entry.notes {
                    println!("notes:        {notes}");
                }
            }
            None => println!("not cached"),
        },
        Commands::Cleanup { older_than_days } => {
            let deleted = cache.clear_old_entries(older_than_days)?;
            println!("deleted {deleted} stale entries");
        }
        Commands::Normalize { .. } => unreachable!("handled above"),
    }

    Ok(())
}
