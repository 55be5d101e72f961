use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use feedwatch::config::Config;
use feedwatch::creds::CredentialResolver;
use feedwatch::fetch::{FeedFetcher, FetchError};
use feedwatch::poller::{ConsoleSink, PollEngine};
use feedwatch::scheduler::PollScheduler;
use feedwatch::storage::{Database, DatabaseError, WatchOutcome};
use feedwatch::util::{humanize_since, parse_date};

#[derive(Parser, Debug)]
#[command(
    name = "feedwatch",
    about = "Polls RSS/Atom feeds and delivers new entries to chat rooms"
)]
struct Args {
    /// Path to the configuration file (skips the candidate-path search)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Destination room the command acts for
    #[arg(long, global = true, default_value = "console")]
    room: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the polling daemon
    Run,
    /// Watch a feed by URL for the current room
    Watch {
        url: String,
        /// Deliver entries published after this date; on an existing
        /// subscription this overwrites the watermark
        #[arg(long, value_name = "DATE")]
        date: Option<String>,
    },
    /// Stop watching a feed, by title or URL
    Ignore { feed: String },
    /// List the feeds watched in the current room
    List,
    /// Show or set the polling interval in seconds (0 or less disables polling)
    Interval { seconds: Option<i64> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let room = args.room.clone();

    let (config, config_path) = match &args.config {
        Some(path) => (Config::load(path)?, path.clone()),
        None => Config::discover()?,
    };

    let db_path = config.database_path.clone().unwrap_or_else(|| {
        config_path
            .parent()
            .map(|dir| dir.join("feedwatch.db"))
            .unwrap_or_else(|| PathBuf::from("feedwatch.db"))
    });
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of feedwatch appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    match args.command {
        Command::Run => run_daemon(config, db).await,
        Command::Watch { url, date } => watch(config, db, &room, &url, date.as_deref()).await,
        Command::Ignore { feed } => ignore(db, &room, &feed).await,
        Command::List => list(db, &room).await,
        Command::Interval { seconds } => interval(config, db, seconds).await,
    }
}

/// Run the polling daemon until interrupted.
async fn run_daemon(config: Config, db: Database) -> Result<()> {
    let fetcher = FeedFetcher::new().context("Failed to build the HTTP client")?;
    let resolver = CredentialResolver::new(config.credentials);
    let engine = Arc::new(PollEngine::new(
        db.clone(),
        fetcher,
        resolver,
        Arc::new(ConsoleSink),
    ));

    // A previously persisted `interval` command wins over the config file.
    let interval = db
        .interval_override()
        .await?
        .unwrap_or(config.interval_seconds);
    let scheduler = PollScheduler::new(engine, interval);

    scheduler.activate().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the shutdown signal")?;
    scheduler.deactivate();
    println!("Goodbye!");
    Ok(())
}

/// Register a watch: fetch the feed to discover its title, then subscribe
/// the room starting from the requested (or configured default) date.
async fn watch(
    config: Config,
    db: Database,
    room: &str,
    url: &str,
    date: Option<&str>,
) -> Result<()> {
    let start = match date {
        Some(raw) => parse_date(raw)?,
        None => parse_date(&config.start_date).with_context(|| {
            format!("Invalid start_date {:?} in configuration", config.start_date)
        })?,
    };

    let fetcher = FeedFetcher::new().context("Failed to build the HTTP client")?;
    let resolver = CredentialResolver::new(config.credentials);
    let rule = resolver.resolve(url);
    let feed = match fetcher.fetch(url, rule).await {
        Ok(feed) => feed,
        Err(e @ FetchError::Config(_)) => return Err(e.into()),
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Watch fetch failed");
            println!("Couldn't find a feed at {}", url);
            return Ok(());
        }
    };

    let requested_by = std::env::var("USER").ok();
    let outcome = db
        .watch_feed(
            &feed.title,
            url,
            room,
            requested_by.as_deref(),
            start,
            date.is_some(),
        )
        .await?;
    match outcome {
        WatchOutcome::Created if date.is_some() => {
            println!("watching [{}]({}) from {}", feed.title, url, start)
        }
        WatchOutcome::Created => println!("watching [{}]({})", feed.title, url),
        WatchOutcome::AlreadyWatching => {
            println!("I am already watching '{}' for this room.", feed.title)
        }
        WatchOutcome::WatermarkReset => {
            println!("watching [{}]({}) from {}", feed.title, url, start)
        }
    }
    Ok(())
}

async fn ignore(db: Database, room: &str, needle: &str) -> Result<()> {
    match db.unwatch_feed(needle, room).await? {
        Some(feed) => println!("Ignoring [{}]({}).", feed.title, feed.url),
        None => println!("What feed are you talking about?"),
    }
    Ok(())
}

async fn list(db: Database, room: &str) -> Result<()> {
    let feeds = db.feeds_for_destination(room).await?;
    if feeds.is_empty() {
        println!("You have 0 feeds. Add one!");
        return Ok(());
    }
    let now = Utc::now();
    for feed in feeds {
        println!(
            "[{}]({}) {}",
            feed.title,
            feed.url,
            humanize_since(feed.last_check, now)
        );
    }
    Ok(())
}

async fn interval(config: Config, db: Database, seconds: Option<i64>) -> Result<()> {
    let current = db
        .interval_override()
        .await?
        .unwrap_or(config.interval_seconds);

    let Some(requested) = seconds else {
        println!("current interval is {}s", current);
        return Ok(());
    };

    if requested <= 0 {
        db.set_interval_override(0).await?;
        println!("Scheduling disabled.");
        return Ok(());
    }

    let requested = requested as u64;
    if requested == current {
        println!("the interval is already set to {}s.", current);
        return Ok(());
    }

    db.set_interval_override(requested).await?;
    println!("changed interval from {}s to {}s", current, requested);
    Ok(())
}
