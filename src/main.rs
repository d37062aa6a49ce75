use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use cartwright::browser::{BrowserDriver, ChromeDriver};
use cartwright::catalog::{CatalogScraper, ProductCache};
use cartwright::models::{ProductSource, RunMode, RunStatus};
use cartwright::plugins::{planners, PluginManager};
use cartwright::session::{FileSessionBackend, SessionStore};
use cartwright::utils::Cancellation;
use cartwright::{AppConfig, RunOrchestrator};

#[derive(Parser)]
#[command(name = "cartwright", version, about = "Fills an online grocery cart from a shopping requirement")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore the session, plan a shopping list and fill the cart
    Run {
        /// Never wait for a human; close the browser when done
        #[arg(long)]
        auto: bool,
        /// Free-text shopping requirement
        #[arg(long, conflicts_with = "requirement_file")]
        requirement: Option<String>,
        /// Read the requirement from a file
        #[arg(long)]
        requirement_file: Option<PathBuf>,
        /// Scrape listings even when the cache is fresh
        #[arg(long)]
        no_cache: bool,
    },
    /// Scrape one listing and print the products as JSON
    Scrape {
        /// bonus or history
        source: ProductSource,
        #[arg(long)]
        no_cache: bool,
    },
    /// Manage the stored login session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Manage the product cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Forget the stored session so the next run logs in again
    Clear,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Drop cached listings, all of them or one source
    Clear { source: Option<ProductSource> },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("loading configuration")?;
    let _log_guard = init_tracing(&config)?;

    match cli.command {
        Commands::Run {
            auto,
            requirement,
            requirement_file,
            no_cache,
        } => {
            if auto {
                config.run.mode = RunMode::Auto;
            }
            let requirement = resolve_requirement(&config, requirement, requirement_file).await?;
            let status = run(config, &requirement, !no_cache).await?;
            return Ok(ExitCode::from(exit_status(status)));
        }
        Commands::Scrape { source, no_cache } => {
            let driver = launch_browser(&config).await?;
            let cache = ProductCache::open_or_fallback(&config.cache.database_path).await;
            let scraper = CatalogScraper::new(driver.clone(), cache, &config)?;
            let result = scraper.scrape(source, !no_cache).await;
            if let Err(e) = driver.close().await {
                warn!("Could not close the browser: {}", e);
            }
            let products = match result {
                Ok(products) => products,
                Err(e) if e.is_partial() => {
                    warn!("{}", e);
                    e.partial_results
                }
                Err(e) => return Err(e.into()),
            };
            println!("{}", serde_json::to_string_pretty(&products)?);
        }
        Commands::Session {
            action: SessionAction::Clear,
        } => {
            session_store(&config).invalidate().await?;
            println!("Session '{}' cleared", config.session.profile);
        }
        Commands::Cache {
            action: CacheAction::Clear { source },
        } => {
            let cache = ProductCache::open(&config.cache.database_path).await?;
            cache.clear(source).await?;
            match source {
                Some(source) => println!("Cleared cached {} listing", source),
                None => println!("Cleared all cached listings"),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run(config: AppConfig, requirement: &str, use_cache: bool) -> Result<RunStatus> {
    let mode = config.run.mode;
    let driver = launch_browser(&config).await?;
    let cache = ProductCache::open_or_fallback(&config.cache.database_path).await;
    let planner = planners::from_config(&config.planner)?;
    let plugins = PluginManager::from_config(&config).await?;
    let sessions = session_store(&config);

    let mut orchestrator = RunOrchestrator::new(config, driver, sessions, cache, planner, plugins)?;

    let cancel = Cancellation::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping the run");
            interrupt.cancel();
        }
    });

    let summary = orchestrator.run(requirement, use_cache, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match summary.status() {
        RunStatus::Aborted => error!(reason = summary.reason().unwrap_or("unknown"), "Run aborted"),
        status => info!(%status, added = summary.added().count(), "Run complete"),
    }

    // The browser stays open for review and checkout until the user is done with it.
    if mode == RunMode::Interactive && !cancel.is_cancelled() {
        info!("Browser left open for checkout. Press Ctrl-C to exit.");
        cancel.cancelled().await;
    }
    Ok(summary.status())
}

/// Process exit status for a finished run; only aborted runs count as failures.
fn exit_status(status: RunStatus) -> u8 {
    match status {
        RunStatus::Aborted => 1,
        RunStatus::Success | RunStatus::Partial => 0,
    }
}

async fn launch_browser(config: &AppConfig) -> Result<Arc<dyn BrowserDriver>> {
    let browser = config.browser.clone();
    let origin = config.site.base_url.clone();
    let driver = tokio::task::spawn_blocking(move || ChromeDriver::launch(&browser, &origin))
        .await
        .context("browser launch task failed")??;
    Ok(Arc::new(driver))
}

fn session_store(config: &AppConfig) -> SessionStore {
    SessionStore::new(
        Arc::new(FileSessionBackend::new(config.session.directory.clone())),
        config.session.profile.clone(),
        chrono::Duration::days(config.session.validity_days),
    )
}

async fn resolve_requirement(
    config: &AppConfig,
    requirement: Option<String>,
    requirement_file: Option<PathBuf>,
) -> Result<String> {
    if let Some(requirement) = requirement {
        return Ok(requirement);
    }
    let file = requirement_file.or_else(|| {
        if config.run.requirement.is_none() {
            config.run.requirement_file.clone()
        } else {
            None
        }
    });
    match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading requirement file {}", path.display())),
        None => Ok(config.run.requirement.clone().unwrap_or_default()),
    }
}

fn init_tracing(config: &AppConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.run.log_dir)
        .with_context(|| format!("creating log directory {}", config.run.log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&config.run.log_dir, "cartwright.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cartwright=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}
