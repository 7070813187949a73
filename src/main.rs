use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flyerfeed::config::{load_settings, Settings};
use flyerfeed::llm::GeminiClient;
use flyerfeed::mail::ImapMailbox;
use flyerfeed::repository::{
    open_database, DieselFlyerRepository, DieselJobStatusRepository, JobStatusStore,
};
use flyerfeed::scrapers::{Crawler, HttpClient, PageFetcher, RateLimitConfig, RateLimiter, RETAILERS};
use flyerfeed::services::{
    ingest_email, ingest_mailbox, FlyerManager, IngestReport, ManagerOptions, PageSplitter,
    Reconciler, Scheduler, SchedulerConfig, TickOutcome,
};

#[derive(Parser)]
#[command(name = "flyerfeed")]
#[command(about = "Retail flyer acquisition and parsing pipeline")]
#[command(version)]
struct Cli {
    /// Data directory (overrides config file and FLYERFEED_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Run a single scheduler tick (cooldown applies) and exit
        #[arg(long)]
        once: bool,
    },
    /// Crawl now regardless of cooldown, then parse pending pages
    Crawl,
    /// Parse pending flyer pages
    Process,
    /// Parse a local PDF or image flyer
    Ingest {
        /// Path to the document
        file: PathBuf,
        /// Shop the flyer belongs to
        #[arg(long)]
        shop: String,
    },
    /// Parse flyer attachments from a saved e-mail message
    IngestEmail {
        /// Path to the .eml file
        file: PathBuf,
        /// Shop the flyer belongs to
        #[arg(long)]
        shop: String,
        /// Only accept messages whose subject contains one of these
        #[arg(long)]
        subject: Vec<String>,
    },
    /// Fetch recent flyer e-mails from the IMAP mailbox and parse their attachments
    IngestMailbox {
        /// Shop the flyers belong to
        #[arg(long)]
        shop: String,
        /// Mailbox folder (default from config, else INBOX)
        #[arg(long)]
        folder: Option<String>,
        /// Subject substrings to search for (default from config)
        #[arg(long)]
        subject: Vec<String>,
    },
    /// Show pipeline counts
    Status,
    /// List known retailers
    Retailers,
}

struct App {
    settings: Settings,
    manager: Arc<FlyerManager>,
    job_status: Arc<dyn JobStatusStore>,
}

async fn build_app(settings: Settings) -> anyhow::Result<App> {
    settings
        .ensure_directories()
        .context("failed to create data directories")?;
    let pool = open_database(&settings.database_path()).await?;

    let repo = DieselFlyerRepository::new(pool.clone());
    let job_status: Arc<dyn JobStatusStore> = Arc::new(DieselJobStatusRepository::new(pool));

    let rate_limiter =
        RateLimiter::with_config(RateLimitConfig::with_base_delay(settings.request_delay()));
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpClient::with_rate_limiter(
        settings.request_timeout(),
        Duration::ZERO,
        rate_limiter,
        settings.user_agent.as_deref(),
    )?);
    let extractor = Arc::new(GeminiClient::new(settings.extraction.clone())?);

    let manager = FlyerManager::new(
        repo.clone(),
        Crawler::new(fetcher.clone()),
        fetcher,
        extractor,
        Reconciler::new(repo, settings.items_dir.clone()),
        ManagerOptions {
            uploads_dir: settings.uploads_dir.clone(),
            page_delay: settings.page_delay(),
            retailers: settings.retailers.clone(),
        },
    )
    .with_splitter(PageSplitter::new(settings.pdf_dpi))
    .with_job_status(job_status.clone());

    Ok(App {
        settings,
        manager: Arc::new(manager),
        job_status,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flyerfeed=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Retailers = cli.command {
        for retailer in RETAILERS {
            println!("{:<10} {}", retailer.id, retailer.listing_path);
        }
        return Ok(());
    }

    let mut settings = load_settings().await;
    if let Some(dir) = cli.data_dir {
        let base = Settings::with_data_dir(dir);
        settings.data_dir = base.data_dir;
        settings.uploads_dir = base.uploads_dir;
        settings.items_dir = base.items_dir;
    }
    let app = build_app(settings).await?;

    match cli.command {
        Commands::Run { once } => run(app, once).await?,
        Commands::Crawl => {
            let outcome = scheduler(&app).trigger_now().await;
            print_outcome(&outcome);
        }
        Commands::Process => {
            let report = app.manager.process_pending_pages().await?;
            println!(
                "Pages parsed: {}  failed: {}  items saved: {}",
                report.pages_parsed, report.pages_failed, report.items_saved
            );
        }
        Commands::Ingest { file, shop } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            let report = app.manager.ingest_document(&shop, &filename, data).await?;
            print_ingest(&report);
        }
        Commands::IngestEmail {
            file,
            shop,
            subject,
        } => {
            let raw = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let report = ingest_email(&app.manager, &shop, &raw, &subject).await?;
            print_ingest(&report);
        }
        Commands::IngestMailbox {
            shop,
            folder,
            subject,
        } => {
            let mailbox = ImapMailbox::new(&app.settings.mailbox)?;
            let mut query = app.settings.mailbox.query();
            if let Some(folder) = folder {
                query.folder = folder;
            }
            if !subject.is_empty() {
                query.subjects = subject;
            }
            let report = ingest_mailbox(&app.manager, &mailbox, &shop, &query).await?;
            println!(
                "Messages: {}  skipped: {}  unreadable: {}",
                report.messages, report.messages_skipped, report.messages_failed
            );
            print_ingest(&report.documents);
        }
        Commands::Status => {
            let stats = app.manager.stats().await?;
            println!("Database:        {}", app.settings.database_path().display());
            println!("Flyers:          {}", stats.flyers);
            println!("Pages:           {}", stats.pages);
            println!("  parsed:        {}", stats.parsed_pages);
            println!("  with errors:   {}", stats.error_pages);
            println!("  exhausted:     {}", stats.exhausted_pages);
            println!("Items:           {}", stats.items);
            match stats.last_crawl {
                Some(at) => println!("Last crawl:      {}", at.to_rfc3339()),
                None => println!("Last crawl:      never"),
            }
        }
        Commands::Retailers => {}
    }

    Ok(())
}

fn scheduler(app: &App) -> Scheduler {
    Scheduler::new(
        app.manager.clone(),
        app.job_status.clone(),
        SchedulerConfig {
            tick_interval: app.settings.tick_interval(),
            cooldown: app.settings.crawl_cooldown(),
            run_immediately: app.settings.run_on_start,
        },
    )
}

fn print_ingest(report: &IngestReport) {
    println!(
        "Pages: {}  flyers created: {}  items saved: {}  failed pages: {}  failed documents: {}",
        report.pages,
        report.flyers_created,
        report.items_saved,
        report.pages_failed,
        report.documents_failed
    );
}

fn print_outcome(outcome: &TickOutcome) {
    match &outcome.download {
        Some(report) => println!(
            "Flyers seen: {}  skipped: {}  pages downloaded: {}  errors: {}",
            report.flyers_seen, report.flyers_skipped, report.pages_downloaded, report.errors
        ),
        None if outcome.crawled => println!("Crawl failed, see log"),
        None => println!("Crawl skipped (cooldown)"),
    }
    match &outcome.process {
        Some(report) => println!(
            "Pages parsed: {}  failed: {}  items saved: {}",
            report.pages_parsed, report.pages_failed, report.items_saved
        ),
        None => println!("Page processing failed, see log"),
    }
}

async fn run(app: App, once: bool) -> anyhow::Result<()> {
    let scheduler = Arc::new(scheduler(&app));

    if once {
        print_outcome(&scheduler.tick(Utc::now()).await);
        return Ok(());
    }

    let token = CancellationToken::new();
    let handle = scheduler.spawn(token.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    token.cancel();
    handle.await?;
    Ok(())
}
