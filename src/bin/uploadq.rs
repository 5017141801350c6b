//! uploadq CLI: operator interface to the upload queue.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use secrecy::ExposeSecret;
use uploadq::audit::{RecordedActivity, SqliteActivityLog};
use uploadq::config::Config;
use uploadq::db::Db;
use uploadq::model::{
    Actor, ClearScope, EnqueueMode, EnqueueReport, ItemId, ItemStatus, QueueStats, RequestOutcome,
    WorkItem,
};
use uploadq::queue::Queue;
use uploadq::sku::{MemoryLedger, SkuEngine, SkuLedger, SkuTables, SqliteLedger};
use uploadq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "uploadq", about = "Shared URL work queue for product uploaders")]
struct Cli {
    /// Acting user ID
    #[arg(long, global = true, default_value_t = 1)]
    actor: i64,
    /// Capabilities of the acting user
    #[arg(long, global = true, value_enum, default_value_t = Role::Operator)]
    role: Role,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    Uploader,
    Manager,
    Operator,
}

#[derive(Subcommand)]
enum Command {
    /// Queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// SKU generation and validation
    Sku {
        #[command(subcommand)]
        action: SkuAction,
    },
    /// Runtime settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Show the activity log
    Activity {
        /// Only entries after this sequence number
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Import supplier URLs
    Enqueue {
        /// Drop every unassigned row first
        #[arg(long)]
        replace: bool,
        /// Read URLs from a file, one per line
        #[arg(long)]
        file: Option<PathBuf>,
        urls: Vec<String>,
    },
    /// Lease the next URL (or show the one already held)
    Request,
    /// Finish a leased URL
    Complete { id: i64 },
    /// Give a leased URL back
    Release { id: i64 },
    /// Show the URL currently held
    Current,
    /// Queue counts
    Stats,
    /// Bulk delete
    Clear {
        /// all, completed, or unassigned
        scope: String,
    },
    /// List queue rows
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum rows to show
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum SkuAction {
    /// Generate and log a new SKU
    Generate {
        product: String,
        #[arg(long, default_value = "")]
        variant_name: String,
        #[arg(long, default_value = "")]
        variant_value: String,
    },
    /// Check a SKU's format
    Validate { sku: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Set the lease duration in minutes
    Lease { minutes: i64 },
}

/// Store selected by configuration.
enum Backend {
    Embedded {
        queue: Queue,
        activity: Arc<SqliteActivityLog>,
    },
    Postgres(Db),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "uploadq"))?;

    let actor = match cli.role {
        Role::Uploader => Actor::uploader(cli.actor),
        Role::Manager => Actor::manager(cli.actor),
        Role::Operator => Actor::operator(cli.actor),
    };

    let tables = match &config.sku_tables_path {
        Some(path) => SkuTables::load(path)?,
        None => SkuTables::default(),
    };

    let backend = connect(&config).await?;

    match cli.command {
        Command::Queue { action } => cmd_queue(&backend, &actor, action).await,
        Command::Sku { action } => cmd_sku(&backend, &config, tables, &actor, action).await,
        Command::Settings {
            action: SettingsAction::Lease { minutes },
        } => {
            let lease = match &backend {
                Backend::Embedded { queue, .. } => queue.set_lease_minutes(&actor, minutes)?,
                Backend::Postgres(db) => db.set_lease_minutes(&actor, minutes).await?,
            };
            println!("Lease: {} minutes", lease.minutes());
            Ok(())
        }
        Command::Activity { since } => {
            let entries = match &backend {
                Backend::Embedded { activity, .. } => activity.activities_since(since)?,
                Backend::Postgres(db) => db.activities_since(since).await?,
            };
            print_activity(&entries);
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Backend> {
    if let Some(url) = &config.database_url {
        let db = Db::connect(url.expose_secret())
            .await?
            .with_default_lease(config.default_lease);
        db.migrate().await?;
        return Ok(Backend::Postgres(db));
    }

    let activity = Arc::new(SqliteActivityLog::open(&config.db_path)?);
    let queue = Queue::open(&config.db_path, activity.clone())?
        .with_default_lease(config.default_lease);
    Ok(Backend::Embedded { queue, activity })
}

async fn cmd_queue(backend: &Backend, actor: &Actor, action: QueueAction) -> anyhow::Result<()> {
    match action {
        QueueAction::Enqueue {
            replace,
            file,
            mut urls,
        } => {
            if let Some(path) = file {
                let contents = std::fs::read_to_string(&path)?;
                urls.extend(contents.lines().map(str::to_string));
            }
            let mode = if replace {
                EnqueueMode::Replace
            } else {
                EnqueueMode::Append
            };
            let report = match backend {
                Backend::Embedded { queue, .. } => queue.enqueue(actor, &urls, mode)?,
                Backend::Postgres(db) => db.enqueue(actor, &urls, mode).await?,
            };
            print_report(&report);
        }
        QueueAction::Request => {
            let outcome = match backend {
                Backend::Embedded { queue, .. } => queue.request_item(actor)?,
                Backend::Postgres(db) => db.request_item(actor).await?,
            };
            match outcome {
                RequestOutcome::Assigned(item) => println!("Assigned: {} {}", item.id, item.url),
                RequestOutcome::Existing(item) => {
                    println!("Already holding: {} {}", item.id, item.url)
                }
                RequestOutcome::NotAvailable => println!("No URLs available."),
            }
        }
        QueueAction::Complete { id } => {
            match backend {
                Backend::Embedded { queue, .. } => queue.complete_item(actor, ItemId(id))?,
                Backend::Postgres(db) => db.complete_item(actor, ItemId(id)).await?,
            }
            println!("Completed: {id}");
        }
        QueueAction::Release { id } => {
            match backend {
                Backend::Embedded { queue, .. } => queue.release_item(actor, ItemId(id))?,
                Backend::Postgres(db) => db.release_item(actor, ItemId(id)).await?,
            }
            println!("Released: {id}");
        }
        QueueAction::Current => {
            let (current, lease) = match backend {
                Backend::Embedded { queue, .. } => {
                    (queue.current_assignment(actor)?, queue.lease()?)
                }
                Backend::Postgres(db) => (db.current_assignment(actor).await?, db.lease().await?),
            };
            match current {
                Some(item) => {
                    print_item(&item);
                    if item.lease_expired(chrono::Utc::now(), lease) {
                        println!("Lease expired; the next request reclaims it.");
                    }
                }
                None => println!("No URL assigned."),
            }
        }
        QueueAction::Stats => {
            let stats = match backend {
                Backend::Embedded { queue, .. } => queue.stats(actor)?,
                Backend::Postgres(db) => db.stats(actor).await?,
            };
            print_stats(&stats);
        }
        QueueAction::Clear { scope } => {
            let scope: ClearScope = scope.parse()?;
            let removed = match backend {
                Backend::Embedded { queue, .. } => queue.clear(actor, scope)?,
                Backend::Postgres(db) => db.clear(actor, scope).await?,
            };
            println!("Removed {removed} row(s)");
        }
        QueueAction::List { status, limit } => {
            let status: Option<ItemStatus> = status.map(|s| s.parse()).transpose()?;
            let items = match backend {
                Backend::Embedded { queue, .. } => queue.list(actor, status, limit)?,
                Backend::Postgres(db) => db.list_items(actor, status, limit).await?,
            };
            print_items(&items);
        }
    }
    Ok(())
}

async fn cmd_sku(
    backend: &Backend,
    config: &Config,
    tables: SkuTables,
    actor: &Actor,
    action: SkuAction,
) -> anyhow::Result<()> {
    match action {
        SkuAction::Generate {
            product,
            variant_name,
            variant_value,
        } => {
            let sku = match backend {
                Backend::Embedded { activity, .. } => {
                    let ledger: Arc<dyn SkuLedger> = Arc::new(SqliteLedger::open(&config.db_path)?);
                    SkuEngine::new(tables, ledger, activity.clone()).generate(
                        actor.id,
                        &product,
                        &variant_name,
                        &variant_value,
                    )?
                }
                Backend::Postgres(db) => {
                    let engine = offline_engine(tables);
                    let base = engine.candidate(&product, &variant_value);
                    db.reserve_sku(actor.id, &base, &product, &variant_name, &variant_value)
                        .await?
                }
            };
            println!("{sku}");
        }
        SkuAction::Validate { sku } => {
            let engine = offline_engine(tables);
            if !engine.validate(&sku) {
                let reason = engine
                    .last_error()
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                anyhow::bail!("invalid: {reason}");
            }
            let issued = match backend {
                Backend::Embedded { .. } => {
                    SqliteLedger::open(&config.db_path)?.contains(&sku)?
                }
                Backend::Postgres(db) => db.sku_exists(&sku).await?,
            };
            if issued {
                println!("valid (already issued)");
            } else {
                println!("valid");
            }
        }
    }
    Ok(())
}

/// Engine for token building and format checks only; nothing is logged.
fn offline_engine(tables: SkuTables) -> SkuEngine {
    SkuEngine::new(
        tables,
        Arc::new(MemoryLedger::new()),
        Arc::new(uploadq::audit::TracingSink),
    )
}

fn print_report(report: &EnqueueReport) {
    println!("Accepted:   {}", report.accepted);
    println!("Rejected:   {}", report.rejected);
    println!("Duplicates: {}", report.duplicates);
    if report.replaced > 0 {
        println!("Replaced:   {}", report.replaced);
    }
}

fn print_stats(stats: &QueueStats) {
    println!("Total:           {}", stats.total);
    println!("Available:       {}", stats.available);
    println!("Assigned:        {}", stats.assigned);
    println!("Completed today: {}", stats.completed_today);
    println!("Lease:           {} minutes", stats.lease_minutes);
}

fn print_item(item: &WorkItem) {
    println!("ID:        {}", item.id);
    println!("URL:       {}", item.url);
    println!("Status:    {}", item.status);
    println!("Created:   {} by {}", item.created_at, item.created_by);
    if let Some(actor) = item.assigned_to {
        println!("Assigned:  {actor}");
    }
    if let Some(at) = item.assigned_at {
        println!("Since:     {at}");
    }
}

fn print_items(items: &[WorkItem]) {
    if items.is_empty() {
        println!("No queue rows found.");
        return;
    }

    println!(
        "{:<8}  {:<10}  {:<8}  {:<16}  URL",
        "ID", "STATUS", "ACTOR", "CREATED"
    );
    println!("{}", "-".repeat(100));
    for item in items {
        let actor = item
            .assigned_to
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8}  {:<10}  {:<8}  {:<16}  {}",
            item.id,
            item.status,
            actor,
            item.created_at.format("%Y-%m-%d %H:%M"),
            item.url
        );
    }
    println!("\n{} row(s)", items.len());
}

fn print_activity(entries: &[RecordedActivity]) {
    for entry in entries {
        println!(
            "{:>6}  {}  actor={:<6}  {:<18}  {}",
            entry.seq,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.actor_id,
            entry.action,
            entry.metadata
        );
    }
}
