//! SentinelVault Admin CLI
//!
//! Runs the admin aggregation engine against a JSON snapshot of the document
//! store. Read-only commands print a report; mutating commands write the
//! updated snapshot back, including the audit records they produced.
//!
//! Every command acts as the principal named by `--actor`, who must hold the
//! admin role in the snapshot.

mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sentinelvault_core::admin::{AdminAggregationEngine, BreachCatalog};
use sentinelvault_core::storage::{load_settings, DocPath, DocumentStore, Principal};
use sentinelvault_core::{
    EngineSettings, MemoryIdentityProvider, MemoryStore, NotificationKind, Notifier,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seed::Seed;

/// SentinelVault fleet administration
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Snapshot of the document store (users, credentials, audit logs)
    #[arg(short, long)]
    snapshot: PathBuf,

    /// Uid of the acting admin
    #[arg(short, long)]
    actor: String,

    /// Engine settings file; defaults apply when omitted
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tally credential strength across every principal
    Health,
    /// Check principals against the configured breach catalog
    Exposure,
    /// Show the most recent audit records
    Audit,
    /// Delete every credential a principal owns
    Purge { principal: String },
    /// Ban a principal, or lift the ban with --lift
    Ban {
        principal: String,
        #[arg(long)]
        lift: bool,
    },
    /// Grant the admin role, or revoke it with --revoke
    Admin {
        principal: String,
        #[arg(long)]
        revoke: bool,
    },
}

impl Command {
    fn mutates(&self) -> bool {
        !matches!(self, Command::Health | Command::Audit)
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Forward engine notifications to the log. The task ends once every
/// notifier clone is dropped.
fn spawn_notification_logger(duration_ms: u64) -> (Notifier, JoinHandle<()>) {
    let (notifier, mut rx) = Notifier::channel(duration_ms);
    let handle = tokio::spawn(async move {
        while let Some(n) = rx.recv().await {
            match n.kind {
                NotificationKind::Error => error!("{}", n.message),
                NotificationKind::Success | NotificationKind::Info => info!("{}", n.message),
            }
        }
    });
    (notifier, handle)
}

async fn load_actor(store: &dyn DocumentStore, uid: &str) -> Result<Principal> {
    let doc = store
        .get_document(&DocPath::user(uid))
        .await?
        .with_context(|| format!("Actor {} is not in the snapshot", uid))?;
    Ok(Principal::from_document(&doc)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinelvault_core=info,sentinelvault_admin=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => load_settings(path)
            .with_context(|| format!("Failed to load settings from {:?}", path))?,
        None => EngineSettings::default(),
    };
    debug!("Settings: {:?}", settings);

    let seed = Seed::load(&args.snapshot)?;
    let store = Arc::new(MemoryStore::new());
    seed.populate(store.as_ref()).await?;
    info!(
        "Loaded {} principals from {:?}",
        seed.users.len(),
        args.snapshot
    );

    let actor = load_actor(store.as_ref(), &args.actor).await?;
    let (notifier, logger) = spawn_notification_logger(settings.notification_duration_ms);
    let engine = AdminAggregationEngine::new(
        store.clone(),
        Arc::new(MemoryIdentityProvider::new()),
        &actor,
        notifier,
        &settings,
    )
    .with_context(|| format!("{} cannot run admin commands", actor.email))?;

    let outcome = run(&engine, &args, &settings).await;
    drop(engine);
    let _ = logger.await;
    outcome?;

    if args.command.mutates() {
        Seed::capture(store.as_ref()).await?.save(&args.snapshot)?;
        info!("Snapshot written to {:?}", args.snapshot);
    }
    Ok(())
}

async fn run(engine: &AdminAggregationEngine, args: &Args, settings: &EngineSettings) -> Result<()> {
    match &args.command {
        Command::Health => {
            let report = engine.scan_health().await?;
            if !report.skipped.is_empty() {
                warn!("Credentials unreadable for: {}", report.skipped.join(", "));
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            let s = &report.snapshot;
            println!(
                "Weak {} ({:.0}%)  Medium {} ({:.0}%)  Strong {} ({:.0}%)  Total {}",
                s.weak,
                s.percent(s.weak),
                s.medium,
                s.percent(s.medium),
                s.strong,
                s.percent(s.strong),
                s.total
            );
            for row in &report.principals {
                println!(
                    "{:<28} {:<20} {:<8} {:<7} {:>5}  {}",
                    row.id,
                    row.email,
                    if row.role.is_admin() { "admin" } else { "standard" },
                    if row.banned { "banned" } else { "active" },
                    row.credential_count
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    format_time(row.last_activity)
                );
            }
        }
        Command::Exposure => {
            let catalog = BreachCatalog::from_settings(settings);
            if catalog.is_empty() {
                warn!("Breach catalog is empty; nothing can match");
            }
            let report = engine.scan_exposure(&catalog).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("{} exposed", report.exposed_count);
            for hit in &report.exposed {
                println!("{:<28} {:<28} {}", hit.principal_id, hit.email, hit.exposure);
            }
        }
        Command::Audit => {
            let logs = engine.audit_logs().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&logs)?);
                return Ok(());
            }
            for entry in &logs {
                println!(
                    "{}  {:<8} {:<24} {}",
                    format_time(Some(entry.timestamp)),
                    format!("{:?}", entry.severity).to_lowercase(),
                    entry.actor_email,
                    entry.action
                );
            }
        }
        Command::Purge { principal } => {
            let removed = engine.purge_all_credentials(principal).await?;
            println!("Removed {} credentials from {}", removed, principal);
        }
        Command::Ban { principal, lift } => {
            if !lift && principal == &args.actor {
                bail!("Refusing to ban the acting admin");
            }
            engine.set_ban_status(principal, !lift).await?;
        }
        Command::Admin { principal, revoke } => {
            if *revoke && principal == &args.actor {
                bail!("Refusing to revoke the acting admin's own role");
            }
            engine.set_admin_status(principal, !revoke).await?;
        }
    }
    Ok(())
}
