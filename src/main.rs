mod config;
mod error;
mod event;
mod ledger;
mod outlook;
mod providers;
mod remote;
mod sync;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use config::{Config, GcalConfig};
use ledger::Ledger;
use outlook::OutlookReader;
use providers::gcal::{self, GcalRemote};
use sync::{CycleReport, SyncEngine};

#[derive(Parser)]
#[command(name = "invitesync")]
#[command(about = "Mirror invited Outlook meetings into Google Calendar")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with Google Calendar
    Auth,
    /// Check that Outlook and Google Calendar are reachable
    Setup,
    /// Run one sync cycle
    Sync {
        /// Target Google Calendar name or id (overrides config)
        #[arg(short, long)]
        calendar: Option<String>,
    },
    /// Sync continuously on an interval
    Monitor {
        /// Poll interval in seconds (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Target Google Calendar name or id (overrides config)
        #[arg(short, long)]
        calendar: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Auth => cmd_auth().await,
        Commands::Setup => cmd_setup().await,
        Commands::Sync { calendar } => cmd_sync(calendar).await,
        Commands::Monitor { interval, calendar } => cmd_monitor(interval, calendar).await,
    }
}

fn gcal_config(cfg: &Config) -> Result<&GcalConfig> {
    cfg.providers.gcal.as_ref().context(
        "No Google credentials configured.\n\
        Add a [providers.gcal] section with client_id and client_secret to config.toml",
    )
}

async fn cmd_auth() -> Result<()> {
    let cfg = config::load_config()?;
    gcal::authenticate(gcal_config(&cfg)?).await?;

    println!("\nNow run `invitesync setup` to verify access, or `invitesync sync` to start mirroring.");
    Ok(())
}

async fn cmd_setup() -> Result<()> {
    let cfg = config::load_config()?;

    println!("📋 Setup check:");

    if OutlookReader::is_outlook_running().await {
        println!("✅ Microsoft Outlook: running");
    } else {
        println!("❌ Microsoft Outlook: not running");
    }

    match gcal::list_calendars(gcal_config(&cfg)?).await {
        Ok(calendars) => {
            println!("✅ Google Calendar: {} calendars available", calendars.len());
            for cal in calendars.iter().take(5) {
                let primary = if cal.primary { " (PRIMARY)" } else { "" };
                println!("   - {}{}", cal.name, primary);
            }
        }
        Err(e) => println!("❌ Google Calendar: not accessible ({:#})", e),
    }

    Ok(())
}

async fn cmd_sync(calendar: Option<String>) -> Result<()> {
    let cfg = config::load_config()?;
    let (reader, mut engine) = build_engine(&cfg, calendar.as_deref()).await?;

    run_one_cycle(&reader, &mut engine).await;
    Ok(())
}

async fn cmd_monitor(interval: Option<u64>, calendar: Option<String>) -> Result<()> {
    let cfg = config::load_config()?;
    let interval = std::time::Duration::from_secs(interval.unwrap_or(cfg.interval_secs));
    let (reader, mut engine) = build_engine(&cfg, calendar.as_deref()).await?;

    println!("🔄 Monitoring every {}s (Ctrl+C to stop)", interval.as_secs());
    outlook::send_notification("invitesync", "🔄 Monitoring started").await;

    let mut cycle = 0u64;
    loop {
        cycle += 1;
        println!("\n🔄 Sync cycle #{}", cycle);
        run_one_cycle(&reader, &mut engine).await;

        // Interrupt only lands between cycles, so an in-flight ledger save
        // always completes before exit.
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                println!("\n👋 Monitoring stopped");
                outlook::send_notification("invitesync", "🛑 Monitoring stopped").await;
                return Ok(());
            }
        }
    }
}

async fn build_engine(
    cfg: &Config,
    calendar: Option<&str>,
) -> Result<(OutlookReader, SyncEngine<GcalRemote>)> {
    let target = calendar.or(cfg.target_calendar.as_deref());
    let remote = GcalRemote::connect(gcal_config(cfg)?, target, cfg.target_tz()?).await?;
    println!("🎯 Target calendar: {}", remote.calendar_id());

    let ledger = Ledger::load(&cfg.ledger_path());
    if !ledger.is_empty() {
        println!("📦 Loaded {} previously synced events", ledger.len());
    }

    let reader = OutlookReader::new(cfg.look_behind_days, cfg.look_ahead_days);
    Ok((reader, SyncEngine::new(ledger, remote)))
}

/// Take one snapshot and run one sync cycle over it.
///
/// Extraction failures skip the cycle entirely: deletion detection must not
/// run against an empty snapshot that merely reflects an unreachable Outlook.
async fn run_one_cycle(reader: &OutlookReader, engine: &mut SyncEngine<GcalRemote>) {
    let snapshot = match reader.snapshot().await {
        Ok(events) => events,
        Err(e) => {
            println!("⚠️  {} — skipping this cycle", e);
            return;
        }
    };

    println!("📧 Found {} invited Outlook events", snapshot.len());

    let report = engine.run_cycle(&snapshot).await;
    print_report(&report);
}

fn print_report(report: &CycleReport) {
    if report.created > 0 {
        println!("   🆕 Created {} events", report.created);
    }
    if report.reconciled_existing > 0 {
        println!(
            "   🔄 {} events already existed in Google Calendar",
            report.reconciled_existing
        );
    }
    if report.migrated > 0 {
        println!("   📝 Migrated {} legacy ledger entries", report.migrated);
    }
    if report.deleted > 0 {
        println!("   🗑️  Deleted {} events", report.deleted);
    }
    if report.pruned > 0 {
        println!("   🧹 Pruned {} old ledger entries", report.pruned);
    }
    if report.already_synced > 0 {
        println!("   ⏭️  {} already synced", report.already_synced);
    }
    for error in &report.errors {
        println!("   ❌ {}", error);
    }
    if !report.changed() && report.errors.is_empty() {
        println!("✨ Everything up to date");
    }
}
