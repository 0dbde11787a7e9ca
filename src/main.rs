// 🥫 can-tracker CLI - init stores, load raw exports, run analyses, export

use anyhow::{Context, Result};
use can_tracker::export::{export_tables, run_timestamp, ExportSelection};
use can_tracker::identity::minter_for;
use can_tracker::pipeline::{analyze, ingest, init_stores, open_stores, IngestReport};
use can_tracker::{DatastoreRegistry, LoadMode, Settings};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Can consumption tracker")]
struct Cli {
    /// Path to the TOML settings file
    #[arg(short, long, value_name = "FILE", default_value = "config/pipeline.toml")]
    settings: PathBuf,

    /// Override the store directory from the settings file
    #[arg(long, value_name = "DIR")]
    db_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create every configured store and upload reference data
    Init {
        /// Drop existing stores first
        #[arg(long)]
        reset: bool,
    },
    /// Normalize raw exports and load them into the raw store
    Load {
        /// Append instead of replacing existing rows
        #[arg(long)]
        append: bool,
    },
    /// Refresh calibration and run every analysis stage
    Analyze {
        #[arg(long)]
        append: bool,
    },
    /// init + load + analyze
    Run {
        #[arg(long)]
        reset: bool,
    },
    /// Write every table of the selected stores to timestamped CSV files
    Export {
        /// Store to export (repeatable); all configured stores by default
        #[arg(long = "store", value_name = "NAME")]
        stores: Vec<String>,
    },
    /// List store files in the store directory with their tables
    Stores,
}

fn mode(append: bool) -> LoadMode {
    if append {
        LoadMode::Append
    } else {
        LoadMode::Replace
    }
}

fn print_report(report: &IngestReport) {
    println!("{}", report.stats);
    for err in &report.format_errors {
        println!("   ⚠️  {}", err);
    }
    for err in &report.unresolved {
        println!("   ⚠️  {}", err);
    }
}

fn run_init(settings: &Settings, registry: &mut DatastoreRegistry, reset: bool) -> Result<()> {
    println!("\n🔧 Setting up stores in {}...", settings.database_dir.display());
    let mut minter = minter_for(settings.identity.seed.as_deref());
    let created = init_stores(settings, registry, reset, &mut minter).context("failed to initialise stores")?;
    println!("✓ Stores ready: {}", created.join(", "));
    Ok(())
}

fn run_load(settings: &Settings, registry: &mut DatastoreRegistry, append: bool) -> Result<()> {
    println!("\n📂 Loading raw data from {}...", settings.raw_data_dir.display());
    let report = ingest(
        settings,
        registry,
        minter_for(settings.identity.seed.as_deref()),
        mode(append),
    )
    .context("failed to load raw data")?;
    print_report(&report);
    Ok(())
}

fn run_analyze(settings: &Settings, registry: &mut DatastoreRegistry, append: bool) -> Result<()> {
    println!("\n📊 Running analyses...");
    let stage = analyze(settings, registry, mode(append)).context("analysis failed")?;
    println!("✓ Reached stage: {}", stage);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.settings)
        .with_context(|| format!("failed to read settings from {}", cli.settings.display()))?;
    if let Some(dir) = cli.db_dir {
        settings.database_dir = dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let mut registry = DatastoreRegistry::new();

    match cli.command {
        Command::Init { reset } => run_init(&settings, &mut registry, reset)?,
        Command::Load { append } => {
            open_stores(&settings, &mut registry)?;
            run_load(&settings, &mut registry, append)?;
        }
        Command::Analyze { append } => {
            open_stores(&settings, &mut registry)?;
            run_analyze(&settings, &mut registry, append)?;
        }
        Command::Run { reset } => {
            run_init(&settings, &mut registry, reset)?;
            run_load(&settings, &mut registry, false)?;
            run_analyze(&settings, &mut registry, false)?;
        }
        Command::Export { stores } => {
            open_stores(&settings, &mut registry)?;
            let selections: Vec<ExportSelection> = if stores.is_empty() {
                registry.names().into_iter().map(ExportSelection::all).collect()
            } else {
                stores.into_iter().map(ExportSelection::all).collect()
            };
            let timestamp = run_timestamp(Local::now());
            let manifest = export_tables(&registry, &selections, &settings.export_dir, &timestamp)
                .context("export failed")?;
            println!("\n📤 Exported {} tables → {}", manifest.tables.len(), settings.export_dir.display());
            for table in &manifest.tables {
                println!("   {}.{}: {} rows", table.store, table.table, table.rows);
            }
        }
        Command::Stores => {
            if !settings.database_dir.is_dir() {
                eprintln!("❌ No store directory at {}", settings.database_dir.display());
                eprintln!("   Run: can-tracker init");
                std::process::exit(1);
            }
            for name in registry.discover(&settings.database_dir)? {
                let store = registry.get_mut(&name)?;
                store.refresh_headers()?;
                println!("🗄️  {} ({})", name, store.path().display());
                for table in store.list_tables()? {
                    println!("   {}: {} rows", table, store.count(&table)?);
                }
            }
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Done");
    Ok(())
}
