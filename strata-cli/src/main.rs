use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use strata_core::{
    Executor, Models, StrataError, StrataResult, diff_database, format_schema_diff_summary,
    plan_sync, sync_database,
};
use tracing_subscriber::EnvFilter;

mod manifest;
use manifest::Manifest;

const DEFAULT_MANIFEST: &str = "models.json";

const SAMPLE_MANIFEST: &str = r#"{
  "models": [
    {
      "name": "Partner",
      "fields": [
        { "name": "Name", "type": "char", "size": 100, "index": true },
        { "name": "Parent", "type": "many2one", "relation": "Partner" }
      ]
    }
  ]
}
"#;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata ORM CLI - schema synchronization from a model manifest", long_about = None)]
struct Cli {
    /// Log engine activity (SQL included)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter model manifest
    Init {
        #[arg(short, long, default_value = DEFAULT_MANIFEST)]
        models: PathBuf,
    },
    /// Synchronize the database schema with the manifest models
    Sync {
        #[arg(short, long)]
        database: Option<String>,
        #[arg(short, long, default_value = DEFAULT_MANIFEST)]
        models: PathBuf,
        /// Print the planned statements without executing them
        #[arg(long)]
        dry_run: bool,
        /// Skip confirmation prompts
        #[arg(long)]
        yes: bool,
    },
    /// Diff the database schema against the manifest models
    Diff {
        #[arg(short, long)]
        database: Option<String>,
        #[arg(short, long, default_value = DEFAULT_MANIFEST)]
        models: PathBuf,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run_cli(cli).await
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "strata_core=debug,warn" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .try_init();
}

async fn run_cli(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Init { models } => {
            println!(">> Initializing Strata project...");
            if init_manifest(&models)? {
                println!("[OK] Created {}.", models.display());
            } else {
                println!("[INFO] {} already exists, left untouched.", models.display());
            }
        }
        Commands::Sync {
            database,
            models,
            dry_run,
            yes,
        } => {
            println!(">> Loading models from {}...", models.display());
            let models = load_models(&models)?;
            let db_url = resolve_db_url(database);
            println!(">> Connecting to {}...", db_url);
            let executor = connect(&db_url).await?;

            if dry_run {
                let statements = plan_sync(&executor, &models).await?;
                print_sync_dry_run(&statements);
                return Ok(());
            }

            let diff = with_sqlite_retry("schema diff", || diff_database(&executor, &models)).await?;
            if !diff.extra_tables.is_empty() {
                println!(
                    "[WARN] Tables without a model will be dropped: {}",
                    diff.extra_tables.join(", ")
                );
                if !yes && !confirm_action("Proceed with sync?")? {
                    println!("[INFO] Sync cancelled.");
                    return Ok(());
                }
            }

            let applied = with_sqlite_retry("sync", || sync_database(&executor, &models)).await?;
            if applied.is_empty() {
                println!("[INFO] Schema already up to date.");
            } else {
                println!("[OK] Sync completed ({} statement(s)).", applied.len());
            }
        }
        Commands::Diff { database, models } => {
            let models = load_models(&models)?;
            let db_url = resolve_db_url(database);
            println!(">> Connecting to {}...", db_url);
            let executor = connect(&db_url).await?;
            let diff = with_sqlite_retry("schema diff", || diff_database(&executor, &models)).await?;
            print!("{}", format_schema_diff_summary(&diff));
            println!("[OK] Schema diff complete.");
        }
    }

    Ok(())
}

/// Returns false when the file is already there.
fn init_manifest(path: &Path) -> CliResult<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, SAMPLE_MANIFEST)?;
    Ok(true)
}

fn load_models(path: &Path) -> CliResult<std::sync::Arc<Models>> {
    let manifest = Manifest::load(path)?;
    if manifest.models.is_empty() {
        println!("[WARN] {} declares no models.", path.display());
    }
    Ok(manifest.bootstrap()?)
}

fn print_sync_dry_run(statements: &[String]) {
    if statements.is_empty() {
        println!("[INFO] Dry run: schema already up to date.");
        return;
    }
    println!("[INFO] Dry run: {} statement(s) planned.", statements.len());
    for sql in statements {
        println!("{};", sql);
    }
}

fn confirm_action(prompt: &str) -> CliResult<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let value = input.trim().to_ascii_lowercase();
    Ok(matches!(value.as_str(), "y" | "yes"))
}

fn resolve_db_url(database: Option<String>) -> String {
    database
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| "sqlite:strata.db".to_string())
}

fn is_sqlite_url(db_url: &str) -> bool {
    db_url.starts_with("sqlite:")
}

fn is_postgres_url(db_url: &str) -> bool {
    db_url.starts_with("postgres://") || db_url.starts_with("postgresql://")
}

/// File databases are created on first use.
fn sqlite_connect_url(db_url: &str) -> String {
    if db_url.contains(":memory:") || db_url.contains("mode=") {
        return db_url.to_string();
    }
    let separator = if db_url.contains('?') { '&' } else { '?' };
    format!("{}{}mode=rwc", db_url, separator)
}

async fn connect(db_url: &str) -> CliResult<Executor> {
    if is_postgres_url(db_url) {
        #[cfg(feature = "postgres")]
        {
            return Ok(Executor::connect(db_url).await?);
        }
        #[cfg(not(feature = "postgres"))]
        {
            return Err(
                "Postgres support is not enabled. Rebuild strata-cli with --features postgres."
                    .into(),
            );
        }
    }
    if is_sqlite_url(db_url) {
        #[cfg(feature = "sqlite")]
        {
            let url = sqlite_connect_url(db_url);
            return Ok(with_sqlite_retry("sqlite connect", || Executor::connect(&url)).await?);
        }
        #[cfg(not(feature = "sqlite"))]
        {
            return Err(
                "SQLite support is not enabled. Rebuild strata-cli with --features sqlite.".into(),
            );
        }
    }
    Err(format!("Unsupported database url: {}", db_url).into())
}

fn is_retryable_sqlite_error(err: &StrataError) -> bool {
    let source = match err {
        StrataError::Sqlx(source) | StrataError::Statement { source, .. } => source,
        _ => return false,
    };
    match source {
        sqlx::Error::Io(io) => io.raw_os_error() == Some(32),
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            msg.contains("database is locked")
                || msg.contains("database is busy")
                || msg.contains("sqlite_busy")
        }
        _ => false,
    }
}

async fn with_sqlite_retry<T, F, Fut>(label: &str, mut f: F) -> StrataResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = StrataResult<T>>,
{
    let mut attempt = 0usize;
    let mut delay = Duration::from_millis(50);
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable_sqlite_error(&err) && attempt < 6 => {
                attempt += 1;
                eprintln!(
                    "[WARN] SQLite busy/locked during {}, retrying (attempt {}).",
                    label, attempt
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(800));
            }
            Err(err) => return Err(err),
        }
    }
}
