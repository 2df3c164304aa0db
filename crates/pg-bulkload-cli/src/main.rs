//! pg-bulkload CLI - Staged COPY-then-swap bulk loading for PostgreSQL.

use clap::{Parser, Subcommand};
use pg_bulkload::core::table::DEFAULT_PRIMARY_KEY;
use pg_bulkload::{
    copy, loader, sequence, swap, Config, CopySource, CopyTableOptions, ExportSpec, LoadError,
    LoadOptions, PgPool, TableRef,
};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-bulkload")]
#[command(about = "Staged COPY-then-swap bulk loading for PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds an interrupted operation gets to finish before it is dropped
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage the configured CSV files and swap them into their tables
    Import {
        /// Append instead of replacing table contents
        #[arg(long)]
        skip_truncate: bool,

        /// VACUUM ANALYZE each table after the swap
        #[arg(long)]
        vacuum: bool,

        /// Dry run: check preconditions and print the statements
        #[arg(long)]
        dry_run: bool,

        /// Only load these tables (repeatable) [default: all configured]
        #[arg(long = "table")]
        tables: Vec<String>,
    },

    /// Export a table or query to CSV
    Export {
        /// Table to export
        #[arg(long, conflicts_with = "query")]
        table: Option<String>,

        /// SQL query to export
        #[arg(long)]
        query: Option<String>,

        /// Restrict a table export to these columns
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,

        /// Output file [default: stdout]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Move a table's sequence past its largest key
    RepairSequence {
        #[arg(long)]
        table: String,

        /// Key column
        #[arg(long, default_value = DEFAULT_PRIMARY_KEY)]
        key: String,

        /// Ignore keys at or above this value
        #[arg(long)]
        cutoff: Option<i64>,
    },

    /// Replace one table's contents with another's in a single transaction
    CopyTable {
        #[arg(long)]
        source: String,

        #[arg(long)]
        dest: String,

        /// Key column of both tables
        #[arg(long, default_value = DEFAULT_PRIMARY_KEY)]
        key: String,

        /// Leave the source table's rows in place
        #[arg(long)]
        keep_source: bool,

        /// VACUUM ANALYZE the destination afterwards
        #[arg(long)]
        vacuum: bool,
    },

    /// Drop shadow tables left behind by failed loads
    Cleanup {
        #[arg(long)]
        table: String,

        /// Only list the shadow tables
        #[arg(long)]
        dry_run: bool,
    },

    /// Test the database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), LoadError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(LoadError::Config)?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel_token = setup_signal_handler(cli.shutdown_timeout);
    let grace = Duration::from_secs(cli.shutdown_timeout);

    cancellable(&cancel_token, grace, execute(&cli, &config)).await
}

/// Run `fut` to completion unless a signal arrives and it then outlives `grace`.
async fn cancellable<F>(token: &CancellationToken, grace: Duration, fut: F) -> Result<(), LoadError>
where
    F: Future<Output = Result<(), LoadError>>,
{
    tokio::pin!(fut);
    tokio::select! {
        result = &mut fut => return result,
        _ = token.cancelled() => {}
    }

    match tokio::time::timeout(grace, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "shutdown timeout of {}s reached; abandoning operation",
                grace.as_secs()
            );
            Err(LoadError::Cancelled)
        }
    }
}

async fn execute(cli: &Cli, config: &Config) -> Result<(), LoadError> {
    match &cli.command {
        Commands::Import {
            skip_truncate,
            vacuum,
            dry_run,
            tables,
        } => {
            let specs = config
                .select_tables(tables)?
                .into_iter()
                .map(|t| t.load_spec())
                .collect::<Result<Vec<_>, _>>()?;
            if specs.is_empty() {
                return Err(LoadError::Config("no tables configured".to_string()));
            }

            let mut options = LoadOptions {
                swap: config.load.swap_options(),
                copy_chunk_bytes: config.load.copy_chunk_bytes,
            };
            options.swap.skip_truncate |= *skip_truncate;
            options.swap.vacuum_after |= *vacuum;

            let pool = PgPool::new(&config.database).await?;
            let mut session = pool.session().await?;

            if *dry_run {
                let plan = loader::plan(&session, &specs, &options).await?;
                if cli.output_json {
                    println!("{}", serde_json::to_string_pretty(&plan)?);
                } else {
                    println!("Dry run completed!");
                    println!("  Tables: {}", plan.steps.len());
                    println!("\nStaging (outside the transaction):");
                    for statement in &plan.staging_statements {
                        println!("  {};", statement);
                    }
                    println!("\nSwap transaction:");
                    for statement in &plan.swap_statements {
                        println!("  {};", statement);
                    }
                }
                return Ok(());
            }

            let report = loader::replace_tables(&mut session, &specs, &options).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nLoad completed!");
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!("  Rows: {}", report.total_rows);
                for table in &report.tables {
                    let repair = table
                        .repair
                        .as_ref()
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "no sequence".to_string());
                    println!("  {}: {} rows, sequence {}", table.table, table.rows, repair);
                }
            }
            let failed = report.failed_repairs();
            if !failed.is_empty() {
                warn!("sequence repair failed for: {}", failed.join(", "));
            }
        }

        Commands::Export {
            table,
            query,
            columns,
            output,
        } => {
            let source = match (table, query) {
                (Some(table), _) => Some(CopySource::Table(TableRef::new(table.clone()).resolve())),
                (None, Some(query)) => Some(CopySource::Query(query.clone())),
                (None, None) => None,
            };
            if source.is_none() && (columns.is_some() || output.is_some()) {
                return Err(LoadError::Config(
                    "--columns and --output need --table or --query; \
                     exporting all tables uses each table's configured columns and csv_path"
                        .to_string(),
                ));
            }

            let pool = PgPool::new(&config.database).await?;
            let session = pool.session().await?;

            let exports = match (source, output) {
                (Some(source), Some(path)) => vec![ExportSpec {
                    source,
                    path: path.clone(),
                    columns: columns.clone(),
                }],
                (Some(source), None) => {
                    let mut stdout = tokio::io::stdout();
                    let rows =
                        copy::export_rows(&session, &source, &mut stdout, columns.as_deref())
                            .await?;
                    info!("Exported {} rows to stdout", rows);
                    return Ok(());
                }
                (None, _) => config
                    .tables
                    .iter()
                    .map(|t| {
                        let path = t.csv_path.clone().ok_or_else(|| {
                            LoadError::Config(format!("tables[{}].csv_path is required", t.table))
                        })?;
                        Ok(ExportSpec {
                            source: CopySource::Table(t.table_ref().resolve()),
                            path,
                            columns: t.columns.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, LoadError>>()?,
            };
            if exports.is_empty() {
                return Err(LoadError::Config("no tables configured".to_string()));
            }

            let report = loader::export_tables(&session, &exports).await?;
            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nExport completed!");
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                for export in &report.exports {
                    println!(
                        "  {}: {} rows -> {}",
                        export.source,
                        export.rows,
                        export.path.display()
                    );
                }
            }
        }

        Commands::RepairSequence { table, key, cutoff } => {
            let target = TableRef::new(table.clone())
                .with_primary_key(key.clone())
                .resolve();

            let pool = PgPool::new(&config.database).await?;
            let session = pool.session().await?;
            let outcome = sequence::repair_sequence(&session, &target, *cutoff).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("Sequence {}: {}", target.sequence, outcome);
            }
            if outcome.is_failed() {
                return Err(LoadError::precondition(format!(
                    "sequence repair for {} failed",
                    target
                )));
            }
        }

        Commands::CopyTable {
            source,
            dest,
            key,
            keep_source,
            vacuum,
        } => {
            let source = TableRef::new(source.clone())
                .with_primary_key(key.clone())
                .resolve();
            let dest = TableRef::new(dest.clone())
                .with_primary_key(key.clone())
                .resolve();
            let options = CopyTableOptions {
                truncate_source: !*keep_source,
                vacuum_after: *vacuum || config.load.vacuum_after,
            };

            let pool = PgPool::new(&config.database).await?;
            let mut session = pool.session().await?;
            let report = swap::copy_table(&mut session, &source, &dest, &options).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Copied {} into {}", report.source, report.dest);
                if let Some(repair) = &report.repair {
                    println!("  Sequence: {}", repair);
                }
                if report.vacuumed {
                    println!("  Vacuumed: yes");
                }
            }
        }

        Commands::Cleanup { table, dry_run } => {
            let target = TableRef::new(table.clone()).resolve();

            let pool = PgPool::new(&config.database).await?;
            let session = pool.session().await?;
            let orphans = swap::find_orphaned_staging(&session, &target).await?;

            let dropped = if *dry_run {
                0
            } else {
                swap::cleanup(&session, &orphans).await
            };

            if cli.output_json {
                let result = serde_json::json!({
                    "table": target.to_string(),
                    "shadow_tables": orphans,
                    "dropped": dropped,
                    "dry_run": dry_run,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Shadow tables for {}: {}", target, orphans.len());
                for orphan in &orphans {
                    println!("  {}", orphan);
                }
                if !*dry_run {
                    println!("Dropped: {}", dropped);
                }
            }
            if !*dry_run && dropped < orphans.len() {
                return Err(LoadError::precondition(format!(
                    "could not drop {} shadow table(s)",
                    orphans.len() - dropped
                )));
            }
        }

        Commands::HealthCheck => {
            let start = Instant::now();
            let connected = match PgPool::new(&config.database).await {
                Ok(pool) => pool.server_version().await.map(|v| (pool.label().to_string(), v)),
                Err(e) => Err(e),
            };
            let latency_ms = start.elapsed().as_millis() as u64;

            let (healthy, label, version, error) = match connected {
                Ok((label, version)) => (true, label, Some(version), None),
                Err(e) => (
                    false,
                    format!("{}:{}/{}", config.database.host, config.database.port, config.database.database),
                    None,
                    Some(e.to_string()),
                ),
            };

            if cli.output_json {
                let result = serde_json::json!({
                    "healthy": healthy,
                    "target": label,
                    "latency_ms": latency_ms,
                    "server_version": version,
                    "error": error,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  PostgreSQL {}: {} ({}ms)",
                    label,
                    if healthy { "OK" } else { "FAILED" },
                    latency_ms
                );
                if let Some(ref version) = version {
                    println!("    Version: {}", version);
                }
                if let Some(ref err) = error {
                    println!("    Error: {}", err);
                }
            }

            if !healthy {
                return Err(LoadError::pool("health check failed", label));
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format: {} (expected text or json)", other)),
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    eprintln!(
                        "\nReceived {}. Shutting down gracefully (timeout: {}s)...",
                        name, shutdown_timeout
                    );
                    token.cancel();
                }
                Err(e) => warn!("could not install {} handler: {}", name, e),
            }
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                eprintln!(
                    "\nReceived Ctrl-C. Shutting down gracefully (timeout: {}s)...",
                    shutdown_timeout
                );
                token.cancel();
            }
            Err(e) => warn!("could not install Ctrl-C handler: {}", e),
        }
    });

    cancel_token
}
