use actiongen::analysis::log::read_query_log;
use actiongen::analysis::Workload;
use actiongen::config::{DbConfig, PipelineConfig};
use actiongen::engine::RuleEngine;
use actiongen::facts::postgres::PgCatalog;
use actiongen::facts::CatalogSnapshot;
use actiongen::reporter::{ReportFormat, Reporter, TemplateReporter};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tuning action generator - proposes index and parameter changes from a schema and query log
#[derive(Parser, Debug)]
#[command(name = "actiongen")]
#[command(version = "0.1.0")]
#[command(about = "PostgreSQL tuning action generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "json")]
    format: ReportFormat,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Database host
    #[arg(
        short = 'H',
        long = "host",
        env = "POSTGRES_HOST",
        default_value = "localhost"
    )]
    host: String,

    /// Database port
    #[arg(long = "port", env = "POSTGRES_PORT", default_value = "5432")]
    port: u16,

    /// Database name
    #[arg(short = 'd', long = "database", env = "POSTGRES_DATABASE")]
    database: Option<String>,

    /// Username
    #[arg(short = 'u', long = "username", env = "POSTGRES_USER")]
    username: Option<String>,

    /// Password
    #[arg(short = 'p', long = "password", env = "POSTGRES_PASSWORD", default_value = "")]
    password: String,
}

impl ConnectionArgs {
    fn into_config(self) -> anyhow::Result<DbConfig> {
        let database = self
            .database
            .context("a database name is required (--database or POSTGRES_DATABASE)")?;
        let username = self
            .username
            .context("a username is required (--username or POSTGRES_USER)")?;
        Ok(DbConfig::from_connection_params(
            self.host,
            self.port,
            database,
            username,
            self.password,
        ))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a generator pipeline and print the resulting action catalog
    Generate {
        /// Path to the YAML pipeline description
        #[arg(short = 'c', long = "config")]
        config_path: PathBuf,

        /// Read schema and parameters from a snapshot file instead of a database
        #[arg(long = "catalog")]
        catalog: Option<PathBuf>,

        /// Write the report to a file instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Do not refresh planner statistics before reading the catalog
        #[arg(long = "skip-analyze", default_value_t = false)]
        skip_analyze: bool,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Show the query templates aggregated from a log
    Templates {
        /// PostgreSQL log file (csvlog or stderr format)
        #[arg(short = 'l', long = "log")]
        log: PathBuf,

        /// Read the schema from a snapshot file instead of a database
        #[arg(long = "catalog")]
        catalog: Option<PathBuf>,

        /// Fraction of the workload to keep
        #[arg(long = "coverage", default_value = "1.0")]
        coverage: f64,

        /// Show at most this many templates
        #[arg(long = "limit")]
        limit: Option<usize>,

        /// Print a random sample of this many logged queries instead of the templates
        #[arg(long = "sample")]
        sample: Option<usize>,

        /// Seed for --sample
        #[arg(long = "seed", requires = "sample")]
        seed: Option<u64>,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
    /// Save a database's schema and parameters for offline runs
    Snapshot {
        /// Write the snapshot to a file instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Do not refresh planner statistics before reading the catalog
        #[arg(long = "skip-analyze", default_value_t = false)]
        skip_analyze: bool,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Generate {
            config_path,
            catalog,
            output,
            skip_analyze,
            connection,
        } => {
            info!("Loading pipeline from: {}", config_path.display());
            let pipeline = PipelineConfig::from_config_file(&config_path)?;

            let snapshot = match catalog {
                Some(path) => CatalogSnapshot::from_file(&path)?,
                None => {
                    let db = match pipeline.connector.clone() {
                        Some(db) => db,
                        None => connection.into_config()?,
                    };
                    fetch_snapshot(&db, skip_analyze).await?
                }
            };

            let engine = RuleEngine::new(&pipeline, snapshot.into_handle())?;
            let report = engine.run()?;

            let reporter = Reporter::new(cli.format);
            match output {
                Some(path) => {
                    let mut out = create_output(&path)?;
                    reporter.write_report(&mut out, &report)?;
                    out.flush()?;
                    info!("Wrote catalog to {}", path.display());
                }
                None => reporter.report(&report)?,
            }
        }
        Commands::Templates {
            log,
            catalog,
            coverage,
            limit,
            sample,
            seed,
            connection,
        } => {
            if let Some(size) = sample {
                let extracted = read_query_log(&log)?;
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let mut out = std::io::stdout().lock();
                for query in extracted.sample(size, &mut rng) {
                    writeln!(out, "{query};")?;
                }
                return Ok(());
            }

            let snapshot = match catalog {
                Some(path) => CatalogSnapshot::from_file(&path)?,
                None => fetch_snapshot(&connection.into_config()?, true).await?,
            };

            let workload = Workload::from_log(&log, &snapshot.tables, coverage)?;
            TemplateReporter::new(cli.format, limit).report(&workload)?;
        }
        Commands::Snapshot {
            output,
            skip_analyze,
            connection,
        } => {
            let snapshot = fetch_snapshot(&connection.into_config()?, skip_analyze).await?;
            let yaml = snapshot.to_yaml()?;
            match output {
                Some(path) => {
                    let mut out = create_output(&path)?;
                    out.write_all(yaml.as_bytes())?;
                    out.flush()?;
                    info!("Wrote snapshot to {}", path.display());
                }
                None => print!("{}", yaml),
            }
        }
    }

    Ok(())
}

async fn fetch_snapshot(config: &DbConfig, skip_analyze: bool) -> anyhow::Result<CatalogSnapshot> {
    let catalog = PgCatalog::connect(config).await?;
    if !skip_analyze {
        info!("Refreshing planner statistics");
        catalog.refresh_stats().await?;
    }
    Ok(catalog.fetch_snapshot().await?)
}

fn create_output(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("failed to create output file {}", path.display()))?;
    Ok(BufWriter::new(file))
}
