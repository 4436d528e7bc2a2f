use cdc_config::{Config, Overrides};
use cdc_metadata::{Database, MetadataHandle, Repository};
use cdc_storage::BackendHandle;
use cdc_storage::backend::{LocalBackend, ReadOnlyBackend};
use cdc_unpack::error::ErrorKind as UnpackErrorKind;
use cdc_unpack::{Context, EvidenceIndex, RootPass, RunReport, UnpackRoutine};
use clap::Parser;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const EXIT_FAILURES: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "cdc-unpacker")]
#[command(about = "Unpack establishment document archives into the destination share")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, short, env = "CDC_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    source_root: Option<PathBuf>,
    #[arg(long)]
    source_share: Option<String>,
    #[arg(long)]
    destination_root: Option<PathBuf>,
    #[arg(long)]
    destination_share: Option<String>,
    /// SQLite metadata database.
    #[arg(long)]
    database: Option<PathBuf>,
    /// Evidence identifier CSV.
    #[arg(long)]
    evidence: Option<PathBuf>,
    #[arg(long, short = 'j')]
    degree_of_parallelism: Option<u8>,
    #[arg(long)]
    logs_directory: Option<PathBuf>,
    /// Walk and extract everything, but upload and record nothing.
    #[arg(long)]
    dry_run: bool,
}
impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            source_root: self.source_root.clone(),
            source_share: self.source_share.clone(),
            destination_root: self.destination_root.clone(),
            destination_share: self.destination_share.clone(),
            database: self.database.clone(),
            evidence: self.evidence.clone(),
            degree_of_parallelism: self.degree_of_parallelism,
            logs_directory: self.logs_directory.clone(),
            dry_run: self.dry_run.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref(), cli.overrides()) {
        Ok(config) => config,
        Err(e) => return fatal(format!("{e:?}")),
    };
    if let Err(report) = init_logging(&config.logs_directory) {
        return fatal(format!("{report:?}"));
    }
    if config.delete_from_target {
        tracing::warn!("delete_from_target is set but nothing is ever deleted from the destination");
    }

    let ct = CancellationToken::new();
    let interrupt = ct.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; letting in-flight establishments wind down");
            interrupt.cancel();
        }
    });

    match run(config, &ct).await {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(report) => {
            for failure in &report.failures {
                tracing::error!(root = %failure.root, directory = %failure.directory, error = ?failure.error, "Establishment failed");
            }
            ExitCode::from(EXIT_FAILURES)
        },
        Err(report) => {
            tracing::error!("{report}");
            eprintln!("{report:?}");
            ExitCode::from(EXIT_FATAL)
        },
    }
}

fn fatal(message: String) -> ExitCode {
    eprintln!("{:?}", miette::Report::msg(message));
    ExitCode::from(EXIT_FATAL)
}

/// Console logging on stderr plus a plain-text log file for this run.
fn init_logging(logs_directory: &Path) -> miette::Result<()> {
    std::fs::create_dir_all(logs_directory)
        .map_err(|e| miette::miette!("could not create logs directory {}: {e}", logs_directory.display()))?;
    let path = logs_directory.join(format!("cdc-unpacker-{}.log", OffsetDateTime::now_utc().unix_timestamp()));
    let file = File::create(&path).map_err(|e| miette::miette!("could not create log file {}: {e}", path.display()))?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .map_err(|e| miette::miette!("could not install logging: {e}"))?;
    tracing::info!(path = %path.display(), "Logging to file");
    Ok(())
}

async fn run(config: Config, ct: &CancellationToken) -> miette::Result<RunReport> {
    let source_path = std::path::absolute(config.source.path())
        .map_err(|e| miette::miette!("invalid source path {}: {e}", config.source.path().display()))?;
    let destination_path = std::path::absolute(config.destination.path())
        .map_err(|e| miette::miette!("invalid destination path {}: {e}", config.destination.path().display()))?;
    let source: BackendHandle =
        Arc::new(LocalBackend::new("source", &source_path).map_err(|e| miette::miette!("{e:?}"))?);
    let mut destination: BackendHandle =
        Arc::new(LocalBackend::new("destination", &destination_path).map_err(|e| miette::miette!("{e:?}"))?);
    if config.dry_run {
        tracing::warn!("Dry run; nothing will be uploaded or recorded");
        destination = Arc::new(ReadOnlyBackend::new(destination));
    }

    let site_visit_date = config.metadata.site_visit_date().map_err(|e| miette::miette!("{e:?}"))?;
    let database = Database::connect(&config.metadata.database).await.map_err(|e| miette::miette!("{e:?}"))?;
    let metadata: MetadataHandle = Arc::new(
        Repository::new(database.pool().clone(), config.dry_run)
            .with_supplier_key(config.metadata.supplier_key.clone())
            .with_site_visit_date(site_visit_date),
    );
    let evidence = EvidenceIndex::load(&config.evidence).map_err(|e| miette::miette!("{e:?}"))?;

    let passes = config
        .passes
        .iter()
        .map(|pass| RootPass {
            directory: pass.directory.clone(),
            filter_by_category: pass.filter_by_category,
            append_only_if_missing: pass.append_only_if_missing,
            carry_from: pass.carry_from.clone(),
        })
        .collect();
    let ctx = Context { source, destination, metadata, evidence: Arc::new(evidence) };
    let routine = UnpackRoutine::new(ctx, passes, config.degree_of_parallelism);

    let mut status = routine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "Status printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = routine.run(ct).await;
    drop(routine);
    _ = printer.await;
    database.close().await;

    match result {
        Ok(report) => {
            for pass in &report.passes {
                tracing::info!(
                    root = %pass.root,
                    discovered = pass.discovered,
                    eligible = pass.eligible,
                    succeeded = pass.succeeded,
                    failed = pass.failed,
                    "Pass summary"
                );
            }
            Ok(report)
        },
        Err(e) if matches!(&*e, UnpackErrorKind::Cancelled) => Err(miette::miette!("run cancelled")),
        Err(e) => Err(miette::miette!("{e:?}")),
    }
}
