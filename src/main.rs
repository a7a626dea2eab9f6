use eddblink_sync::{
    cli::{Cli, Commands},
    download::{CacheManager, SourceFetcher},
    error::Error,
    options::{Modifier, OptionSet, OPTION_HELP},
    state::StalenessTracker,
    writer::SqliteStore,
    ConsoleUi, Orchestrator, SyncConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Instant;

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,reqwest=info,hyper=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn resolve_db(db: Option<PathBuf>, cache: &CacheManager) -> PathBuf {
    db.unwrap_or_else(|| cache.db_path())
}

fn run(cli: Cli) -> Result<u8, Error> {
    match cli.command {
        Commands::Sync {
            options,
            db,
            data_dir,
            config,
            no_export,
        } => {
            let start = Instant::now();
            let options = OptionSet::parse(&options)?;
            let config = SyncConfig::load_or_default(config.as_deref())?;

            let cache = CacheManager::new(data_dir)?;
            let db_path = resolve_db(db, &cache);
            let store = SqliteStore::open(&db_path)?.with_batch_size(config.batch_size);
            let fetcher = SourceFetcher::from_config(&config, false)?;

            let mut ui = ConsoleUi::new(options.has(Modifier::ProgBar));
            if cli.quiet {
                ui = ui.quiet();
            }

            let mut orchestrator = Orchestrator::new(store, fetcher, config)
                .with_lock(&db_path)
                .with_cache(cache);
            if !no_export {
                if let Some(dir) = db_path.parent() {
                    orchestrator = orchestrator.with_export(dir);
                }
            }

            // First interrupt stops at the next domain boundary, the second exits
            let abort = orchestrator.abort_handle();
            if let Err(e) = ctrlc::set_handler(move || {
                if abort.swap(true, Ordering::SeqCst) {
                    std::process::exit(130);
                }
                eprintln!("Interrupted: stopping after the current domain");
            }) {
                tracing::warn!("Could not install the interrupt handler: {}", e);
            }

            let report = orchestrator.run(&options, &mut ui)?;

            if !cli.quiet {
                println!(
                    "\nSynchronized {:?} in {:.1}s",
                    db_path,
                    start.elapsed().as_secs_f64()
                );
            }
            Ok(report.exit_code())
        }

        Commands::Status { db, data_dir } => {
            let cache = CacheManager::new(data_dir)?;
            let db_path = resolve_db(db, &cache);
            let store = SqliteStore::open(&db_path)?;
            if !store.is_initialized()? {
                println!("{:?} has never been synchronized", db_path);
                return Ok(0);
            }

            let records = StalenessTracker::list(store.conn())?;
            if records.is_empty() {
                println!("No feed has been applied yet");
            }
            for record in records {
                let token = record
                    .token
                    .and_then(|t| eddblink_sync::parser::format_timestamp(t.0))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<32} dump {:<19}  applied {}",
                    record.key, token, record.applied_at
                );
            }
            Ok(0)
        }

        Commands::Options => {
            println!("Available options:\n");
            for (name, help) in OPTION_HELP {
                println!("  {:<9} {}", name, help);
            }
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            if let Some(hint) = e.hint() {
                eprintln!("Error: {e}\n  Hint: {hint}");
            } else {
                eprintln!("Error: {e}");
            }
            ExitCode::from(e.exit_code())
        }
    }
}
