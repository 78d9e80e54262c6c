use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::{Args, Parser, Subcommand};
use descargas_oc::config::Config;
use descargas_oc::errors::{Error, Result};
use descargas_oc::fetch::MailboxConnector;
use descargas_oc::intake::Intake;
use descargas_oc::intake::classify::Classifier;
use descargas_oc::intake::extract::RegexExtractor;
use descargas_oc::pipeline::{CommandHandler, NoHandler, OrderHandler, Pipeline};
use descargas_oc::report::Reporter;
use descargas_oc::report::smtp::LettreSubmitter;
use descargas_oc::report::snapshot::Snapshot;
use descargas_oc::state::StateStore;
use dotenv::dotenv;
use tracing::{debug, error, info, info_span};
use tracing_subscriber::EnvFilter;

/// Name announced to the submission server.
const HELLO: &str = "localhost";

/// Downloads purchase orders announced by mail and reports on them.
#[derive(Debug, Parser)]
#[command(name = "descargas-oc", version, about)]
struct Cli {
    /// Configuration file [default: $CONFIG_PATH or data/config.json]
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// What to do
    #[command(subcommand)]
    command: Command,
}

/// Commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Scans once and prints the accepted orders as JSON.
    Scan,
    /// Runs one full cycle: scan, handle, report, commit.
    Run(CycleArgs),
    /// Runs a cycle every `scan_interval` seconds.
    Watch(CycleArgs),
    /// Shows the cursor, the processed count and the orders in flight.
    Status,
}

/// Options of a cycle.
#[derive(Debug, Args)]
struct CycleArgs {
    /// Label shown in the report
    #[arg(long)]
    category: Option<String>,
    /// Program run as `PROGRAM <numero> <fecha_aut> <fecha_orden>` for each
    /// order; exit status 0 means the documents were uploaded
    #[arg(long)]
    handler: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenv().ok();
    init_tracing();

    let config = Config::load(cli.config.as_deref()).map_err(Error::from);
    match config.and_then(|config| run(&config, cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Logs to stderr, filtered by `RUST_LOG`, at `info` level by default or
/// `debug` when `DEBUG=1`.
fn init_tracing() {
    let default = default_level(std::env::var("DEBUG").ok().as_deref());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Log level used when `RUST_LOG` is not set.
fn default_level(debug: Option<&str>) -> &'static str {
    if debug.is_some_and(|debug| debug.trim() == "1") {
        "debug"
    } else {
        "info"
    }
}

/// Builds the intake from the configuration.
fn intake(config: &Config, connector: Arc<dyn MailboxConnector>) -> Result<Intake> {
    let classifier = Classifier::new(config.accepted_senders(), Box::new(RegexExtractor::new()?))?;
    debug!(senders = ?classifier.as_accepted_senders(), "accepted senders");
    Ok(Intake::new(
        connector,
        StateStore::open(config.data_dir.clone()),
        classifier,
        config.batch_size,
        config.max_threads,
        info_span!("intake"),
    ))
}

/// Builds the whole pipeline from the configuration.
fn pipeline(config: &Config, args: CycleArgs) -> Result<Pipeline> {
    let connector = config.mailbox_connector()?;
    let intake = intake(config, Arc::clone(&connector))?;
    let reporter = Reporter::new(
        config.reporter_settings(),
        Box::new(LettreSubmitter::new(HELLO, config.timeout())),
        Some(connector),
        info_span!("report"),
    );
    let handler: Box<dyn OrderHandler> = match args.handler {
        Some(program) => Box::new(CommandHandler::new(program)),
        None => Box::new(NoHandler),
    };
    let pipeline = Pipeline::new(
        intake,
        reporter,
        handler,
        Snapshot::new(config.data_dir.clone()),
        config.correo_reporte.clone(),
        info_span!("cycle"),
    );
    Ok(match args.category {
        Some(category) => pipeline.with_category(category),
        None => pipeline,
    })
}

/// Executes a command.
fn run(config: &Config, command: Command) -> Result {
    match command {
        Command::Scan => {
            let mut intake = intake(config, config.mailbox_connector()?)?;
            let outcome = intake.scan()?;
            println!("{}", serde_json::to_string_pretty(&outcome.orders)?);
        }
        Command::Run(args) => {
            let outcome = pipeline(config, args)?.run_cycle()?;
            info!(
                delivered = outcome.delivered,
                uploaded = outcome.succeeded.len(),
                missing = outcome.missing.len(),
                failed = outcome.failed,
                "cycle finished"
            );
        }
        Command::Watch(args) => {
            let mut pipeline = pipeline(config, args)?;
            let interval = config.scan_interval();
            info!(seconds = interval.as_secs(), "watching mailbox");
            loop {
                match pipeline.run_cycle() {
                    Ok(outcome) => info!(
                        delivered = outcome.delivered,
                        uploaded = outcome.succeeded.len(),
                        missing = outcome.missing.len(),
                        failed = outcome.failed,
                        "cycle finished"
                    ),
                    Err(err) => error!("cycle failed: {err}"),
                }
                thread::sleep(interval);
            }
        }
        Command::Status => {
            let mut store = StateStore::open(config.data_dir.clone());
            let (cursor, processed) = store.load();
            let in_flight = Snapshot::new(config.data_dir.clone()).load()?;
            println!("cursor: {}", cursor.as_token().map_or("(none)", |token| token.as_str()));
            println!("processed: {}", processed.len());
            println!("set aside: {}", store.as_set_aside().len());
            match in_flight {
                Some(orders) => {
                    println!("in flight: {} order(s)", orders.len());
                    for order in orders {
                        println!("  - {} ({})", order.numero, order.token);
                    }
                }
                None => println!("in flight: none"),
            }
        }
    }
    Ok(())
}
