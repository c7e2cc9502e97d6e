use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use route_filler::config::PlannerConfig;
use route_filler::memory_store::MemoryStore;
use route_filler::model::Coordinate;
use route_filler::orchestrator::Orchestrator;
use route_filler::prospect::plan_prospect_routes;

#[derive(Parser, Debug)]
#[command(name = "route-filler", version, about = "Fill and sequence daily sales routes")]
struct Cli {
    /// Log filter, e.g. `info` or `route_filler=debug`. `RUST_LOG` wins when set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich and sequence every unit in a dataset.
    Run(RunArgs),
    /// Cluster and sequence a zone's prospects into standalone routes.
    Prospects(ProspectArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[arg(long)]
    dataset: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the persisted stop rows.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Where to write one report per persisted unit, scenario included.
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    distributor: Option<String>,

    #[arg(long)]
    agent: Option<String>,

    #[arg(long)]
    date: Option<NaiveDate>,

    #[arg(long, requires = "start_lon")]
    start_lat: Option<f64>,

    #[arg(long, requires = "start_lat")]
    start_lon: Option<f64>,

    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct ProspectArgs {
    #[arg(long)]
    dataset: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    zone: String,

    /// Optional distributor whose depot starts every route.
    #[arg(long)]
    distributor: Option<String>,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct PlannedStop<'a> {
    id: &'a str,
    position: u32,
    coordinate: Option<Coordinate>,
}

#[derive(Serialize)]
struct PlannedRoute<'a> {
    cluster: usize,
    zone: Option<&'a str>,
    undersized: bool,
    length_km: f64,
    stops: Vec<PlannedStop<'a>>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn load_config(path: Option<&Path>) -> Result<PlannerConfig, String> {
    PlannerConfig::load(path).map_err(|e| e.to_string())
}

fn load_dataset(path: &Path) -> Result<MemoryStore, String> {
    MemoryStore::load_json(path).map_err(|e| format!("cannot load dataset: {e}"))
}

fn run(args: RunArgs) -> Result<(), String> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.distributor.is_some() {
        config.filter.distributor = args.distributor;
    }
    if args.agent.is_some() {
        config.filter.agent = args.agent;
    }
    if args.date.is_some() {
        config.filter.date = args.date;
    }
    if let (Some(lat), Some(lon)) = (args.start_lat, args.start_lon) {
        config.start = Some(Coordinate::new(lat, lon));
    }
    config.dry_run |= args.dry_run;
    config.validate().map_err(|e| e.to_string())?;

    let store = load_dataset(&args.dataset)?;
    let distances = Arc::new(config.distance.build_provider().map_err(|e| e.to_string())?);

    let summary = Orchestrator::new(store.clone(), config, distances)
        .run()
        .map_err(|e| format!("cannot list units: {e}"))?;
    summary.log();

    if let Some(output) = &args.output {
        store.export_json(output).map_err(|e| format!("cannot write {}: {e}", output.display()))?;
    }
    if let Some(path) = &args.report {
        write_json(path, &summary.reports)?;
    }

    print_json(&summary)
}

fn prospects(args: ProspectArgs) -> Result<(), String> {
    let config = load_config(args.config.as_deref())?;
    config.validate().map_err(|e| e.to_string())?;

    let store = load_dataset(&args.dataset)?;
    let distances = config.distance.build_provider().map_err(|e| e.to_string())?;
    let depot = config
        .start
        .or_else(|| args.distributor.as_deref().and_then(|d| store.depot(d)));

    let pool = store.prospect_pool(Some(args.zone.as_str()));
    let tour_options = config.tour_options();
    let routes = plan_prospect_routes(&pool, &config.cluster, &tour_options, &distances, depot)
        .map_err(|e| e.to_string())?;
    info!(zone = %args.zone, routes = routes.len(), "prospect routes planned");

    let planned: Vec<PlannedRoute<'_>> = routes
        .iter()
        .map(|route| PlannedRoute {
            cluster: route.cluster.id,
            zone: route.cluster.zone.as_deref(),
            undersized: route.cluster.undersized,
            length_km: route.tour.length_km,
            stops: route
                .tour
                .entries
                .iter()
                .map(|entry| PlannedStop {
                    id: &entry.point.id,
                    position: entry.position,
                    coordinate: entry.point.coordinate,
                })
                .collect(),
        })
        .collect();

    match &args.output {
        Some(path) => write_json(path, &planned),
        None => print_json(&planned),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let file = File::create(path).map_err(|e| format!("cannot write {}: {e}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|e| e.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(|e| e.to_string())?;
    writeln!(stdout).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Prospects(args) => prospects(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}
