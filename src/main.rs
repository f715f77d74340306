use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use mapify::config::{default_config_path, Config, FocusSize, FocusType, MapConfig};
use mapify::db::{
    self, create_database, enforce_schema_version, ensure_database, get_schema_version,
    latest_available_version, load_markers, load_places, upgrade_database, PopulationRegistry,
    TargetVersion,
};
use mapify::enrich::{enrich_records, Enricher, WorkerPool};
use mapify::grouping::group_places;
use mapify::input::read_records;
use mapify::links::{HttpResolver, LinkResolver, NoResolve};
use mapify::models::{GeoPoint, Place};
use mapify::progress::{create_spinner, format_duration, set_log_only};
use mapify::render::{
    build_view, markers_from_groups, render_document, save_map, FocusOverrides, LeafletRenderer,
    MapMarker,
};
use mapify::safety::validate_output_path;

const LOG_FILE_NAME: &str = "mapify.log";
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "mapify")]
#[command(about = "Plot Google Maps links as grouped markers on an HTML map")]
struct Cli {
    /// Configuration profile (default: configs/mapify.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Named instance; selects configs/mapify_<instance>.toml
    #[arg(long, global = true)]
    instance: Option<String>,

    /// Also write logs to <dir>/mapify.log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    /// Hide progress bars and report progress in the log instead
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render places to an HTML map
    Plot(PlotArgs),
    /// Enrich places and merge them into the database
    Load {
        /// `;;`-separated input file
        csv: PathBuf,
    },
    /// Manage the database schema
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Args)]
struct PlotArgs {
    /// `<csv> <output>`, or only `<output>` with --from-db
    #[arg(required = true, num_args = 1..=2, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Render the markers stored in the database
    #[arg(long)]
    from_db: bool,

    /// Override focus_type (first, last or centre)
    #[arg(long)]
    focus_type: Option<FocusType>,

    /// Override focus_size (zoom level above 1, or "fit")
    #[arg(long)]
    focus_size: Option<FocusSize>,
}

#[derive(Subcommand)]
enum DbCommand {
    /// Create the database (default: latest schema version)
    Create {
        #[arg(long)]
        version: Option<u32>,
    },
    /// Upgrade the database from its current version
    Upgrade {
        /// Target version (default: latest available)
        #[arg(long)]
        to: Option<u32>,
    },
    /// Show the current schema version and the ledger
    Version,
}

fn init_logging(level: &str, logs_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let file_layer = match logs_dir {
        Some(dir) => {
            fs::create_dir_all(dir).context("Failed to create logs directory")?;
            let file = File::options()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE_NAME))
                .context("Failed to open log file")?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn enrich(map: &MapConfig, csv: &Path) -> Result<Vec<Place>> {
    let records = read_records(csv)?;
    let resolver: Box<dyn LinkResolver> = if map.resolve_short_links {
        Box::new(HttpResolver::new(RESOLVE_TIMEOUT)?)
    } else {
        Box::new(NoResolve)
    };
    let pool = WorkerPool::new(map.workers)?;
    let enricher = Enricher::new(resolver.as_ref(), map.marker_colour);
    info!("Enriching {} record(s) on {} worker(s)", records.len(), pool.workers());
    Ok(enrich_records(records, &pool, &enricher)?)
}

fn plot_from_csv(config: &Config, csv: &Path, output: &Path, overrides: FocusOverrides) -> Result<()> {
    let db_path = config.database.path();
    let target = validate_output_path(output, &[csv, db_path.as_path()])?;

    let places = enrich(&config.map, csv)?;
    let groups = group_places(&places, config.map.group_threshold);
    let focus_type = overrides.focus_type.unwrap_or(config.map.focus_type);
    let markers = markers_from_groups(&groups, &config.map, focus_type);
    let focus: Vec<GeoPoint> = places.iter().map(|p| p.location).collect();

    let view = build_view(&focus, markers, &config.map, overrides)?;
    let html = render_document(&LeafletRenderer, &view, &config.map.title);
    save_map(&html, &target)?;
    Ok(())
}

fn plot_from_db(config: &Config, output: &Path, overrides: FocusOverrides) -> Result<()> {
    let db_path = config.database.path();
    let target = validate_output_path(output, &[db_path.as_path()])?;

    let conn = db::connect(&config.database)?;
    enforce_schema_version(&conn, TargetVersion::Latest, &config.database.schema_dir)?;
    let markers: Vec<MapMarker> = load_markers(&conn)?
        .iter()
        .map(|m| m.map_marker(&config.map))
        .collect();
    let focus: Vec<GeoPoint> = markers.iter().map(|m| m.location).collect();

    let view = build_view(&focus, markers, &config.map, overrides)?;
    let html = render_document(&LeafletRenderer, &view, &config.map.title);
    save_map(&html, &target)?;
    Ok(())
}

fn plot(config: &Config, args: PlotArgs) -> Result<()> {
    let overrides = FocusOverrides {
        focus_type: args.focus_type,
        focus_size: args.focus_size,
    };
    match (args.from_db, args.paths.as_slice()) {
        (false, [csv, output]) => plot_from_csv(config, csv, output, overrides),
        (true, [output]) => plot_from_db(config, output, overrides),
        (false, _) => bail!("plot expects <csv> <output>"),
        (true, _) => bail!("plot --from-db expects only <output>"),
    }
}

fn load(config: &Config, csv: &Path) -> Result<()> {
    let places = enrich(&config.map, csv)?;
    let registry = PopulationRegistry::builtin();
    let mut conn = ensure_database(&config.database, TargetVersion::Latest, &registry)?;
    let summary = load_places(&mut conn, &places, &config.map)?;
    println!(
        "Loaded {} place(s) into {}: {} new marker(s), {} merged, {} already stored",
        summary.inserted,
        config.database.path().display(),
        summary.new_markers,
        summary.merged,
        summary.skipped
    );
    Ok(())
}

fn db_command(config: &Config, command: DbCommand) -> Result<()> {
    let registry = PopulationRegistry::builtin();
    match command {
        DbCommand::Create { version } => {
            let spinner = create_spinner("Creating database");
            let created = create_database(&config.database, version, &registry);
            spinner.finish_and_clear();
            println!("Created {} at v{}", config.database.path().display(), created?);
        }
        DbCommand::Upgrade { to } => {
            let conn = db::connect(&config.database)?;
            let Some(current) = get_schema_version(&conn)? else {
                bail!("Database has no schema version; run `mapify db create` first");
            };
            drop(conn);
            let to = match to {
                Some(v) => v,
                None => latest_available_version(&config.database.schema_dir)?,
            };
            if current == to {
                warn!("Database is already at v{}", to);
                return Ok(());
            }
            let spinner = create_spinner("Upgrading database");
            let upgraded = upgrade_database(&config.database, current, to, &registry);
            spinner.finish_and_clear();
            upgraded?;
            println!("Upgraded {} from v{} to v{}", config.database.path().display(), current, to);
        }
        DbCommand::Version => {
            let conn = db::connect(&config.database)?;
            match get_schema_version(&conn)? {
                Some(v) => println!("v{}", v),
                None => println!("no schema"),
            }
            for row in db::migrate::applied_versions(&conn)? {
                println!("  v{:<4} {}  {}", row.version, row.applied_at, row.description);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    set_log_only(cli.log_only);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(cli.instance.as_deref()));
    let config = Config::load(&config_path);
    let level = config.as_ref().map_or("info", |c| c.logs.level.as_str());
    init_logging(level, cli.logs_dir.as_deref())?;
    let config = config.with_context(|| format!("Failed to load config {}", config_path.display()))?;

    let start = Instant::now();
    let result = match cli.command {
        Command::Plot(args) => plot(&config, args),
        Command::Load { csv } => load(&config, &csv),
        Command::Db { command } => db_command(&config, command),
    };

    match &result {
        Ok(()) => info!("Finished in {}", format_duration(start.elapsed())),
        Err(e) => error!("{:#}", e),
    }
    result
}
