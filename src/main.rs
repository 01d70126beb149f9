use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use tilebank::db::Satellite;
use tilebank::export::{export_tiles, ExportFormat};
use tilebank::patches::{accept_all, non_empty};
use tilebank::{discovery, logging};
use tilebank::{Bounds, Config, Crs, DateInput, MaskTask, OverlapResolver, SweepOptions, TileBank};

/// Command line after global options are removed.
struct Cli {
    config_path: Option<PathBuf>,
    command: String,
    args: CommandArgs,
}

/// Positional arguments and `--name value` options of one command.
#[derive(Default)]
struct CommandArgs {
    positional: Vec<String>,
    options: Vec<(String, String)>,
    switches: Vec<String>,
}

/// Options that take no value.
const SWITCHES: &[&str] = &["--skip-empty"];

impl CommandArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = CommandArgs::default();
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            if SWITCHES.contains(&arg.as_str()) {
                parsed.switches.push(arg.clone());
            } else if arg.starts_with("--") {
                let value = args
                    .get(i + 1)
                    .with_context(|| format!("{} requires a value", arg))?;
                parsed.options.push((arg.clone(), value.clone()));
                i += 1;
            } else {
                parsed.positional.push(arg.clone());
            }
            i += 1;
        }
        Ok(parsed)
    }

    fn option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn options(&self, name: &str) -> Vec<&str> {
        self.options
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.option(name).with_context(|| format!("missing {} option", name))
    }

    fn switch(&self, name: &str) -> bool {
        self.switches.iter().any(|s| s == name)
    }

    fn positional(&self, index: usize, what: &str) -> Result<&str> {
        self.positional
            .get(index)
            .map(String::as_str)
            .with_context(|| format!("missing {}", what))
    }

    fn number(&self, name: &str) -> Result<Option<usize>> {
        self.option(name)
            .map(|v| v.parse().with_context(|| format!("{} expects a number, got {:?}", name, v)))
            .transpose()
    }

    fn date(&self) -> Option<DateInput> {
        self.option("--date").map(DateInput::from)
    }
}

fn parse_args() -> Result<Cli> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("tilebank {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            command => {
                return Ok(Cli {
                    config_path,
                    command: command.to_string(),
                    args: CommandArgs::parse(&args[i + 1..])?,
                });
            }
        }
        i += 1;
    }

    print_help();
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"tilebank - catalog of satellite raster tiles, masks and timeseries

USAGE:
    tilebank [OPTIONS] <COMMAND> [ARGS]

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

COMMANDS:
    init                                Create the catalog and storage directory
    satellites                          List known satellites
    add-tile PATH --satellite NAME [--date YYYY-MM-DD]
                                        Catalog one georeferenced raster
    patches PATH --satellite NAME [--date D] [--size N] [--stride N] [--max N]
            [--skip-empty] [--mask PATH --task TASK --mask-type TYPE]
                                        Cut a raster (and optional mask) into tiles
    masks PATH --task TASK --mask-type TYPE
                                        Create masks for every tile a label raster overlaps
    timeseries PATH... --satellite NAME --date D [--date D ...]
                                        Catalog rasters as one timeseries (one date per path)
    overlap MIN_X MIN_Y MAX_X MAX_Y [--crs CRS]
                                        List tiles intersecting a rectangle
    ingest DIR --satellite NAME [--date D]
                                        Catalog every .npy/.tif raster under DIR
    export FILE.csv|FILE.json           Dump the tile catalog

TASKS:
    ntp, field_delineation, perm_structures

ENVIRONMENT:
    TILEBANK_CONFIG     Path to config file (overrides default location)
    TILEBANK_LOG        Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/tilebank/config.toml"#
    );
}

fn main() -> Result<()> {
    let cli = parse_args()?;

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match logging::init(&config.logging) {
        Ok(backend) => debug!(?backend, "logging initialized"),
        Err(e) => eprintln!("Warning: logging disabled: {:#}", e),
    }

    let bank = TileBank::open(&config)
        .with_context(|| format!("Failed to open catalog {}", config.db_path.display()))?;
    info!(command = %cli.command, db = %config.db_path.display(), "tilebank starting");

    let args = &cli.args;
    match cli.command.as_str() {
        "init" => {
            println!("Catalog:  {}", config.db_path.display());
            println!("Storage:  {}", bank.save_dir().display());
            println!("Format:   {}", bank.format().extension());
            println!("Working CRS: {}", bank.working_crs());
        }
        "satellites" => {
            for s in bank.db().all::<Satellite>()? {
                let tiles = bank.db().tiles_for_satellite(s.id)?.len();
                println!(
                    "{:>3}  {:<14} {:>4} cm  {:<6} {} tiles",
                    s.id,
                    s.name,
                    s.resolution,
                    s.kind.as_str(),
                    tiles
                );
            }
        }
        "add-tile" => {
            let path = PathBuf::from(args.positional(0, "raster path")?);
            let satellite = args.required("--satellite")?;
            let outcome = bank.transaction(|uow| {
                bank.add_single_tile_from_path(uow, &path, satellite, args.date(), true)
            })?;
            if outcome.is_created() {
                println!("Added tile {}", outcome.id());
            } else {
                println!("Already cataloged as tile {}", outcome.id());
            }
        }
        "patches" => cmd_patches(&bank, &config, args)?,
        "masks" => {
            let path = PathBuf::from(args.positional(0, "mask raster path")?);
            let task = MaskTask::parse(args.required("--task")?)?;
            let mask_type = args.required("--mask-type")?;
            let outcomes = bank.transaction(|uow| {
                bank.create_masks_for_overlapping_tiles(uow, &path, task, mask_type, None)
            })?;
            for m in &outcomes {
                println!("tile {} -> mask {}", m.tile_id, m.outcome.id());
            }
            let total = bank.db().masks_for_task(task)?.len();
            println!("Created {} masks ({} {} masks cataloged)", outcomes.len(), total, task.as_str());
        }
        "timeseries" => {
            let satellite = args.required("--satellite")?;
            let paths: Vec<PathBuf> = args.positional.iter().map(PathBuf::from).collect();
            let dates: Vec<DateInput> = args.options("--date").into_iter().map(DateInput::from).collect();
            let outcome = bank.transaction(|uow| bank.add_timeseries_from_paths(uow, &paths, satellite, dates))?;
            println!(
                "Timeseries {} with {} tiles",
                outcome.timeseries_id,
                outcome.tiles.len()
            );
        }
        "overlap" => {
            let mut coords = [0.0f64; 4];
            for (i, slot) in coords.iter_mut().enumerate() {
                let raw = args.positional(i, "MIN_X MIN_Y MAX_X MAX_Y")?;
                *slot = raw.parse().with_context(|| format!("not a coordinate: {:?}", raw))?;
            }
            let crs: Crs = match args.option("--crs") {
                Some(text) => text.parse()?,
                None => bank.working_crs().clone(),
            };
            let query = Bounds::new(coords[0], coords[1], coords[2], coords[3]);
            let tiles = OverlapResolver::new(bank.reprojector(), bank.working_crs()).find(bank.db(), &query, &crs)?;
            for t in &tiles {
                println!("{:>6}  {}  {}", t.id, t.date_origin.as_deref().unwrap_or("-"), t.path.display());
            }
            println!("{} tiles", tiles.len());
        }
        "ingest" => cmd_ingest(&bank, args)?,
        "export" => {
            let output = PathBuf::from(args.positional(0, "output file")?);
            let format = ExportFormat::from_path(&output)?;
            let count = export_tiles(bank.db(), &output, format)?;
            println!("Exported {} tiles to {}", count, output.display());
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn sweep_options(config: &Config, args: &CommandArgs) -> Result<SweepOptions> {
    let mut options = SweepOptions::from_config(config);
    if let Some(size) = args.number("--size")? {
        options.patch_size = size;
    }
    if let Some(stride) = args.number("--stride")? {
        options.stride = Some(stride);
    }
    if let Some(max) = args.number("--max")? {
        options.max_patches = Some(max);
    }
    Ok(options)
}

fn cmd_patches(bank: &TileBank, config: &Config, args: &CommandArgs) -> Result<()> {
    let path = PathBuf::from(args.positional(0, "raster path")?);
    let satellite = args.required("--satellite")?;
    let options = sweep_options(config, args)?;
    let skip_empty = args.switch("--skip-empty");

    if let Some(mask) = args.option("--mask") {
        let task = MaskTask::parse(args.required("--task")?)?;
        let mask_type = args.required("--mask-type")?;
        let mask = Path::new(mask);
        let outcomes = bank.transaction(|uow| {
            if skip_empty {
                bank.save_patches_with_masks_from_rasters(
                    uow, &path, mask, satellite, args.date(), task, mask_type, &options, non_empty,
                )
            } else {
                bank.save_patches_with_masks_from_rasters(
                    uow, &path, mask, satellite, args.date(), task, mask_type, &options, accept_all,
                )
            }
        })?;
        let masked = outcomes.iter().filter(|o| o.mask.is_some()).count();
        println!("Stored {} tiles, {} with masks", outcomes.len(), masked);
    } else {
        let outcomes = bank.transaction(|uow| {
            if skip_empty {
                bank.save_patches_from_raster(uow, &path, satellite, args.date(), &options, non_empty)
            } else {
                bank.save_patches_from_raster(uow, &path, satellite, args.date(), &options, accept_all)
            }
        })?;
        println!("Stored {} tiles", outcomes.len());
    }
    Ok(())
}

fn cmd_ingest(bank: &TileBank, args: &CommandArgs) -> Result<()> {
    let dir = PathBuf::from(args.positional(0, "directory")?);
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let satellite = args.required("--satellite")?;
    let rasters = discovery::discover_rasters(&dir);
    info!(dir = %dir.display(), found = rasters.len(), "ingesting rasters");

    let (added, existing) = bank.transaction(|uow| {
        let (mut added, mut existing) = (0usize, 0usize);
        for path in &rasters {
            match bank.add_single_tile_from_path(uow, path, satellite, args.date(), true) {
                Ok(outcome) if outcome.is_created() => added += 1,
                Ok(_) => existing += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping raster");
                    eprintln!("Skipped {}: {}", path.display(), e);
                }
            }
        }
        Ok((added, existing))
    })?;

    println!(
        "Found {} rasters: {} added, {} already cataloged",
        rasters.len(),
        added,
        existing
    );
    Ok(())
}
