//! drstree - command-line front end for the DRS tree builder.
//!
//! `drstree make|remove|latest <action> <dir>...` where `<action>` is one of
//! `list`, `tree`, `todo` or `upgrade`. The shell trace goes to stdout, logs
//! go to stderr (or `--log-file`).

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use drstree_core::config::ScanConfig;
use drstree_core::drs::facets::parse_assignments;
use drstree_core::platform::scratch_cache_path;
use drstree_core::{
    Action, ChecksumAlgorithm, Command, MigrationMode, Orchestrator, ProjectConfig, RunOptions,
    TemplateResolver, Version,
};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, Level};
use tracing_subscriber::FmtSubscriber;

/// Exit code for malformed command lines.
const ARGUMENT_ERROR_EXIT_CODE: i32 = -1;
/// Exit code for errors that abort the whole run.
const FATAL_EXIT_CODE: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "drstree", version)]
#[command(about = "Build and maintain versioned DRS trees")]
struct Cli {
    #[command(subcommand)]
    command: SubCommand,

    /// Only print errors (the todo trace is always printed)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Always colour the summary
    #[arg(long, global = true, conflicts_with = "no_color")]
    color: bool,

    /// Never colour the summary
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Build a new dataset version from incoming files
    Make(MakeArgs),
    /// Remove one version of the datasets under the given directories
    Remove(CommonArgs),
    /// Rebuild the latest links of the datasets under the given directories
    Latest(CommonArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ActionArg {
    /// Summary table per dataset
    List,
    /// Planned DRS tree
    Tree,
    /// Shell commands that upgrade would run
    Todo,
    /// Apply the plan
    Upgrade,
}

impl From<ActionArg> for Action {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::List => Action::List,
            ActionArg::Tree => Action::Tree,
            ActionArg::Todo => Action::Todo,
            ActionArg::Upgrade => Action::Upgrade,
        }
    }
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[arg(value_enum)]
    action: ActionArg,

    /// Incoming directories (make) or DRS directories (remove, latest)
    #[arg(required = true)]
    directories: Vec<PathBuf>,

    /// Root of the DRS tree
    #[arg(long)]
    root: PathBuf,

    /// Version number, e.g. 20250401 or v20250401
    #[arg(long)]
    version: Option<String>,

    /// Number of worker threads
    #[arg(long, default_value_t = ScanConfig::DEFAULT_MAX_PROCESSES)]
    max_processes: usize,

    /// Ignore the cached tree of the previous run
    #[arg(long)]
    rescan: bool,

    /// Write the todo trace into this file
    #[arg(long)]
    commands_file: Option<PathBuf>,

    /// Replace an existing commands file
    #[arg(long)]
    overwrite_commands_file: bool,
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct ModeArgs {
    /// Copy incoming files into the tree
    #[arg(long)]
    copy: bool,

    /// Move incoming files into the tree (default)
    #[arg(long = "move")]
    move_files: bool,

    /// Hard link incoming files into the tree
    #[arg(long)]
    link: bool,

    /// Symlink incoming files into the tree
    #[arg(long)]
    symlink: bool,
}

impl ModeArgs {
    fn mode(&self) -> MigrationMode {
        if self.copy {
            MigrationMode::Copy
        } else if self.link {
            MigrationMode::Hardlink
        } else if self.symlink {
            MigrationMode::Symlink
        } else {
            MigrationMode::Move
        }
    }
}

#[derive(Args, Debug)]
struct MakeArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(flatten)]
    mode: ModeArgs,

    /// Project configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project name, used to find the configuration file
    #[arg(long)]
    project: Option<String>,

    /// Compare sizes only instead of checksums
    #[arg(long)]
    no_checksum: bool,

    /// Checksum algorithm (sha256, sha512, blake3, sha2-256, sha2-512, blake3-multihash)
    #[arg(long)]
    checksum_type: Option<String>,

    /// Precomputed digests, as written by sha256sum
    #[arg(long)]
    checksums_from: Option<PathBuf>,

    /// Salt checksums with the file name
    #[arg(long)]
    checksum_filename: bool,

    /// Only publish files that changed since the version holding them
    #[arg(long)]
    upgrade_from_latest: bool,

    /// File names to skip, one per line
    #[arg(long)]
    ignore_from_incoming: Option<PathBuf>,

    /// File names to drop from latest, one per line (implies --upgrade-from-latest)
    #[arg(long)]
    ignore_from_latest: Option<PathBuf>,

    /// Force a facet value (facet=value)
    #[arg(long = "set-value")]
    set_values: Vec<String>,

    /// Take a facet from another capture group (facet=group)
    #[arg(long = "set-key")]
    set_keys: Vec<String>,
}

/// Colour override; `None` leaves the terminal detection in place.
fn color_choice(cli: &Cli) -> Option<bool> {
    if cli.color {
        Some(true)
    } else if cli.no_color {
        Some(false)
    } else {
        None
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact();

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn parse_version(value: Option<&str>) -> Result<Option<Version>> {
    value
        .map(Version::from_cli)
        .transpose()
        .context("invalid --version")
}

fn base_options(command: Command, common: &CommonArgs, quiet: bool) -> Result<RunOptions> {
    let mut options = RunOptions::new(
        command,
        common.action.into(),
        common.root.clone(),
        common.directories.clone(),
    );
    options.version = parse_version(common.version.as_deref())?;
    options.max_processes = common.max_processes;
    options.rescan = common.rescan;
    options.quiet = quiet;
    options.commands_file = common.commands_file.clone();
    options.overwrite_commands_file = common.overwrite_commands_file;
    options.cache_path = Some(scratch_cache_path());
    Ok(options)
}

fn make_orchestrator(args: &MakeArgs, quiet: bool) -> Result<Orchestrator> {
    let config_path = ProjectConfig::locate(args.config.as_deref(), args.project.as_deref())?;
    let config = ProjectConfig::load(&config_path)?;

    let mut options = base_options(Command::Make, &args.common, quiet)?;
    let version = options.version.clone().unwrap_or_else(Version::today);
    options.version = Some(version.clone());
    options.mode = args.mode.mode();
    options.checksum = if args.no_checksum {
        None
    } else {
        let name = args
            .checksum_type
            .as_deref()
            .or(config.checksum.as_deref())
            .unwrap_or(ScanConfig::DEFAULT_CHECKSUM);
        Some(name.parse::<ChecksumAlgorithm>()?)
    };
    options.checksum_filename = args.checksum_filename || config.checksum_filename;
    options.checksums_from = args.checksums_from.clone();
    options.upgrade_from_latest = args.upgrade_from_latest;
    options.ignore_from_incoming = args.ignore_from_incoming.clone();
    options.ignore_from_latest = args.ignore_from_latest.clone();
    options.filename_filter = config.filename_filter.clone();

    let set_values = parse_assignments(&args.set_values)?;
    let set_keys = parse_assignments(&args.set_keys)?;
    options.resolver_settings = BTreeMap::from([
        ("config".to_string(), config_path.display().to_string()),
        ("template".to_string(), format!("{:?}", config)),
        ("set_values".to_string(), format!("{:?}", set_values)),
        ("set_keys".to_string(), format!("{:?}", set_keys)),
    ]);

    let resolver = TemplateResolver::new(config, version)?
        .with_set_values(set_values)
        .with_set_keys(set_keys);
    Ok(Orchestrator::new(options).with_resolver(Arc::new(resolver)))
}

fn run(cli: &Cli) -> Result<i32> {
    let orchestrator = match &cli.command {
        SubCommand::Make(args) => make_orchestrator(args, cli.quiet)?,
        SubCommand::Remove(common) => {
            Orchestrator::new(base_options(Command::Remove, common, cli.quiet)?)
        }
        SubCommand::Latest(common) => {
            Orchestrator::new(base_options(Command::Latest, common, cli.quiet)?)
        }
    };
    debug!("Run options: {:?}", orchestrator.options());

    let report = orchestrator.run()?;
    eprintln!("{}", report.summary());
    Ok(report.exit_code())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            let _ = e.print();
            std::process::exit(ARGUMENT_ERROR_EXIT_CODE);
        }
    };

    if let Some(enabled) = color_choice(&cli) {
        colored::control::set_override(enabled);
    }

    if let Err(e) = init_logging(&cli) {
        eprintln!("{:#}", e);
        std::process::exit(ARGUMENT_ERROR_EXIT_CODE);
    }

    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(FATAL_EXIT_CODE);
        }
    }
}
