use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use refsketch::app::{App, ProgressSink, RunReport};
use refsketch::cancel::CancelFlag;
use refsketch::config::{ConfigLoader, Overrides, Settings};
use refsketch::error::RefsketchError;
use refsketch::mash::MashTool;
use refsketch::merge::MergeReport;
use refsketch::output::{JsonOutput, LogProgress, OutputMode};
use refsketch::remote::{HttpArchive, HttpArchiveFactory};
use refsketch::store::Store;
use refsketch::taxonomy::{TaxdumpFetcher, TaxonkitClassifier};
use refsketch::tools::Toolchain;

#[derive(Parser)]
#[command(name = "refsketch")]
#[command(about = "Download reference genomes by taxonomic group and keep a mash sketch index of them")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON instead of a text summary
    #[arg(long, global = true)]
    json: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Classify a genome list, download every genome and update the sketch index")]
    Build(BuildArgs),
    #[command(about = "Merge sketches left in <output>/mash/tmp into the global index")]
    Merge(MergeArgs),
    #[command(about = "Show the external tools that were found")]
    Tools(ToolsArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Genome list, TSV: accession, assembly name, taxid
    #[arg(short = 'e', long = "eukaryote-list")]
    catalog: PathBuf,

    /// Output directory for downloads, ledgers and sketches
    #[arg(short, long)]
    output: PathBuf,

    /// JSON settings file (default: <output>/refsketch.json if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Existing NCBI taxdump directory; skips downloading one
    #[arg(long)]
    taxdump: Option<PathBuf>,

    #[arg(long)]
    sketch_size: Option<u32>,

    /// Maximum number of URL resolution passes
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Delay between remote directory listings, in milliseconds
    #[arg(long)]
    request_delay_ms: Option<u64>,
}

#[derive(Args)]
struct MergeArgs {
    #[arg(short, long)]
    output: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ToolsArgs {
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<RefsketchError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RefsketchError) -> u8 {
    match error {
        RefsketchError::CatalogRead(_)
        | RefsketchError::ConfigRead(_)
        | RefsketchError::ConfigParse(_)
        | RefsketchError::InvalidConfig(_) => 2,
        RefsketchError::RemoteHttp(_)
        | RefsketchError::RemoteStatus { .. }
        | RefsketchError::ResolutionExhausted { .. }
        | RefsketchError::MissingTool(_)
        | RefsketchError::ToolFailed { .. }
        | RefsketchError::Classification(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Build(args) => run_build(args, mode),
        Commands::Merge(args) => run_merge(args, mode),
        Commands::Tools(args) => run_tools(args, mode),
    }
}

fn open_store(output: PathBuf) -> miette::Result<Store> {
    let output = std::path::absolute(&output).into_diagnostic()?;
    fs::create_dir_all(&output).map_err(|err| {
        RefsketchError::Filesystem(format!("create {}: {err}", output.display()))
    })?;
    Ok(Store::from_path(output)?)
}

fn utf8(path: PathBuf) -> miette::Result<Utf8PathBuf> {
    let path = std::path::absolute(&path).into_diagnostic()?;
    Utf8PathBuf::from_path_buf(path).map_err(|path| {
        RefsketchError::Filesystem(format!("non-utf8 path: {}", path.display())).into()
    })
}

fn sink_for(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &LogProgress,
    }
}

fn run_build(args: BuildArgs, mode: OutputMode) -> miette::Result<()> {
    let store = open_store(args.output)?;
    let overrides = Overrides {
        sketch_size: args.sketch_size,
        max_resolve_attempts: args.max_attempts,
        request_delay_ms: args.request_delay_ms,
    };
    let settings =
        ConfigLoader::resolve(args.config.as_deref(), store.root().as_std_path(), &overrides)?;

    let tools = Toolchain::discover(&settings.tools);
    let mash = tools.require_mash()?.to_path_buf();
    let taxonkit = tools.require_taxonkit()?.to_path_buf();
    let catalog = utf8(args.catalog)?;

    let (taxdump_dir, fetched) = match args.taxdump {
        Some(dir) => (utf8(dir)?, false),
        None => {
            let tar = tools.require_tar()?.to_path_buf();
            let archive = HttpArchive::new(&settings).map_err(RefsketchError::from)?;
            let dir = store.taxdump_dir();
            TaxdumpFetcher::new(&archive, tar).fetch(&settings.taxdump_url, &dir)?;
            (dir, true)
        }
    };

    let cancel = CancelFlag::new();
    cancel.cancel_on_interrupt()?;
    let app = build_app(store, &settings, mash).with_cancel_flag(cancel);
    let sink = sink_for(mode);

    let classifier = TaxonkitClassifier::new(taxonkit, taxdump_dir.clone());
    let classified = app.classify(&catalog, &classifier, sink);
    if fetched {
        if let Err(err) = fs::remove_dir_all(taxdump_dir.as_std_path()) {
            warn!(dir = %taxdump_dir, "could not remove taxonomy dump: {err}");
        }
    }
    let (grouped, stats) = classified?;

    let report = app.index(&grouped, stats, sink)?;
    match mode {
        OutputMode::Json => JsonOutput::print_run(&report).into_diagnostic()?,
        OutputMode::Text => print_run_summary(&report),
    }
    Ok(())
}

fn run_merge(args: MergeArgs, mode: OutputMode) -> miette::Result<()> {
    let store = open_store(args.output)?;
    let settings = ConfigLoader::resolve(
        args.config.as_deref(),
        store.root().as_std_path(),
        &Overrides::default(),
    )?;
    let mash = Toolchain::discover(&settings.tools)
        .require_mash()?
        .to_path_buf();

    let app = build_app(store, &settings, mash);
    let report = app.merge(sink_for(mode))?;
    match mode {
        OutputMode::Json => JsonOutput::print_merge(&report).into_diagnostic()?,
        OutputMode::Text => print_merge_summary(&report),
    }
    Ok(())
}

fn run_tools(args: ToolsArgs, mode: OutputMode) -> miette::Result<()> {
    let settings = match args.config {
        Some(path) => {
            let dir = path.parent().map(PathBuf::from).unwrap_or_default();
            ConfigLoader::resolve(Some(path.as_path()), &dir, &Overrides::default())?
        }
        None => Settings::default(),
    };
    let info = Toolchain::discover(&settings.tools).info();
    match mode {
        OutputMode::Json => JsonOutput::print_tools(&info).into_diagnostic()?,
        OutputMode::Text => {
            for tool in &info {
                match (&tool.path, &tool.version) {
                    (Some(path), Some(version)) => println!("{:<9} {path} ({version})", tool.name),
                    (Some(path), None) => println!("{:<9} {path}", tool.name),
                    (None, _) => println!("{:<9} not found", tool.name),
                }
            }
        }
    }
    Ok(())
}

fn build_app(
    store: Store,
    settings: &Settings,
    mash: PathBuf,
) -> App<HttpArchiveFactory, MashTool> {
    let factory = HttpArchiveFactory::new(settings.clone());
    let sketcher = MashTool::new(mash, settings.sketch_size);
    App::new(store, settings.clone(), factory, sketcher)
}

fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}refsketch summary ({}){reset}", report.output_dir);
    println!(
        "{green}catalog: {} rows, {} groups, {} unclassified{reset}",
        report.catalog.rows, report.groups, report.catalog.unclassified
    );
    println!(
        "{green}resolved: {} (no URL: {}, previously excluded: {}, passes: {}){reset}",
        report.resolve.resolved,
        report.resolve.unresolvable,
        report.resolve.previously_excluded,
        report.resolve.attempts
    );
    println!(
        "{green}sketched: {} (already downloaded: {}){reset}",
        report.sketched, report.already_downloaded
    );
    if report.cancelled {
        println!("{yellow}run was cancelled; rerun with the same output directory to resume{reset}");
    }
    if !report.failures.is_empty() {
        println!("{yellow}failures: {}{reset}", report.failures.len());
        for entry in &report.failures {
            println!("{yellow}   {} {:?}{reset}", entry.accession, entry.outcome);
        }
    }
    print_merge_summary(&report.merge);
}

fn print_merge_summary(report: &MergeReport) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    if report.groups.is_empty() {
        println!("{cyan}global index unchanged{reset}");
        return;
    }
    for group in &report.groups {
        println!(
            "{cyan}{} {:?}: +{} sketches{reset}",
            group.group, group.action, group.sketches
        );
    }
}
