use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use autoreview_core::cache::LruBlockCache;
use autoreview_core::checks::CheckId;
use autoreview_core::config::{
    AutoreviewConfig, EnabledChecksPatch, load_config, patch_enabled_checks,
};
use autoreview_core::mediawiki::{MediaWikiClient, MediaWikiClientConfig};
use autoreview_core::pipeline::{PageEvaluation, PageEvaluator};
use autoreview_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use autoreview_core::store::{ContentStore, MemoryContentStore, SqliteContentStore};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "autoreview",
    version,
    about = "Dry-run autoreview decisions for FlaggedRevs pending changes"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Log check-level detail to stderr")]
    verbose: bool,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the state directory and a commented default config")]
    Init(InitArgs),
    #[command(about = "List the check catalog with priorities and enabled marks")]
    Checks,
    #[command(about = "Enable or disable checks in policy.enabled_checks")]
    Configure(ConfigureArgs),
    Config(ConfigArgs),
    #[command(about = "List pages with changes awaiting review")]
    Pending(PendingArgs),
    #[command(about = "Evaluate every pending revision of the given pages")]
    Evaluate(EvaluateArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct ConfigureArgs {
    #[arg(long, value_name = "CHECK_ID")]
    enable: Vec<String>,
    #[arg(long, value_name = "CHECK_ID")]
    disable: Vec<String>,
    #[arg(long, help = "Clear the list so the default catalog applies")]
    reset: bool,
    #[arg(long, help = "Only print the effective selection")]
    show: bool,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
enum ConfigSubcommand {
    Validate,
}

#[derive(Debug, Args)]
struct PendingArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    #[arg(required = true, value_name = "TITLE")]
    titles: Vec<String>,
    #[arg(long, value_name = "CHECK_ID", help = "Run a single check")]
    check: Option<String>,
    #[arg(long)]
    json: bool,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    #[arg(long, help = "Keep fetched content in memory instead of the database")]
    no_store: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Checks) => run_checks(&runtime),
        Some(Commands::Configure(args)) => run_configure(&runtime, args),
        Some(Commands::Config(ConfigArgs {
            command: ConfigSubcommand::Validate,
        })) => run_config_validate(&runtime),
        Some(Commands::Pending(args)) => run_pending(&runtime, args),
        Some(Commands::Evaluate(args)) => run_evaluate(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized autoreview runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths)
}

fn run_checks(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let enabled = CheckId::selection(&config.enabled_checks());
    for check in CheckId::ALL {
        println!(
            "{} {:>2}  {:<32} {}",
            if enabled.contains(&check) { "*" } else { " " },
            check.priority(),
            check.as_str(),
            check.title()
        );
    }
    if config.enabled_checks().is_empty() {
        println!("\n(default catalog; `autoreview configure` narrows the selection)");
    }
    print_diagnostics(runtime, &paths)
}

fn run_configure(runtime: &RuntimeOptions, args: ConfigureArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    if args.show {
        let config = load_config(&paths.config_path)?;
        print_selection(&config.enabled_checks());
        return Ok(());
    }
    if args.enable.is_empty() && args.disable.is_empty() && !args.reset {
        bail!("nothing to change; pass --enable, --disable, --reset or --show");
    }

    let outcome = patch_enabled_checks(
        &paths.config_path,
        &EnabledChecksPatch {
            enable: args.enable,
            disable: args.disable,
            reset: args.reset,
        },
    )?;
    for id in &outcome.unknown {
        warn!(check = %id, "unknown check id skipped");
        eprintln!("warning: unknown check id `{id}` skipped");
    }
    println!(
        "{} {}",
        if outcome.wrote { "updated" } else { "unchanged" },
        normalize_for_display(&paths.config_path)
    );
    print_selection(outcome.enabled.as_deref().unwrap_or_default());
    Ok(())
}

fn print_selection(enabled: &[CheckId]) {
    if enabled.is_empty() {
        println!("enabled_checks: default catalog");
    }
    for check in CheckId::selection(enabled) {
        println!("  {:>2} {}", check.priority(), check.as_str());
    }
}

fn run_config_validate(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let wiki = config.wiki_id();
    let policy = config.review_policy();
    println!("config: ok ({})", normalize_for_display(&paths.config_path));
    println!("wiki: {}.{}", wiki.code, wiki.family);
    println!("api_url: {}", config.api_url());
    println!("ores_url: {}", config.ores_url());
    println!(
        "ores thresholds: damaging={} goodfaith={} damaging_living={} goodfaith_living={}",
        policy.ores.damaging,
        policy.ores.goodfaith,
        policy.ores.damaging_living,
        policy.ores.goodfaith_living
    );
    println!("enabled checks: {}", CheckId::selection(&policy.enabled_checks).len());
    print_diagnostics(runtime, &paths)
}

fn run_pending(runtime: &RuntimeOptions, args: PendingArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let client = build_client(&config)?;
    let pages = client.fetch_pending_titles(args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&pages)?);
    } else {
        for page in &pages {
            println!(
                "{}\tstable={}\tlatest={}\tsince={}",
                page.title,
                page.stable_revid,
                page.latest_revid,
                page.pending_since.as_deref().unwrap_or("-")
            );
        }
        println!("pending pages: {}", pages.len());
    }
    info!(count = pages.len(), requests = client.request_count(), "listed pending pages");
    print_diagnostics(runtime, &paths)
}

#[derive(Debug, Serialize)]
struct EvaluateOutput<'a> {
    wiki: String,
    pages: &'a [PageEvaluation],
    skipped: &'a [String],
}

fn run_evaluate(runtime: &RuntimeOptions, args: EvaluateArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let only = args.check.as_deref().map(CheckId::parse).transpose()?;
    let wiki = config.wiki_id();
    let policy = config.review_policy();
    let client = build_client(&config)?;
    let store: Box<dyn ContentStore> = if args.no_store {
        Box::new(MemoryContentStore::new())
    } else {
        Box::new(SqliteContentStore::open(&paths.db_path)?)
    };

    let mut pages = Vec::new();
    let mut skipped = Vec::new();
    for title in &args.titles {
        match client.fetch_pending_page(title)? {
            Some(page) if !page.pending_revisions().is_empty() => pages.push(page),
            Some(_) | None => {
                warn!(page = %title, "no pending changes");
                skipped.push(title.clone());
            }
        }
    }

    let mut evaluator = PageEvaluator::new(&client, store.as_ref(), &policy, &wiki.code);
    evaluator.only = only;
    let evaluations = evaluator.evaluate_pages(&pages, args.workers);
    info!(
        pages = evaluations.len(),
        requests = client.request_count(),
        "evaluation finished"
    );

    if args.json {
        let output = EvaluateOutput {
            wiki: format!("{}.{}", wiki.code, wiki.family),
            pages: &evaluations,
            skipped: &skipped,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for evaluation in &evaluations {
        print_page_evaluation(evaluation);
    }
    for title in &skipped {
        println!("{title}: no pending changes");
    }
    print_diagnostics(runtime, &paths)
}

fn print_page_evaluation(evaluation: &PageEvaluation) {
    println!("== {} (page {})", evaluation.title, evaluation.page_id);
    for revision in &evaluation.revisions {
        println!(
            "  r{} by {}: {}",
            revision.revid,
            revision.user_name,
            revision.decision_status().as_str()
        );
        if let Some(error) = &revision.error {
            println!("    error: {error}");
        }
        let Some(report) = &revision.report else {
            continue;
        };
        for entry in &report.trace {
            println!(
                "    [{:<6}] {:<32} {} ({:.1} ms)",
                entry.status.as_str(),
                entry.id,
                entry.message,
                entry.duration_ms
            );
        }
        println!(
            "    => {}: {} ({:.1} ms)",
            report.decision.label, report.decision.reason, report.total_duration_ms
        );
    }
}

fn build_client(config: &AutoreviewConfig) -> Result<MediaWikiClient> {
    let capacity = NonZeroUsize::new(config.block_cache_capacity())
        .context("cache.block_capacity must be at least 1")?;
    let cache = LruBlockCache::new(capacity, Duration::from_secs(config.block_cache_ttl_secs()));
    MediaWikiClient::new(MediaWikiClientConfig::from_config(config), Arc::new(cache))
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, AutoreviewConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) -> Result<()> {
    if !runtime.diagnostics {
        return Ok(());
    }
    let status = inspect_runtime(paths)?;
    println!("\n[diagnostics]\n{}", paths.diagnostics());
    println!("config_exists={}", format_flag(status.config_exists));
    println!("db_exists={}", format_flag(status.db_exists));
    if let Some(size) = status.db_size_bytes {
        println!("db_size_bytes={size}");
    }
    for warning in &status.warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
