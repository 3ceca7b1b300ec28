//! dashcheck - Main Entry Point
//!
//! Runs the dashboard tab walk (or YAML scenarios) in a headless browser and
//! writes screenshots for review.
//!
//! Exit codes: 0 all checks passed, 1 a check failed, 2 setup or
//! configuration error, 3 target server unreachable.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use dashcheck::config::DEFAULT_CONFIG_FILE;
use dashcheck::playwright::{Browser, PlaywrightHandle};
use dashcheck::spec::Viewport;
use dashcheck::{CheckError, RunConfig, Scenario, ScenarioRunner};

/// Browser-driven visual verification for the stats dashboard
#[derive(Parser, Debug)]
#[command(name = "dashcheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    args: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scenarios (default)
    Run,

    /// Print the generated Playwright script instead of running it
    PrintScript,

    /// List the selected scenarios and their steps
    List,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Config file (default: ./dashcheck.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dashboard URL
    #[arg(long, env = "DASHCHECK_URL", global = true)]
    url: Option<String>,

    /// Directory screenshots are written to
    #[arg(short, long, env = "DASHCHECK_OUTPUT_DIR", global = true)]
    output_dir: Option<PathBuf>,

    /// Per-step wait in milliseconds
    #[arg(long, env = "DASHCHECK_TIMEOUT_MS", global = true)]
    timeout_ms: Option<u64>,

    /// Scenario YAML file or directory (default: built-in dashboard tabs)
    #[arg(short, long, global = true)]
    scenario: Option<PathBuf>,

    /// Run only the scenario with this name
    #[arg(short, long, global = true)]
    name: Option<String>,

    /// Run only scenarios with this tag
    #[arg(short, long, global = true)]
    tag: Option<String>,

    /// Browser engine
    #[arg(long, value_enum, global = true)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long, global = true)]
    headed: bool,

    /// Viewport width (needs --viewport-height too)
    #[arg(long, requires = "viewport_height", global = true)]
    viewport_width: Option<u32>,

    /// Viewport height (needs --viewport-width too)
    #[arg(long, requires = "viewport_width", global = true)]
    viewport_height: Option<u32>,

    /// Keep probing the dashboard this many seconds before giving up
    #[arg(long, global = true)]
    wait_for_server: Option<u64>,

    /// Shell command that starts the dashboard, stopped after the run
    #[arg(long, global = true)]
    server_cmd: Option<String>,

    /// Compare screenshots against baselines in this directory
    #[arg(long, global = true)]
    baseline_dir: Option<PathBuf>,

    /// Allowed differing pixels, in percent
    #[arg(long, global = true)]
    visual_threshold: Option<f64>,

    /// Replace baselines with this run's screenshots
    #[arg(long, global = true)]
    update_baselines: bool,

    /// Write a JSON report here
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Node.js executable
    #[arg(long, env = "DASHCHECK_NODE", global = true)]
    node: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let code = match tokio::runtime::Runtime::new() {
        Ok(rt) => match rt.block_on(async_main(cli)) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                e.downcast_ref::<CheckError>()
                    .map(CheckError::exit_code)
                    .unwrap_or(2)
            }
        },
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            2
        }
    };

    std::process::exit(code);
}

async fn async_main(cli: Cli) -> anyhow::Result<i32> {
    let config = build_config(&cli.args)?;
    debug!("Effective config: {:?}", config);

    let scenarios = select_scenarios(&cli.args)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let mut runner = ScenarioRunner::new(config)?;
            let suite = runner.run(&scenarios).await?;
            Ok(suite.exit_code())
        }
        Commands::PrintScript => {
            config.validate()?;
            let playwright = PlaywrightHandle::new(config)?;
            for scenario in &scenarios {
                println!("{}", playwright.build_script(scenario)?);
            }
            Ok(0)
        }
        Commands::List => {
            for scenario in &scenarios {
                println!("{}", scenario.name);
                if !scenario.description.is_empty() {
                    println!("  {}", scenario.description);
                }
                for (i, step) in scenario.steps.iter().enumerate() {
                    println!("  {:>2}. {}", i + 1, step.name());
                }
                for path in scenario.screenshot_paths() {
                    println!("  -> {}", config.artifact_path(path).display());
                }
            }
            Ok(0)
        }
    }
}

/// Defaults, then the config file, then env vars and flags
fn build_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RunConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE))?,
    };

    if let Some(url) = &args.url {
        config.target_url = url.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout_ms = ms;
    }
    if let Some(browser) = args.browser {
        config.browser = browser;
    }
    if args.headed {
        config.headless = false;
    }
    if let (Some(width), Some(height)) = (args.viewport_width, args.viewport_height) {
        config.viewport = Some(Viewport { width, height });
    }
    if let Some(secs) = args.wait_for_server {
        config.server.wait_secs = secs;
    }
    if let Some(cmd) = &args.server_cmd {
        config.server.command = Some(cmd.clone());
    }
    if let Some(dir) = &args.baseline_dir {
        config.visual.baseline_dir = Some(dir.clone());
    }
    if let Some(threshold) = args.visual_threshold {
        config.visual.threshold = threshold;
    }
    if args.update_baselines {
        config.visual.update_baselines = true;
    }
    if let Some(report) = &args.report {
        config.report = Some(report.clone());
    }
    if let Some(node) = &args.node {
        config.node = node.clone();
    }

    Ok(config)
}

fn select_scenarios(args: &RunArgs) -> anyhow::Result<Vec<Scenario>> {
    let mut scenarios = match &args.scenario {
        Some(path) => Scenario::load_path(path)
            .with_context(|| format!("loading scenarios from {}", path.display()))?,
        None => vec![Scenario::dashboard_tabs()],
    };

    if let Some(tag) = &args.tag {
        scenarios = Scenario::filter_by_tag(&scenarios, tag)
            .into_iter()
            .cloned()
            .collect();
    }
    if let Some(name) = &args.name {
        scenarios.retain(|s| &s.name == name);
    }

    if scenarios.is_empty() {
        return Err(CheckError::SpecParse("no scenario matches the given filters".into()).into());
    }

    Ok(scenarios)
}
