//! Test runner for module-based JavaScript applications and components.
//!
//! `modrunner test [app|mojit] [path]` discovers the target's modules,
//! selects its test modules, runs them through the configured engine and
//! writes a merged report under the destination directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use modrunner::core::aggregate::Verdict;
use modrunner::error::PipelineError;
use modrunner::exit_codes;
use modrunner::io::config::{CONFIG_FILE, load_config};
use modrunner::logging;
use modrunner::orchestrate::Strategy;
use modrunner::pipeline::{TargetKind, TestOptions, run_test};

#[derive(Parser)]
#[command(
    name = "modrunner",
    version,
    about = "Run the unit tests of an application or a single mojit"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run unit tests for an application or a mojit.
    Test(TestArgs),
}

#[derive(Args)]
struct TestArgs {
    /// Target type: `app` or `mojit`.
    #[arg(default_value = "app")]
    kind: String,
    /// Application directory, or the mojit name or path.
    path: Option<PathBuf>,
    /// Comma-separated module names (used when no --testname is given).
    names: Option<String>,
    /// Destination directory for results.
    #[arg(short = 'd', long = "directory", default_value = "artifacts/test")]
    directory: PathBuf,
    /// Instrument sources and write a coverage report.
    #[arg(short, long)]
    coverage: bool,
    /// Verbose logging (`modrunner=debug` unless RUST_LOG is set).
    #[arg(short, long)]
    verbose: bool,
    /// Alias of --verbose.
    #[arg(long)]
    debug: bool,
    /// Parent directory of the coverage workspace.
    #[arg(long)]
    tmpdir: Option<PathBuf>,
    /// Only run the named module (and its test module). Repeatable.
    #[arg(short = 't', long = "testname")]
    testname: Vec<String>,
    /// Run strategy, overriding the configured default for the target type.
    #[arg(long)]
    strategy: Option<Strategy>,
    /// Config file.
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Test(args) => cmd_test(args),
    }
}

fn cmd_test(args: TestArgs) -> Result<i32> {
    logging::init(args.verbose || args.debug);

    let kind: TargetKind = args.kind.parse()?;
    let cwd = std::env::current_dir().context("read working directory")?;
    let config = load_config(&cwd.join(&args.config))
        .with_context(|| format!("load config {}", args.config.display()))?;

    let mut options = TestOptions::new(kind, &cwd);
    options.path = args.path;
    options.dest = args.directory;
    options.coverage = args.coverage;
    options.tmpdir = args.tmpdir;
    options.strategy = args.strategy;
    options.test_names = if args.testname.is_empty() {
        split_names(args.names.as_deref())
    } else {
        args.testname
    };

    match run_test(&config, &options) {
        Ok(outcome) => {
            println!("{}", outcome.message());
            Ok(match outcome.verdict() {
                Verdict::Passed => exit_codes::OK,
                Verdict::Failed => exit_codes::FAILED,
            })
        }
        Err(err) => {
            if let Some(PipelineError::BatchAborted(items)) = err.downcast_ref::<PipelineError>() {
                for item in items {
                    eprintln!("aborted: {item}");
                }
            }
            Err(err)
        }
    }
}

fn split_names(names: Option<&str>) -> Vec<String> {
    names
        .map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
