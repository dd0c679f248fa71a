mod atomic_write;
mod clear_cmd;
mod config;
mod document;
mod error;
mod generate_cmd;
mod go_source;
mod process;
mod reconcile;
mod relaxed_json;
mod toolchain;
mod workspace;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::{ConfigOverrides, GoDuration};
use document::DocumentKind;
use error::TaskGenError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "go-zed-tasks",
    version,
    about = "Generate Zed tasks and Delve debug configs for Go tests",
    long_about = "Scans a Go test file, asks `go test -list` which of its tests are runnable, \
optionally runs them once to discover subtests, and keeps one generated entry per test in \
.zed/tasks.json or .zed/debug.json. Hand-written entries are left alone.",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Bare invocation behaves like `generate`
    #[command(flatten)]
    generate: GenerateArgs,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate or refresh tasks for the tests in one file (default)
    Generate(GenerateArgs),

    /// Generate or refresh Delve debug configs for the tests in one file
    #[command(visible_alias = "debug")]
    GenerateDebug(GenerateArgs),

    /// Remove every generated entry, keeping hand-written ones
    Clear {
        #[command(flatten)]
        paths: PathArgs,

        /// Which documents to clear
        #[arg(long, value_enum, default_value_t = clear_cmd::ClearScope::Tasks)]
        kind: clear_cmd::ClearScope,

        /// Print the cleaned documents instead of writing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the resolved configuration
    Config {
        #[command(flatten)]
        paths: PathArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct PathArgs {
    /// Workspace root (default: nearest directory with go.mod or .git)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Tasks document path, relative to the root unless absolute
    #[arg(long = "tasks", value_name = "PATH")]
    tasks_path: Option<PathBuf>,

    /// Debug document path, relative to the root unless absolute
    #[arg(long = "debug", value_name = "PATH")]
    debug_path: Option<PathBuf>,
}

impl PathArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            tasks_path: self.tasks_path.clone(),
            debug_path: self.debug_path.clone(),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
struct GenerateArgs {
    /// Go test file to scan
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    #[command(flatten)]
    paths: PathArgs,

    /// Extra argument for `go test` (repeatable)
    #[arg(long = "go-test-arg", value_name = "ARG", allow_hyphen_values = true)]
    go_test_args: Vec<String>,

    /// Run the selected tests once with -json to find subtests
    #[arg(long)]
    discover_subtests: bool,

    /// Discovery timeout in Go syntax, e.g. 30s or 2m
    #[arg(long, value_name = "DURATION")]
    subtest_timeout: Option<GoDuration>,

    /// Print the resulting document instead of writing it
    #[arg(long)]
    dry_run: bool,

    /// Arguments after `--` are appended to `go test`
    #[arg(last = true, value_name = "GO_TEST_ARGS")]
    trailing: Vec<String>,
}

impl GenerateArgs {
    fn into_options(self, kind: DocumentKind) -> Result<generate_cmd::GenerateOptions> {
        let file = self
            .file
            .ok_or_else(|| TaskGenError::input("missing required flag: --file"))?;
        Ok(generate_cmd::GenerateOptions {
            kind,
            file,
            overrides: self.paths.overrides(),
            root: self.paths.root,
            go_test_args: self.go_test_args,
            trailing_args: self.trailing,
            discover_subtests: self.discover_subtests,
            subtest_timeout: self.subtest_timeout,
            dry_run: self.dry_run,
        })
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // a second init (tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        None => generate_cmd::run(&cli.generate.into_options(DocumentKind::Tasks)?),
        Some(Commands::Generate(args)) => {
            generate_cmd::run(&args.into_options(DocumentKind::Tasks)?)
        }
        Some(Commands::GenerateDebug(args)) => {
            generate_cmd::run(&args.into_options(DocumentKind::Debug)?)
        }
        Some(Commands::Clear {
            paths,
            kind,
            dry_run,
        }) => clear_cmd::run(&clear_cmd::ClearOptions {
            overrides: paths.overrides(),
            root: paths.root,
            scope: kind,
            dry_run,
        }),
        Some(Commands::Config { paths }) => config::show_config(&paths.overrides()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
