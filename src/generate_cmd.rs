use crate::config::{Config, ConfigOverrides, GoDuration};
use crate::document::{self, DocumentKind};
use crate::go_source;
use crate::reconcile::{self, EntryContext, Marker, MergeStats};
use crate::toolchain;
use crate::workspace;
use anyhow::{bail, Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub kind: DocumentKind,
    pub file: PathBuf,
    pub root: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    /// `--go-test-arg` values, in order.
    pub go_test_args: Vec<String>,
    /// Everything after `--`.
    pub trailing_args: Vec<String>,
    pub discover_subtests: bool,
    pub subtest_timeout: Option<GoDuration>,
    pub dry_run: bool,
}

/// What one generation run found and changed, for the summary.
#[derive(Debug)]
struct Outcome {
    document_path: PathBuf,
    in_file: usize,
    runnable: usize,
    discovery: Option<DiscoverySummary>,
    selected: Vec<String>,
    stats: MergeStats,
}

#[derive(Debug)]
struct DiscoverySummary {
    found: usize,
    new: usize,
    timeout: GoDuration,
}

pub fn run(opts: &GenerateOptions) -> Result<()> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let file = workspace::absolutize(&opts.file, &cwd);
    workspace::validate_go_file(&file)?;

    let package_dir = file
        .parent()
        .map(Path::to_path_buf)
        .with_context(|| format!("file has no parent directory: {}", file.display()))?;
    let root = match &opts.root {
        Some(root) => workspace::absolutize(root, &cwd),
        None => workspace::detect_workspace_root(&package_dir, &cwd),
    };
    debug!(file = %file.display(), root = %root.display(), "resolved paths");

    let config = Config::load(&opts.overrides).context("load configuration")?;
    let extra_args = collect_extra_args(&config, opts);

    let pattern = config.test_name_pattern()?;
    let in_file =
        go_source::find_tests_in_file(&file, &pattern).context("find tests in file")?;
    let listed = toolchain::list_tests(&config, &package_dir).context("list tests with go")?;
    let mut runnable = toolchain::intersect_tests(&in_file, &listed);
    runnable.sort();
    info!(
        in_file = in_file.len(),
        listed = listed.len(),
        runnable = runnable.len(),
        "static discovery done"
    );

    let package_arg = workspace::package_arg(&root, &package_dir)?;
    let rel_file = workspace::display_relative(&root, &file);

    let mut selected = runnable.clone();
    let mut discovery = None;
    if opts.discover_subtests {
        let timeout = resolve_subtest_timeout(&config, opts.subtest_timeout)?;
        let found = toolchain::discover_subtests(
            &config,
            &package_dir,
            &runnable,
            timeout,
            &extra_args,
        )
        .context("discover subtests")?;
        if found.partial {
            info!(found = found.tests.len(), "continuing with partial discovery results");
        }
        let found = keep_runnable_families(found.tests, &runnable);
        let new = count_new(&runnable, &found);
        selected = merge_unique(&runnable, &found);
        discovery = Some(DiscoverySummary {
            found: found.len(),
            new,
            timeout,
        });
    }

    let document_path = config.document_path(opts.kind, &root);
    let ctx = EntryContext {
        config: &config,
        package_arg: &package_arg,
        file: &rel_file,
        extra_args: &extra_args,
    };
    let generated = reconcile::build_entries(opts.kind, &selected, &ctx);
    let existing = document::read_document(&document_path)
        .with_context(|| format!("merge {}", opts.kind.entry_noun().to_lowercase()))?;
    let (merged, stats) = reconcile::merge_entries(
        existing,
        generated,
        Marker::from_config(&config),
        config.prune_generated,
    );
    for label in &stats.conflicts {
        warn!(%label, "label already used by a hand-written entry; left unchanged");
    }

    let rendered = document::render_document(&merged)?;
    if opts.dry_run {
        print!("{}", rendered);
        return Ok(());
    }

    let written = document::write_document(&document_path, &rendered)?;
    info!(
        path = %document_path.display(),
        bytes = written.bytes_written,
        unchanged = written.unchanged,
        "document written"
    );

    let outcome = Outcome {
        document_path,
        in_file: in_file.len(),
        runnable: runnable.len(),
        discovery,
        selected,
        stats,
    };
    print_summary(opts.kind, &config, &outcome);
    Ok(())
}

/// Config args, then `--go-test-arg` values, then the `--` tail.
fn collect_extra_args(config: &Config, opts: &GenerateOptions) -> Vec<String> {
    config
        .additional_go_test_args
        .iter()
        .chain(&opts.go_test_args)
        .chain(&opts.trailing_args)
        .cloned()
        .collect()
}

fn resolve_subtest_timeout(config: &Config, flag: Option<GoDuration>) -> Result<GoDuration> {
    let timeout = flag.unwrap_or(config.subtest_discovery_timeout);
    if timeout.is_zero() {
        bail!("--subtest-timeout must be > 0");
    }
    Ok(timeout)
}

/// Drops discovered names whose top-level test was never requested.
fn keep_runnable_families(found: Vec<String>, runnable: &[String]) -> Vec<String> {
    let allowed: HashSet<&str> = runnable.iter().map(String::as_str).collect();
    found
        .into_iter()
        .filter(|name| {
            let top = name.split('/').next().unwrap_or_default();
            let keep = allowed.contains(top);
            if !keep {
                debug!(%name, "ignoring discovered test outside the requested set");
            }
            keep
        })
        .collect()
}

fn count_new(base: &[String], found: &[String]) -> usize {
    let base: HashSet<&String> = base.iter().collect();
    found
        .iter()
        .filter(|name| !base.contains(name))
        .collect::<HashSet<_>>()
        .len()
}

fn merge_unique(base: &[String], found: &[String]) -> Vec<String> {
    base.iter()
        .chain(found)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn print_summary(kind: DocumentKind, config: &Config, outcome: &Outcome) {
    println!("Updated {}", outcome.document_path.display());
    println!(
        "Discovered in file: {}, runnable with go test -list: {}",
        outcome.in_file, outcome.runnable
    );
    if let Some(d) = &outcome.discovery {
        println!(
            "Discovered by runtime execution: {} (new: {}, timeout {})",
            d.found, d.new, d.timeout
        );
    }
    println!(
        "{} added: {}, updated: {}, removed: {}",
        kind.entry_noun(),
        outcome.stats.added,
        outcome.stats.updated,
        outcome.stats.removed
    );
    let prefix = config.label_prefix_for(kind);
    for name in &outcome.selected {
        println!("{}: {}{}", kind.generated_line_prefix(), prefix, name);
    }
}
