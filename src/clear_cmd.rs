use crate::config::{Config, ConfigOverrides};
use crate::document::{self, DocumentKind};
use crate::reconcile::{self, Marker};
use crate::workspace;
use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which documents `clear` touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ClearScope {
    #[default]
    Tasks,
    Debug,
    All,
}

impl ClearScope {
    pub fn kinds(self) -> &'static [DocumentKind] {
        match self {
            ClearScope::Tasks => &[DocumentKind::Tasks],
            ClearScope::Debug => &[DocumentKind::Debug],
            ClearScope::All => &[DocumentKind::Tasks, DocumentKind::Debug],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClearOptions {
    pub root: Option<PathBuf>,
    pub overrides: ConfigOverrides,
    pub scope: ClearScope,
    /// Print the cleaned documents instead of writing them.
    pub dry_run: bool,
}

pub fn run(opts: &ClearOptions) -> Result<()> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let root = match &opts.root {
        Some(root) => workspace::absolutize(root, &cwd),
        None => workspace::detect_workspace_root(&cwd, &cwd),
    };
    let config = Config::load(&opts.overrides).context("load configuration")?;

    for &kind in opts.scope.kinds() {
        let path = config.document_path(kind, &root);
        let cleared = clear_document(&config, &path)
            .with_context(|| format!("clear {}", kind.file_name()))?;
        if opts.dry_run {
            print!("{}", cleared.rendered);
            continue;
        }
        document::write_document(&path, &cleared.rendered)
            .with_context(|| format!("clear {}", kind.file_name()))?;
        println!("Updated {}", path.display());
        println!("Removed generated {}: {}", removed_noun(kind), cleared.removed);
    }
    Ok(())
}

struct Cleared {
    rendered: String,
    removed: usize,
}

/// Renders `path` without its generated entries. Nothing is written here.
fn clear_document(config: &Config, path: &Path) -> Result<Cleared> {
    let existing = document::read_document(path)?;
    let (kept, removed) = reconcile::clear_generated(existing, Marker::from_config(config));
    debug!(path = %path.display(), removed, kept = kept.len(), "cleared generated entries");

    let rendered = document::render_document(&kept)?;
    Ok(Cleared { rendered, removed })
}

fn removed_noun(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Tasks => "tasks",
        DocumentKind::Debug => "debug configs",
    }
}
