//! Generated entries and the label-keyed merge that keeps them in sync with a
//! possibly hand-edited document.
//!
//! An entry is "generated" when its `env` object maps the configured marker key
//! to the marker value. Only generated entries are ever replaced or removed;
//! everything else in the document is passed through untouched and in order.

use crate::config::Config;
use crate::document::{DocumentKind, Entry};
use crate::toolchain::run_pattern_for_test_name;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

pub const TEST_NAME_ENV: &str = "ZED_GO_TEST_NAME";
pub const TEST_FILE_ENV: &str = "ZED_GO_TEST_FILE";

/// The fixed `env` key/value pair tagging an entry as ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

impl<'a> Marker<'a> {
    pub fn from_config(config: &'a Config) -> Self {
        Self {
            key: &config.generated_env_key,
            value: &config.generated_env_value,
        }
    }

    pub fn is_on(&self, entry: &Entry) -> bool {
        entry
            .get("env")
            .and_then(Value::as_object)
            .and_then(|env| env.get(self.key))
            .and_then(Value::as_str)
            == Some(self.value)
    }
}

/// Everything an entry needs besides the test name.
#[derive(Debug, Clone)]
pub struct EntryContext<'a> {
    pub config: &'a Config,
    /// `go test` package argument (`.` or `./pkg/dir`)
    pub package_arg: &'a str,
    /// slash-normalized source file path, root-relative when possible
    pub file: &'a str,
    pub extra_args: &'a [String],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Labels left alone because a hand-written entry already owns them.
    pub conflicts: Vec<String>,
}

pub fn label_of(entry: &Entry) -> Option<&str> {
    entry.get("label").and_then(Value::as_str)
}

/// One entry per test name, in the order given.
pub fn build_entries(
    kind: DocumentKind,
    names: &[String],
    ctx: &EntryContext<'_>,
) -> Vec<Entry> {
    names
        .iter()
        .map(|name| match kind {
            DocumentKind::Tasks => task_entry(name, ctx),
            DocumentKind::Debug => debug_entry(name, ctx),
        })
        .collect()
}

fn task_entry(test_name: &str, ctx: &EntryContext<'_>) -> Entry {
    let cfg = ctx.config;
    let mut args = Vec::with_capacity(ctx.extra_args.len() + 4);
    args.push("test".to_string());
    args.extend(ctx.extra_args.iter().cloned());
    args.push(ctx.package_arg.to_string());
    args.push("-run".to_string());
    args.push(run_pattern_for_test_name(test_name));

    let mut entry = Map::new();
    let label = format!("{}{}", cfg.label_prefix_for(DocumentKind::Tasks), test_name);
    entry.insert("label".into(), label.into());
    entry.insert("command".into(), cfg.go_binary.clone().into());
    entry.insert("args".into(), string_array(args));
    entry.insert("use_new_terminal".into(), cfg.use_new_terminal.into());
    entry.insert("allow_concurrent_runs".into(), cfg.allow_concurrent_runs.into());
    entry.insert("reveal".into(), cfg.reveal.clone().into());
    entry.insert("hide".into(), cfg.hide.clone().into());
    entry.insert("env".into(), env_map(test_name, ctx));
    entry
}

fn debug_entry(test_name: &str, ctx: &EntryContext<'_>) -> Entry {
    let cfg = ctx.config;
    let mut args = normalize_args_for_delve(ctx.extra_args);
    args.push("-test.run".to_string());
    args.push(run_pattern_for_test_name(test_name));

    let mut entry = Map::new();
    let label = format!("{}{}", cfg.label_prefix_for(DocumentKind::Debug), test_name);
    entry.insert("label".into(), label.into());
    entry.insert("adapter".into(), "Delve".into());
    entry.insert("request".into(), "launch".into());
    entry.insert("mode".into(), "test".into());
    entry.insert("program".into(), ctx.package_arg.into());
    entry.insert("args".into(), string_array(args));
    entry.insert("env".into(), env_map(test_name, ctx));
    entry
}

fn env_map(test_name: &str, ctx: &EntryContext<'_>) -> Value {
    let cfg = ctx.config;
    let mut env = Map::new();
    env.insert(cfg.generated_env_key.clone(), cfg.generated_env_value.clone().into());
    env.insert(TEST_NAME_ENV.into(), test_name.into());
    env.insert(TEST_FILE_ENV.into(), ctx.file.into());
    Value::Object(env)
}

fn string_array(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

/// Rewrites `go test` flags into the test binary's own spelling, which is
/// what Delve passes through: `-v` → `-test.v`, `-count=N` → `-test.count=N`.
/// A bare `-count` has no value to carry over and is dropped.
pub fn normalize_args_for_delve(args: &[String]) -> Vec<String> {
    args.iter()
        .filter_map(|arg| match arg.as_str() {
            "-v" => Some("-test.v".to_string()),
            "-count" => None,
            a if a.starts_with("-count=") => Some(format!("-test.{}", &a[1..])),
            a => Some(a.to_string()),
        })
        .collect()
}

/// Merges `generated` into `existing`.
///
/// With `prune`, generated entries whose label is not being regenerated are
/// removed. Existing generated entries that repeat a label already held by a
/// hand-written entry or an earlier generated entry are removed regardless of
/// `prune`. A generated entry whose label already exists on a generated entry
/// replaces it in place; otherwise it is appended. If the label belongs to a
/// hand-written entry the new entry is skipped and reported as a conflict, so
/// user entries are never modified and labels stay unique.
pub fn merge_entries(
    existing: Vec<Entry>,
    generated: Vec<Entry>,
    marker: Marker<'_>,
    prune: bool,
) -> (Vec<Entry>, MergeStats) {
    let mut stats = MergeStats::default();
    let new_labels: HashSet<String> = generated
        .iter()
        .filter_map(|e| label_of(e).map(str::to_string))
        .collect();

    let user_labels: HashSet<String> = existing
        .iter()
        .filter(|e| !marker.is_on(e))
        .filter_map(|e| label_of(e).map(str::to_string))
        .collect();

    let mut merged: Vec<Entry> = Vec::with_capacity(existing.len() + generated.len());
    let mut kept_generated: HashSet<String> = HashSet::new();
    for entry in existing {
        if !marker.is_on(&entry) {
            merged.push(entry);
            continue;
        }
        let label = label_of(&entry).unwrap_or_default();
        let stale = prune && !new_labels.contains(label);
        let duplicate = user_labels.contains(label) || !kept_generated.insert(label.to_string());
        if stale || duplicate {
            stats.removed += 1;
        } else {
            merged.push(entry);
        }
    }

    // first occurrence of each label owns the slot
    let mut label_index: HashMap<String, usize> = HashMap::with_capacity(merged.len());
    for (i, entry) in merged.iter().enumerate() {
        if let Some(label) = label_of(entry) {
            label_index.entry(label.to_string()).or_insert(i);
        }
    }

    for entry in generated {
        let label = label_of(&entry).unwrap_or_default().to_string();
        match label_index.get(&label) {
            Some(&idx) if marker.is_on(&merged[idx]) => {
                merged[idx] = entry;
                stats.updated += 1;
            }
            Some(_) => stats.conflicts.push(label),
            None => {
                merged.push(entry);
                label_index.insert(label, merged.len() - 1);
                stats.added += 1;
            }
        }
    }

    (merged, stats)
}

/// Drops every generated entry; returns the rest and how many were removed.
pub fn clear_generated(existing: Vec<Entry>, marker: Marker<'_>) -> (Vec<Entry>, usize) {
    let before = existing.len();
    let kept: Vec<Entry> = existing.into_iter().filter(|e| !marker.is_on(e)).collect();
    let removed = before - kept.len();
    (kept, removed)
}
