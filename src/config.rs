use crate::document::DocumentKind;
use crate::error::{Result, TaskGenError};
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "ZED_GO_TASKS_";

/// Where the generated documents live when no explicit path is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorTarget {
    /// `<root>/.zed/tasks.json` and `<root>/.zed/debug.json`
    #[default]
    Project,
    /// Zed's user-level `tasks.json` / `debug.json` in the config dir
    Global,
}

impl FromStr for EditorTarget {
    type Err = TaskGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" | "" => Ok(EditorTarget::Project),
            "global" | "user" => Ok(EditorTarget::Global),
            other => Err(TaskGenError::config(format!(
                "invalid target {:?} (expected project or global)",
                other
            ))),
        }
    }
}

/// Resolved settings for one invocation. Built once by [`Config::load`] and
/// passed by reference; nothing below `main` reads the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target: EditorTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_path: Option<PathBuf>,
    pub label_prefix: String,
    pub debug_label_prefix: String,
    pub go_binary: String,
    pub test_name_regex: String,
    pub go_list_regex: String,
    pub additional_go_test_args: Vec<String>,
    pub use_new_terminal: bool,
    pub allow_concurrent_runs: bool,
    pub reveal: String,
    pub hide: String,
    pub prune_generated: bool,
    pub generated_env_key: String,
    pub generated_env_value: String,
    pub subtest_discovery_timeout: GoDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: EditorTarget::Project,
            tasks_path: None,
            debug_path: None,
            label_prefix: "go:".into(),
            debug_label_prefix: "go:debug:".into(),
            go_binary: "go".into(),
            test_name_regex: "^Test".into(),
            go_list_regex: "^Test".into(),
            additional_go_test_args: Vec::new(),
            use_new_terminal: false,
            allow_concurrent_runs: false,
            reveal: "always".into(),
            hide: "never".into(),
            prune_generated: true,
            generated_env_key: "ZED_GO_TEST_TASK_GENERATED".into(),
            generated_env_value: "1".into(),
            subtest_discovery_timeout: GoDuration::from_secs(30),
        }
    }
}

/// Values given on the command line; they win over every other layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub tasks_path: Option<PathBuf>,
    pub debug_path: Option<PathBuf>,
}

impl Config {
    /// Defaults, then the optional TOML file, then `ZED_GO_TASKS_*`, then CLI overrides.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let path = config_file_path(&lookup);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Config::default(),
        };
        config.apply_env(lookup)?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TaskGenError::io(format!("read config {}", path.display()), e))?;
        toml::from_str(&content).map_err(|e| {
            TaskGenError::config(format!("parse config {}: {}", path.display(), e))
        })
    }

    /// Applies `ZED_GO_TASKS_*` keys resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("TARGET") {
            self.target = v.parse()?;
        }
        if let Some(v) = get("TASKS_PATH").filter(|v| !v.trim().is_empty()) {
            self.tasks_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DEBUG_PATH").filter(|v| !v.trim().is_empty()) {
            self.debug_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("LABEL_PREFIX") {
            self.label_prefix = v;
        }
        if let Some(v) = get("DEBUG_LABEL_PREFIX") {
            self.debug_label_prefix = v;
        }
        if let Some(v) = get("GO_BINARY") {
            self.go_binary = v;
        }
        if let Some(v) = get("TEST_NAME_REGEX") {
            self.test_name_regex = v;
        }
        if let Some(v) = get("GO_LIST_REGEX") {
            self.go_list_regex = v;
        }
        if let Some(v) = get("ADDITIONAL_GO_TEST_ARGS") {
            self.additional_go_test_args = split_list(&v);
        }
        if let Some(v) = get("USE_NEW_TERMINAL") {
            self.use_new_terminal = parse_bool("USE_NEW_TERMINAL", &v)?;
        }
        if let Some(v) = get("ALLOW_CONCURRENT_RUNS") {
            self.allow_concurrent_runs = parse_bool("ALLOW_CONCURRENT_RUNS", &v)?;
        }
        if let Some(v) = get("REVEAL") {
            self.reveal = v;
        }
        if let Some(v) = get("HIDE") {
            self.hide = v;
        }
        if let Some(v) = get("PRUNE_GENERATED") {
            self.prune_generated = parse_bool("PRUNE_GENERATED", &v)?;
        }
        if let Some(v) = get("GENERATED_ENV_KEY") {
            self.generated_env_key = v;
        }
        if let Some(v) = get("GENERATED_ENV_VALUE") {
            self.generated_env_value = v;
        }
        if let Some(v) = get("SUBTEST_DISCOVERY_TIMEOUT") {
            self.subtest_discovery_timeout = v.parse().map_err(|e: TaskGenError| {
                TaskGenError::config(format!("{}SUBTEST_DISCOVERY_TIMEOUT: {}", ENV_PREFIX, e))
            })?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(path) = &overrides.tasks_path {
            self.tasks_path = Some(path.clone());
        }
        if let Some(path) = &overrides.debug_path {
            self.debug_path = Some(path.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.test_name_pattern()?;
        if self.go_list_regex.trim().is_empty() {
            return Err(TaskGenError::config("go_list_regex must not be empty"));
        }
        Regex::new(&self.go_list_regex).map_err(|e| {
            TaskGenError::config(format!("invalid go_list_regex {:?}: {}", self.go_list_regex, e))
        })?;
        if self.generated_env_key.is_empty() {
            return Err(TaskGenError::config("generated_env_key must not be empty"));
        }
        if self.go_binary.trim().is_empty() {
            return Err(TaskGenError::config("go_binary must not be empty"));
        }
        if self.subtest_discovery_timeout.is_zero() {
            return Err(TaskGenError::config("subtest discovery timeout must be > 0"));
        }
        Ok(())
    }

    pub fn test_name_pattern(&self) -> Result<Regex> {
        Regex::new(&self.test_name_regex).map_err(|e| {
            TaskGenError::config(format!(
                "invalid test_name_regex {:?}: {}",
                self.test_name_regex, e
            ))
        })
    }

    pub fn label_prefix_for(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Tasks => &self.label_prefix,
            DocumentKind::Debug => &self.debug_label_prefix,
        }
    }

    /// Absolute document path for `kind`. Explicit paths are resolved against
    /// `root`; otherwise the target decides.
    pub fn document_path(&self, kind: DocumentKind, root: &Path) -> PathBuf {
        let explicit = match kind {
            DocumentKind::Tasks => self.tasks_path.as_deref(),
            DocumentKind::Debug => self.debug_path.as_deref(),
        };
        if let Some(path) = explicit {
            return resolve_path(root, path);
        }

        let file_name = kind.file_name();
        match self.target {
            EditorTarget::Project => root.join(".zed").join(file_name),
            EditorTarget::Global => match dirs::config_dir() {
                Some(dir) => dir.join("zed").join(file_name),
                None => root.join(".zed").join(file_name),
            },
        }
    }
}

pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// `ZED_GO_TASKS_CONFIG` if set, else `<config dir>/go-zed-tasks/config.toml`.
fn config_file_path<F>(lookup: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(explicit) = lookup(&format!("{}CONFIG", ENV_PREFIX)) {
        if !explicit.trim().is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }
    dirs::config_dir().map(|dir| dir.join("go-zed-tasks").join("config.toml"))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TaskGenError::config(format!(
            "{}{}: invalid boolean {:?}",
            ENV_PREFIX, name, value
        ))),
    }
}

pub fn show_config(overrides: &ConfigOverrides) -> anyhow::Result<()> {
    let lookup = |key: &str| std::env::var(key).ok();
    match config_file_path(&lookup) {
        Some(path) if path.exists() => println!("Config: {}", path.display()),
        Some(path) => println!("Config: {} (not created)", path.display()),
        None => println!("Config: (no config dir)"),
    }
    println!();

    let config = Config::load(overrides)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

// ── GoDuration ──────────────────────────────────────────────

/// A `Duration` that parses and prints with Go's `time.ParseDuration` syntax
/// (`300ms`, `30s`, `1h30m`), which is also what `go test -timeout` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GoDuration(Duration);

impl GoDuration {
    pub const fn from_secs(secs: u64) -> Self {
        GoDuration(Duration::from_secs(secs))
    }

    pub fn as_duration(self) -> Duration {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for GoDuration {
    fn from(d: Duration) -> Self {
        GoDuration(d)
    }
}

impl FromStr for GoDuration {
    type Err = TaskGenError;

    fn from_str(input: &str) -> Result<Self> {
        let s = input.trim();
        let invalid = || TaskGenError::config(format!("invalid duration {:?}", input));

        if s.is_empty() {
            return Err(invalid());
        }
        if s.starts_with('-') {
            return Err(TaskGenError::config(format!(
                "duration must be > 0, got {:?}",
                input
            )));
        }
        let mut rest = s.strip_prefix('+').unwrap_or(s);
        if rest == "0" {
            return Ok(GoDuration(Duration::ZERO));
        }

        let mut total_nanos: f64 = 0.0;
        while !rest.is_empty() {
            let num_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            if num_len == 0 {
                return Err(invalid());
            }
            let number: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
            rest = &rest[num_len..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(rest.len());
            let scale = match &rest[..unit_len] {
                "ns" => 1.0,
                "us" | "µs" | "μs" => 1e3,
                "ms" => 1e6,
                "s" => 1e9,
                "m" => 60e9,
                "h" => 3600e9,
                _ => return Err(invalid()),
            };
            rest = &rest[unit_len..];
            total_nanos += number * scale;
        }

        if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
            return Err(invalid());
        }
        Ok(GoDuration(Duration::from_nanos(total_nanos.round() as u64)))
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return write!(f, "0s");
        }
        if nanos < 1_000 {
            return write!(f, "{}ns", nanos);
        }
        if nanos < 1_000_000 {
            return write!(f, "{}µs", with_fraction(nanos, 1_000));
        }
        if nanos < 1_000_000_000 {
            return write!(f, "{}ms", with_fraction(nanos, 1_000_000));
        }

        let secs = self.0.as_secs();
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        let sub_nanos = u128::from(self.0.subsec_nanos());
        let seconds = with_fraction(u128::from(s) * 1_000_000_000 + sub_nanos, 1_000_000_000);
        if h > 0 {
            write!(f, "{}h{}m{}s", h, m, seconds)
        } else if m > 0 {
            write!(f, "{}m{}s", m, seconds)
        } else {
            write!(f, "{}s", seconds)
        }
    }
}

fn with_fraction(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let width = unit.to_string().len() - 1;
    let digits = format!("{:0width$}", frac, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

impl Serialize for GoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.label_prefix, "go:");
        assert_eq!(cfg.debug_label_prefix, "go:debug:");
        assert_eq!(cfg.go_binary, "go");
        assert!(cfg.prune_generated);
        assert!(!cfg.use_new_terminal);
        assert_eq!(cfg.generated_env_key, "ZED_GO_TEST_TASK_GENERATED");
        assert_eq!(cfg.generated_env_value, "1");
        assert_eq!(cfg.subtest_discovery_timeout, GoDuration::from_secs(30));
        cfg.validate().unwrap();
    }

    #[test]
    fn env_layer_overrides_defaults() {
        let mut cfg = Config::default();
        cfg.apply_env(env_from(&[
            ("LABEL_PREFIX", "unit:"),
            ("ADDITIONAL_GO_TEST_ARGS", "-v, -count=1,,"),
            ("PRUNE_GENERATED", "false"),
            ("USE_NEW_TERMINAL", "YES"),
            ("SUBTEST_DISCOVERY_TIMEOUT", "2m"),
        ]))
        .unwrap();

        assert_eq!(cfg.label_prefix, "unit:");
        assert_eq!(cfg.additional_go_test_args, vec!["-v", "-count=1"]);
        assert!(!cfg.prune_generated);
        assert!(cfg.use_new_terminal);
        assert_eq!(cfg.subtest_discovery_timeout, GoDuration::from_secs(120));
    }

    #[test]
    fn invalid_bool_is_config_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(env_from(&[("ALLOW_CONCURRENT_RUNS", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, TaskGenError::Config(_)));
        assert!(err.to_string().contains("ALLOW_CONCURRENT_RUNS"));
    }

    #[test]
    fn invalid_regex_fails_validation() {
        let cfg = Config {
            test_name_regex: "^Test(".into(),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(TaskGenError::Config(_))));
    }

    #[test]
    fn cli_overrides_win_over_env() {
        let mut cfg = Config::default();
        cfg.apply_env(env_from(&[("TASKS_PATH", "env/tasks.json")]))
            .unwrap();
        cfg.apply_overrides(&ConfigOverrides {
            tasks_path: Some(PathBuf::from("cli/tasks.json")),
            debug_path: None,
        });
        let root = Path::new("/w");
        assert_eq!(
            cfg.document_path(DocumentKind::Tasks, root),
            PathBuf::from("/w/cli/tasks.json")
        );
        assert_eq!(
            cfg.document_path(DocumentKind::Debug, root),
            PathBuf::from("/w/.zed/debug.json")
        );
    }

    #[test]
    fn absolute_document_path_is_kept() {
        let cfg = Config {
            debug_path: Some(PathBuf::from("/etc/zed/debug.json")),
            ..Config::default()
        };
        assert_eq!(
            cfg.document_path(DocumentKind::Debug, Path::new("/w")),
            PathBuf::from("/etc/zed/debug.json")
        );
    }

    #[test]
    fn global_target_moves_default_paths_out_of_root() {
        let mut cfg = Config::default();
        cfg.apply_env(env_from(&[("TARGET", "global")])).unwrap();
        assert_eq!(cfg.target, EditorTarget::Global);
        if let Some(dir) = dirs::config_dir() {
            assert_eq!(
                cfg.document_path(DocumentKind::Tasks, Path::new("/w")),
                dir.join("zed").join("tasks.json")
            );
        }
    }

    #[test]
    fn toml_file_layer_uses_defaults_for_missing_keys() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "label_prefix = \"t:\"\nsubtest_discovery_timeout = \"45s\"\n",
        )
        .unwrap();
        let cfg = Config::from_file(&path).unwrap();
        assert_eq!(cfg.label_prefix, "t:");
        assert_eq!(cfg.subtest_discovery_timeout, GoDuration::from_secs(45));
        assert_eq!(cfg.debug_label_prefix, "go:debug:");
    }

    #[test]
    fn go_duration_parses_compound_values() {
        let d: GoDuration = "1h30m".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(5400));
        let d: GoDuration = "1.5s".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_millis(1500));
        let d: GoDuration = "250ms".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_millis(250));
        assert!("30".parse::<GoDuration>().is_err());
        assert!("-5s".parse::<GoDuration>().is_err());
        assert!("5 parsecs".parse::<GoDuration>().is_err());
    }

    #[test]
    fn go_duration_prints_like_go() {
        assert_eq!(GoDuration::from_secs(30).to_string(), "30s");
        assert_eq!(GoDuration::from_secs(120).to_string(), "2m0s");
        assert_eq!(GoDuration::from_secs(3600).to_string(), "1h0m0s");
        assert_eq!(
            GoDuration::from(Duration::from_millis(1500)).to_string(),
            "1.5s"
        );
        assert_eq!(
            GoDuration::from(Duration::from_millis(250)).to_string(),
            "250ms"
        );
    }
}
