//! Bridge to the Go toolchain: `go test -list` for the authoritative set of
//! runnable top-level tests, and `go test -json` for runtime subtest discovery.

use crate::config::{Config, GoDuration};
use crate::error::{Result, TaskGenError};
use crate::process::{self, ProcessOutput};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

lazy_static! {
    static ref IDENT_RE: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid ident regex");
}

/// Status banners printed by `go test -list` around the names.
const LIST_NOISE_PREFIXES: &[&str] = &["ok ", "? ", "PASS", "FAIL"];

/// Flags the discovery run controls itself; caller copies are dropped.
const DISCOVERY_CONTROLLED_FLAGS: &[&str] = &["json", "run", "list", "timeout", "count"];

/// One line of `go test -json` (test2json) output. Other fields are ignored.
#[derive(Debug, Deserialize)]
struct TestEvent {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Test", default)]
    test: Option<String>,
}

/// Outcome of a discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Sorted, de-duplicated names of every test that started, subtests included.
    pub tests: Vec<String>,
    /// The run hit the timeout and `tests` comes from partial output.
    pub partial: bool,
}

// ── go test -list ───────────────────────────────────────────

/// Top-level tests `go test -list` reports as runnable in `package_dir`.
pub fn list_tests(config: &Config, package_dir: &Path) -> Result<BTreeSet<String>> {
    let args = vec![
        "test".to_string(),
        "-list".to_string(),
        config.go_list_regex.clone(),
        ".".to_string(),
    ];
    let described = process::describe(&config.go_binary, &args);
    debug!(command = %described, dir = %package_dir.display(), "listing tests");

    let mut command = Command::new(&config.go_binary);
    command.args(&args).current_dir(package_dir);
    let out = process::run_combined(&mut command, None)
        .map_err(|e| spawn_failure(&described, package_dir, e))?;

    if !out.success() {
        return Err(TaskGenError::Toolchain {
            command: described,
            dir: package_dir.to_path_buf(),
            status: out.status_text(),
            output: out.output_lossy(),
        });
    }

    let text = String::from_utf8_lossy(&out.output);
    let names: BTreeSet<String> = parse_test_list(&text).collect();
    info!(count = names.len(), elapsed_ms = out.elapsed.as_millis() as u64, "go test -list done");
    Ok(names)
}

/// Test names from `go test -list` output; banners and junk lines are skipped.
pub fn parse_test_list(output: &str) -> impl Iterator<Item = String> + '_ {
    output.lines().filter_map(|line| {
        let line = line.trim();
        if line.is_empty() || LIST_NOISE_PREFIXES.iter().any(|p| line.starts_with(p)) {
            return None;
        }
        let name = line.split_whitespace().next()?;
        IDENT_RE.is_match(name).then(|| name.to_string())
    })
}

/// Declared tests (in declaration order) that the toolchain confirmed runnable.
pub fn intersect_tests(in_file: &[String], runnable: &BTreeSet<String>) -> Vec<String> {
    in_file
        .iter()
        .filter(|name| runnable.contains(*name))
        .cloned()
        .collect()
}

// ── go test -json discovery ─────────────────────────────────

/// Runs exactly `top_level` once with `-json` and collects every test that
/// started. Failing tests are expected; only "failed and found nothing" is an
/// error. The subprocess never outlives `timeout`.
pub fn discover_subtests(
    config: &Config,
    package_dir: &Path,
    top_level: &[String],
    timeout: GoDuration,
    extra_args: &[String],
) -> Result<Discovery> {
    if top_level.is_empty() {
        return Ok(Discovery::default());
    }

    let args = discovery_args(top_level, timeout, extra_args);
    let described = process::describe(&config.go_binary, &args);
    debug!(command = %described, dir = %package_dir.display(), %timeout, "discovering subtests");

    let mut command = Command::new(&config.go_binary);
    command.args(&args).current_dir(package_dir);
    let out = process::run_combined(&mut command, Some(timeout.as_duration()))
        .map_err(|e| spawn_failure(&described, package_dir, e))?;

    classify_discovery(out, &described, package_dir, timeout)
}

fn classify_discovery(
    out: ProcessOutput,
    described: &str,
    package_dir: &Path,
    timeout: GoDuration,
) -> Result<Discovery> {
    let tests: BTreeSet<String> = parse_run_events(&out.output).collect();
    let tests: Vec<String> = tests.into_iter().collect();

    if out.timed_out {
        if tests.is_empty() {
            return Err(TaskGenError::Timeout {
                command: described.to_string(),
                dir: package_dir.to_path_buf(),
                timeout,
            });
        }
        warn!(
            found = tests.len(),
            %timeout,
            "subtest discovery timed out; using partial results"
        );
        return Ok(Discovery {
            tests,
            partial: true,
        });
    }

    if !out.success() {
        if tests.is_empty() {
            return Err(TaskGenError::Discovery {
                dir: package_dir.to_path_buf(),
                status: out.status_text(),
                output: out.output_lossy(),
            });
        }
        debug!(status = %out.status_text(), "discovery run failed but reported tests");
    }

    info!(
        found = tests.len(),
        elapsed_ms = out.elapsed.as_millis() as u64,
        "subtest discovery done"
    );
    Ok(Discovery {
        tests,
        partial: false,
    })
}

/// `test -json -count=1 -timeout <d> <sanitized extra...> -run <selector> .`
pub fn discovery_args(
    top_level: &[String],
    timeout: GoDuration,
    extra_args: &[String],
) -> Vec<String> {
    let mut args = vec![
        "test".to_string(),
        "-json".to_string(),
        "-count=1".to_string(),
        "-timeout".to_string(),
        timeout.to_string(),
    ];
    args.extend(sanitize_discovery_args(extra_args));
    args.push("-run".to_string());
    args.push(top_level_run_pattern(top_level));
    args.push(".".to_string());
    args
}

/// Names of tests with a `run` event. Lines that are not events are skipped:
/// build output and panics interleave freely with the JSON stream.
pub fn parse_run_events(output: &[u8]) -> impl Iterator<Item = String> + '_ {
    output.split(|b| *b == b'\n').filter_map(|line| {
        let line = String::from_utf8_lossy(line);
        let event: TestEvent = serde_json::from_str(line.trim()).ok()?;
        match event.test {
            Some(test) if event.action == "run" && !test.is_empty() => Some(test),
            _ => None,
        }
    })
}

/// Drops caller arguments that would fight the discovery run's own
/// `-json`/`-run`/`-list`/`-timeout`/`-count`. A separate value following a
/// bare `-run`, `-list`, `-timeout` or `-count` is dropped with it.
pub fn sanitize_discovery_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match flag_name(arg) {
            Some((name, has_value)) if DISCOVERY_CONTROLLED_FLAGS.contains(&name) => {
                let takes_value = name != "json";
                if takes_value && !has_value && iter.peek().is_some_and(|n| !n.starts_with('-')) {
                    iter.next();
                }
            }
            _ => out.push(arg.clone()),
        }
    }
    out
}

/// `-run=x` → `("run", true)`, `--test.count` → `("count", false)`.
fn flag_name(arg: &str) -> Option<(&str, bool)> {
    let body = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))?;
    let body = body.strip_prefix("test.").unwrap_or(body);
    match body.split_once('=') {
        Some((name, _)) => Some((name, true)),
        None => Some((body, false)),
    }
}

// ── run selectors ───────────────────────────────────────────

/// Selector for exactly the given top-level tests: `^A$` or `^(A|B)$`.
pub fn top_level_run_pattern(names: &[String]) -> String {
    if let [only] = names {
        return format!("^{}$", regex::escape(only));
    }
    let mut parts: Vec<String> = names.iter().map(|n| regex::escape(n)).collect();
    parts.sort();
    parts.dedup();
    format!("^({})$", parts.join("|"))
}

/// Selector matching one test path exactly: every `/` segment is anchored on
/// its own (`^Outer$/^Inner$`), so neither prefixes nor substrings match.
pub fn run_pattern_for_test_name(name: &str) -> String {
    if name.is_empty() {
        return "^$".to_string();
    }
    name.split('/')
        .map(|segment| format!("^{}$", regex::escape(segment)))
        .collect::<Vec<_>>()
        .join("/")
}

fn spawn_failure(described: &str, dir: &Path, err: std::io::Error) -> TaskGenError {
    TaskGenError::Toolchain {
        command: described.to_string(),
        dir: dir.to_path_buf(),
        status: format!("failed to start: {}", err),
        output: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mirrors how `go test -run` applies a selector: split on `/`, then each
    /// level's pattern must match the corresponding name segment.
    fn selector_matches(selector: &str, name: &str) -> bool {
        let patterns: Vec<&str> = selector.split('/').collect();
        let segments: Vec<&str> = name.split('/').collect();
        patterns.len() == segments.len()
            && patterns
                .iter()
                .zip(&segments)
                .all(|(p, s)| Regex::new(p).unwrap().is_match(s))
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn list_output_filters_banners_and_junk() {
        let output = "TestAlpha\nTestBeta\n\nExampleFoo output\nok  \texample.com/pkg\t0.01s\n? \tpkg\t[no test files]\nPASS\nFAIL\n--- weird\nnot-an-ident\n";
        let names: Vec<String> = parse_test_list(output).collect();
        assert_eq!(names, vec!["TestAlpha", "TestBeta", "ExampleFoo"]);
    }

    #[test]
    fn intersection_keeps_declaration_order() {
        let in_file = strings(&["TestBeta", "TestAlpha", "TestGone"]);
        let runnable: BTreeSet<String> = ["TestAlpha", "TestBeta", "TestOther"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            intersect_tests(&in_file, &runnable),
            vec!["TestBeta", "TestAlpha"]
        );
    }

    #[test]
    fn build_tag_excluded_test_is_not_selected() {
        let in_file = strings(&["TestAlpha", "TestBeta"]);
        let runnable: BTreeSet<String> = parse_test_list("TestAlpha\nok  \tpkg\t0.1s\n").collect();
        assert_eq!(intersect_tests(&in_file, &runnable), vec!["TestAlpha"]);
    }

    #[test]
    fn run_events_collect_started_tests_only() {
        let stream = br#"{"Action":"run","Test":"TestAlpha"}
{"Action":"run","Test":"TestAlpha/case1"}
this is not json
{"Action":"fail","Test":"TestAlpha"}
{"Action":"run","Test":""}
{"Action":"output","Package":"pkg","Output":"ok\n"}
{"Action":"run","Test":"TestAlpha"}
"#;
        let found: BTreeSet<String> = parse_run_events(stream).collect();
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["TestAlpha", "TestAlpha/case1"]
        );
    }

    #[test]
    fn run_events_tolerate_crlf_and_padding() {
        let stream = b"  {\"Action\":\"run\",\"Test\":\"TestX\"}  \r\n";
        let found: Vec<String> = parse_run_events(stream).collect();
        assert_eq!(found, vec!["TestX"]);
    }

    #[test]
    fn sanitize_drops_controlled_flags() {
        let args = strings(&[
            "-v",
            "-json",
            "-run",
            "TestX",
            "-run=TestY",
            "-count=3",
            "-timeout",
            "5s",
            "-list=.",
            "--test.count",
            "2",
            "-race",
            "-tags=integration",
        ]);
        assert_eq!(
            sanitize_discovery_args(&args),
            vec!["-v", "-race", "-tags=integration"]
        );
    }

    #[test]
    fn discovery_args_layout() {
        let args = discovery_args(
            &strings(&["TestB", "TestA"]),
            GoDuration::from_secs(30),
            &strings(&["-v", "-count=5"]),
        );
        assert_eq!(
            args,
            vec![
                "test", "-json", "-count=1", "-timeout", "30s", "-v", "-run",
                "^(TestA|TestB)$", "."
            ]
        );
    }

    #[test]
    fn top_level_pattern_single_and_many() {
        assert_eq!(top_level_run_pattern(&strings(&["TestA"])), "^TestA$");
        let many = top_level_run_pattern(&strings(&["TestB", "TestA"]));
        assert_eq!(many, "^(TestA|TestB)$");
        let re = Regex::new(&many).unwrap();
        assert!(re.is_match("TestA"));
        assert!(!re.is_match("TestAB"));
        assert!(!re.is_match("XTestB"));
    }

    #[test]
    fn flat_name_selector_is_anchored() {
        assert_eq!(run_pattern_for_test_name("TestAlpha"), "^TestAlpha$");
        assert_eq!(run_pattern_for_test_name(""), "^$");
    }

    #[test]
    fn subtest_selector_anchors_every_segment() {
        let selector = run_pattern_for_test_name("Outer/Inner with space");
        assert_eq!(selector, "^Outer$/^Inner with space$");
        assert!(selector_matches(&selector, "Outer/Inner with space"));
        assert!(!selector_matches(&selector, "Outer/Inner with spacemore"));
        assert!(!selector_matches(&selector, "XOuter/Inner with space"));
        assert!(!selector_matches(&selector, "Outer"));
    }

    #[test]
    fn selector_escapes_regex_metacharacters() {
        let selector = run_pattern_for_test_name("TestParse/a.b(c)+");
        assert!(selector_matches(&selector, "TestParse/a.b(c)+"));
        assert!(!selector_matches(&selector, "TestParse/aXb(c)+"));
    }

    #[cfg(unix)]
    mod with_fake_go {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn fake_go(dir: &Path, script: &str) -> Config {
            let path = dir.join("fake-go");
            fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            Config {
                go_binary: path.to_string_lossy().into_owned(),
                ..Config::default()
            }
        }

        #[test]
        fn list_failure_carries_output() {
            let tmp = TempDir::new().unwrap();
            let cfg = fake_go(tmp.path(), "echo 'build failed: syntax error'; exit 1");
            let err = list_tests(&cfg, tmp.path()).unwrap_err();
            match &err {
                TaskGenError::Toolchain { output, status, .. } => {
                    assert!(output.contains("build failed"));
                    assert_eq!(status, "exit status 1");
                }
                other => panic!("expected toolchain error, got {other:?}"),
            }
        }

        #[test]
        fn list_success_parses_names() {
            let tmp = TempDir::new().unwrap();
            let cfg = fake_go(tmp.path(), "printf 'TestA\\nTestB\\nok  \\tpkg\\t0.01s\\n'");
            let names = list_tests(&cfg, tmp.path()).unwrap();
            assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["TestA", "TestB"]);
        }

        #[test]
        fn failing_tests_still_yield_discovery() {
            let tmp = TempDir::new().unwrap();
            let cfg = fake_go(
                tmp.path(),
                r#"echo '{"Action":"run","Test":"TestA"}'
echo '{"Action":"run","Test":"TestA/sub"}'
echo '{"Action":"fail","Test":"TestA"}'
exit 1"#,
            );
            let found = discover_subtests(
                &cfg,
                tmp.path(),
                &strings(&["TestA"]),
                GoDuration::from_secs(20),
                &[],
            )
            .unwrap();
            assert_eq!(found.tests, vec!["TestA", "TestA/sub"]);
            assert!(!found.partial);
        }

        #[test]
        fn failure_without_events_is_discovery_error() {
            let tmp = TempDir::new().unwrap();
            let cfg = fake_go(tmp.path(), "echo 'cannot build'; exit 2");
            let err = discover_subtests(
                &cfg,
                tmp.path(),
                &strings(&["TestA"]),
                GoDuration::from_secs(20),
                &[],
            )
            .unwrap_err();
            assert!(matches!(err, TaskGenError::Discovery { .. }));
        }

        #[test]
        fn timeout_without_events_is_timeout_error() {
            let tmp = TempDir::new().unwrap();
            let cfg = fake_go(tmp.path(), "exec sleep 30");
            let err = discover_subtests(
                &cfg,
                tmp.path(),
                &strings(&["TestA"]),
                GoDuration::from(std::time::Duration::from_millis(300)),
                &[],
            )
            .unwrap_err();
            assert!(matches!(err, TaskGenError::Timeout { .. }));
        }

        #[test]
        fn timeout_with_events_returns_partial() {
            let tmp = TempDir::new().unwrap();
            let cfg = fake_go(
                tmp.path(),
                r#"echo '{"Action":"run","Test":"TestA"}'
exec sleep 30"#,
            );
            let found = discover_subtests(
                &cfg,
                tmp.path(),
                &strings(&["TestA"]),
                GoDuration::from(std::time::Duration::from_millis(500)),
                &[],
            )
            .unwrap();
            assert_eq!(found.tests, vec!["TestA"]);
            assert!(found.partial);
        }

        #[test]
        fn empty_top_level_skips_subprocess() {
            let cfg = Config {
                go_binary: "/nonexistent/go".to_string(),
                ..Config::default()
            };
            let found =
                discover_subtests(&cfg, Path::new("/"), &[], GoDuration::from_secs(1), &[])
                    .unwrap();
            assert!(found.tests.is_empty());
        }
    }
}
