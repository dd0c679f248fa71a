use crate::error::{Result, TaskGenError};
use std::path::{Component, Path, PathBuf};

/// Nearest ancestor of `start` holding a `go.mod` file or a `.git` entry,
/// else `fallback`.
pub fn detect_workspace_root(start: &Path, fallback: &Path) -> PathBuf {
    for dir in start.ancestors() {
        if dir.join("go.mod").is_file() || dir.join(".git").exists() {
            return dir.to_path_buf();
        }
    }
    fallback.to_path_buf()
}

/// Absolute form of `path` against `cwd`, with `.` and `..` folded lexically.
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Checks the test file argument: must exist, be a regular file, end in `.go`.
pub fn validate_go_file(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| {
        TaskGenError::input(format!("stat file {:?}: {}", path.display().to_string(), e))
    })?;
    if meta.is_dir() {
        return Err(TaskGenError::input(format!(
            "file path points to a directory: {:?}",
            path.display().to_string()
        )));
    }
    if path.extension().and_then(|e| e.to_str()) != Some("go") {
        return Err(TaskGenError::input(format!(
            "file must have .go extension: {:?}",
            path.display().to_string()
        )));
    }
    Ok(())
}

/// `go test` package argument for `package_dir`: `.` or `./rel/path`.
pub fn package_arg(root: &Path, package_dir: &Path) -> Result<String> {
    let rel = package_dir.strip_prefix(root).map_err(|_| {
        TaskGenError::input(format!(
            "package directory {:?} is outside root {:?}",
            package_dir.display().to_string(),
            root.display().to_string()
        ))
    })?;

    let rel = to_slash(rel);
    if rel.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(format!("./{}", rel))
    }
}

/// Slash-separated path of `file` relative to `root`, or the absolute path
/// (still slash-normalized) when `file` is not under `root`.
pub fn display_relative(root: &Path, file: &Path) -> String {
    match file.strip_prefix(root) {
        Ok(rel) => to_slash(rel),
        Err(_) => to_slash(file),
    }
}

fn to_slash(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::RootDir => Some(String::new()),
            Component::Prefix(p) => Some(p.as_os_str().to_string_lossy().into_owned()),
            Component::CurDir | Component::ParentDir => None,
        })
        .collect();
    if parts.len() == 1 && parts[0].is_empty() {
        return "/".to_string();
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn detects_go_mod_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("proj");
        let pkg = root.join("internal").join("svc");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(root.join("go.mod"), "module example.com/proj\n").unwrap();

        assert_eq!(detect_workspace_root(&pkg, tmp.path()), root);
    }

    #[test]
    fn falls_back_when_no_marker() {
        let tmp = TempDir::new().unwrap();
        let pkg = tmp.path().join("a").join("b");
        fs::create_dir_all(&pkg).unwrap();
        let fallback = Path::new("/fallback");
        // an enclosing repo above the tempdir would also be a valid answer
        let found = detect_workspace_root(&pkg, fallback);
        assert!(found == fallback || !found.starts_with(&pkg));
    }

    #[test]
    fn package_arg_for_root_and_nested() {
        let root = Path::new("/w");
        assert_eq!(package_arg(root, Path::new("/w")).unwrap(), ".");
        assert_eq!(
            package_arg(root, Path::new("/w/internal/svc")).unwrap(),
            "./internal/svc"
        );
    }

    #[test]
    fn package_outside_root_is_rejected() {
        let err = package_arg(Path::new("/w/a"), Path::new("/w/b")).unwrap_err();
        assert!(matches!(err, TaskGenError::Input(_)));
        assert!(err.to_string().contains("outside root"));
    }

    #[test]
    fn relative_display_uses_slashes() {
        assert_eq!(
            display_relative(Path::new("/w"), Path::new("/w/pkg/a_test.go")),
            "pkg/a_test.go"
        );
        assert_eq!(
            display_relative(Path::new("/w"), Path::new("/other/a_test.go")),
            "/other/a_test.go"
        );
    }

    #[test]
    fn absolutize_folds_dots() {
        assert_eq!(
            absolutize(Path::new("../b/./c_test.go"), Path::new("/w/a")),
            PathBuf::from("/w/b/c_test.go")
        );
        assert_eq!(
            absolutize(Path::new("/x/y.go"), Path::new("/w")),
            PathBuf::from("/x/y.go")
        );
    }

    #[test]
    fn validate_rejects_directory_and_extension() {
        let tmp = TempDir::new().unwrap();
        let err = validate_go_file(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("directory"));

        let txt = tmp.path().join("notes.txt");
        fs::write(&txt, "x").unwrap();
        let err = validate_go_file(&txt).unwrap_err();
        assert!(err.to_string().contains(".go extension"));

        let missing = tmp.path().join("missing_test.go");
        assert!(matches!(
            validate_go_file(&missing),
            Err(TaskGenError::Input(_))
        ));

        let ok = tmp.path().join("ok_test.go");
        fs::write(&ok, "package x\n").unwrap();
        validate_go_file(&ok).unwrap();
    }
}
