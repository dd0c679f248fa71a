//! Whole-file replace through a sibling temp file and a rename, so Zed never
//! observes a half-written document.

use crate::error::{Result, TaskGenError};
use std::fs::{self, File, Metadata};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub bytes_written: u64,
    /// The file already held `content`; nothing was touched.
    pub unchanged: bool,
}

/// Writes `content` to `path`, creating missing parent directories and
/// keeping the permissions of a file that is replaced. Both the temp file and
/// the parent directory are synced before returning.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<WriteOutcome> {
    // "tasks.json" has parent "" which File::open rejects
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let existing = match fs::metadata(path) {
        Ok(meta) => Some(meta),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => return Err(TaskGenError::io(format!("stat {}", path.display()), err)),
    };

    match &existing {
        Some(meta) => {
            if is_unchanged(path, meta, content)? {
                return Ok(WriteOutcome {
                    bytes_written: 0,
                    unchanged: true,
                });
            }
        }
        None => fs::create_dir_all(parent).map_err(|e| {
            TaskGenError::io(format!("create directory {}", parent.display()), e)
        })?,
    }

    let mut temp = NamedTempFile::new_in(parent)
        .map_err(|e| TaskGenError::io(format!("create temp file in {}", parent.display()), e))?;
    temp.as_file_mut()
        .write_all(content)
        .and_then(|()| temp.as_file().sync_data())
        .map_err(|e| TaskGenError::io(format!("write {}", temp.path().display()), e))?;

    if let Some(meta) = &existing {
        fs::set_permissions(temp.path(), meta.permissions()).map_err(|e| {
            TaskGenError::io(format!("copy permissions of {}", path.display()), e)
        })?;
    }

    temp.persist(path)
        .map_err(|e| TaskGenError::io(format!("replace {}", path.display()), e.error))?;
    sync_dir(parent)
        .map_err(|e| TaskGenError::io(format!("sync directory {}", parent.display()), e))?;

    Ok(WriteOutcome {
        bytes_written: content.len() as u64,
        unchanged: false,
    })
}

fn is_unchanged(path: &Path, metadata: &Metadata, content: &[u8]) -> Result<bool> {
    if !metadata.is_file() || metadata.len() != content.len() as u64 {
        return Ok(false);
    }

    let read_err = |e| TaskGenError::io(format!("read {}", path.display()), e);
    let mut file = File::open(path).map_err(read_err)?;
    let mut buf = [0u8; 8192];
    let mut offset = 0usize;
    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            return Ok(offset == content.len());
        }
        if content.get(offset..offset + n) != Some(&buf[..n]) {
            return Ok(false);
        }
        offset += n;
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
