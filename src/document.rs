//! Persisted editor documents: a top-level JSON array of entry objects.
//! Entries are kept as insertion-ordered maps so user-authored fields survive
//! a read/write cycle untouched.

use crate::atomic_write::{self, WriteOutcome};
use crate::error::{Result, TaskGenError};
use crate::relaxed_json;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// One opaque document entry. Only `label` and the `env` marker are inspected.
pub type Entry = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Zed `tasks.json`
    Tasks,
    /// Zed `debug.json` (Delve launch configs)
    Debug,
}

impl DocumentKind {
    pub fn file_name(self) -> &'static str {
        match self {
            DocumentKind::Tasks => "tasks.json",
            DocumentKind::Debug => "debug.json",
        }
    }

    /// Noun used in summaries ("Tasks added: ...").
    pub fn entry_noun(self) -> &'static str {
        match self {
            DocumentKind::Tasks => "Tasks",
            DocumentKind::Debug => "Debug configs",
        }
    }

    pub fn generated_line_prefix(self) -> &'static str {
        match self {
            DocumentKind::Tasks => "Generated task",
            DocumentKind::Debug => "Generated debug config",
        }
    }
}

/// Reads `path` as relaxed JSON. A missing or blank file is an empty document.
pub fn read_document(path: &Path) -> Result<Vec<Entry>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(TaskGenError::io(format!("read {}", path.display()), err)),
    };
    parse_document(&raw).map_err(|message| TaskGenError::MalformedDocument {
        path: path.to_path_buf(),
        message,
    })
}

/// Parses document bytes. Errors are plain messages; callers attach the path.
pub fn parse_document(raw: &[u8]) -> std::result::Result<Vec<Entry>, String> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let normalized = relaxed_json::normalize(raw).map_err(|e| e.to_string())?;
    serde_json::from_slice::<Vec<Entry>>(&normalized).map_err(|e| e.to_string())
}

/// Two-space indented JSON array followed by a newline.
pub fn render_document(entries: &[Entry]) -> Result<String> {
    let mut buf = Vec::with_capacity(entries.len() * 256 + 4);
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = Serializer::with_formatter(&mut buf, formatter);
    entries.serialize(&mut serializer).map_err(|e| {
        TaskGenError::io(
            "serialize document JSON",
            std::io::Error::new(ErrorKind::InvalidData, e),
        )
    })?;
    buf.push(b'\n');
    String::from_utf8(buf).map_err(|e| {
        TaskGenError::io(
            "serialize document JSON",
            std::io::Error::new(ErrorKind::InvalidData, e),
        )
    })
}

/// Replaces the whole file atomically, creating parent directories.
pub fn write_document(path: &Path, rendered: &str) -> Result<WriteOutcome> {
    atomic_write::write_atomic(path, rendered.as_bytes())
}
