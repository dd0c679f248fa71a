//! Tolerant reader front-end for hand-edited editor JSON.
//!
//! Zed (like most editors) accepts `//` and `/* */` comments plus trailing
//! commas in its settings files. [`normalize`] rewrites such input into strict
//! JSON that `serde_json` accepts. String literals are copied through
//! byte-for-byte, escape sequences included.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelaxedJsonError {
    #[error("unterminated block comment starting at byte {0}")]
    UnterminatedComment(usize),
    #[error("unterminated string starting at byte {0}")]
    UnterminatedString(usize),
}

/// Comments removed first, then trailing commas.
pub fn normalize(data: &[u8]) -> Result<Vec<u8>, RelaxedJsonError> {
    let without_comments = strip_comments(data)?;
    Ok(strip_trailing_commas(&without_comments))
}

/// Removes comments outside string literals. Line comments keep their
/// terminating newline so line numbers in later parse errors still line up.
pub fn strip_comments(data: &[u8]) -> Result<Vec<u8>, RelaxedJsonError> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let ch = data[i];
        match ch {
            b'"' => {
                let end = string_end(data, i)?;
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            b'/' if data.get(i + 1) == Some(&b'/') => {
                i += 2;
                while i < data.len() && data[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if data.get(i + 1) == Some(&b'*') => {
                let start = i;
                i += 2;
                loop {
                    if i + 1 >= data.len() {
                        return Err(RelaxedJsonError::UnterminatedComment(start));
                    }
                    if data[i] == b'*' && data[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Drops any comma whose next non-whitespace byte closes an object or array.
/// Expects comment-free input.
pub fn strip_trailing_commas(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let ch = data[i];
        match ch {
            b'"' => {
                // unterminated strings were rejected by strip_comments; copy the rest
                let end = string_end(data, i).unwrap_or(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            b',' => {
                let mut j = i + 1;
                while j < data.len() && is_json_whitespace(data[j]) {
                    j += 1;
                }
                if !matches!(data.get(j), Some(b'}') | Some(b']')) {
                    out.push(ch);
                }
                i += 1;
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    out
}

/// Index one past the closing quote of the string opening at `start`.
fn string_end(data: &[u8], start: usize) -> Result<usize, RelaxedJsonError> {
    let mut i = start + 1;
    while i < data.len() {
        match data[i] {
            b'\\' => i += 2,
            b'"' => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(RelaxedJsonError::UnterminatedString(start))
}

fn is_json_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r')
}
