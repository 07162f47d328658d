//! Normalization of toolchain descriptors.
//!
//! Two textual shapes are accepted: a legacy bare reference such as
//! `:gcc`, passed through untouched, and a structured JSON-with-comments
//! document, which is rewritten as plain JSON into a private temp file
//! for the duration of a scope. The scope owns that temp state and
//! releases it unconditionally on drop.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::fsutil;

/// A usable toolchain argument, alive for the duration of one build.
#[derive(Debug)]
pub struct ScopedToolchain {
    arg: String,
    temp_dir: Option<PathBuf>,
}

impl ScopedToolchain {
    /// The value to hand to the tool's `--toolchain=` flag.
    pub fn as_arg(&self) -> &str {
        &self.arg
    }
}

impl Drop for ScopedToolchain {
    fn drop(&mut self) {
        if let Some(dir) = self.temp_dir.take() {
            fsutil::rm_rf(&dir);
        }
    }
}

/// Normalize either descriptor shape into a usable handle.
pub fn fixup_toolchain(spec: &str) -> Result<ScopedToolchain> {
    if !is_structured_descriptor(spec) {
        return Ok(ScopedToolchain {
            arg: spec.to_string(),
            temp_dir: None,
        });
    }

    let src = Path::new(spec);
    let text =
        std::fs::read_to_string(src).with_context(|| format!("read toolchain {spec}"))?;
    let stripped = strip_line_comments(&text);
    let doc: serde_json::Value = serde_json::from_str(&stripped)
        .with_context(|| format!("parse toolchain {spec}"))?;

    let dir = fsutil::create_temp_dir("brix_toolchain")?;
    let normalized = dir.join("toolchain.json");
    let mut bytes = serde_json::to_vec_pretty(&doc)?;
    bytes.push(b'\n');
    std::fs::write(&normalized, &bytes)
        .with_context(|| format!("write {}", normalized.display()))?;

    Ok(ScopedToolchain {
        arg: normalized.display().to_string(),
        temp_dir: Some(dir),
    })
}

/// The toolchain used by fixture builds when a test does not pick one.
pub fn get_default_test_toolchain() -> String {
    if let Some(v) = std::env::var_os("BRIX_TEST_TOOLCHAIN") {
        let v = v.to_string_lossy().into_owned();
        if !v.is_empty() {
            return v;
        }
    }
    if cfg!(windows) {
        ":msvc".to_string()
    } else {
        ":gcc".to_string()
    }
}

fn is_structured_descriptor(spec: &str) -> bool {
    let lower = spec.to_ascii_lowercase();
    lower.ends_with(".json5") || lower.ends_with(".jsonc") || lower.ends_with(".json")
}

/// Strip `//` line comments, respecting string literals. Block comments
/// are not part of either supported descriptor shape.
fn strip_line_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let mut in_string = false;
        let mut escaped = false;
        let mut cut = line.len();
        let mut prev = '\0';
        for (i, ch) in line.char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
            } else if ch == '"' {
                in_string = true;
            } else if ch == '/' && prev == '/' {
                cut = i - 1;
                break;
            }
            prev = ch;
        }
        out.push_str(&line[..cut]);
        out.push('\n');
    }
    out
}
