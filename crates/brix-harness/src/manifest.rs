//! Typed access to the two manifest documents a brix project carries.
//!
//! Required fields are enforced by deserialization, so a malformed
//! document surfaces as an error at the access site, not at fixture-open
//! time. Optional fields keep explicit presence: a manifest written
//! without `depends` reads back without `depends`, never as an empty
//! list. Unknown keys round-trip untouched.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PACKAGE_MANIFEST_FILENAME: &str = "package.json5";
pub const LIBRARY_MANIFEST_FILENAME: &str = "library.json5";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub namespace: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends: Option<Vec<String>>,
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PackageManifest {
    pub fn new(name: &str, namespace: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            version: version.to_string(),
            depends: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryManifest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<Vec<String>>,
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LibraryManifest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uses: None,
            extra: BTreeMap::new(),
        }
    }
}

pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

/// Serialize `doc` to `path` pretty-printed with 2-space indentation,
/// creating parent directories as needed. The write replaces the file
/// wholesale; there is no write-to-temp-then-rename step.
pub fn store<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create_dir_all {}", parent.display()))?;
    }
    let mut bytes = serde_json::to_vec_pretty(doc)?;
    bytes.push(b'\n');
    std::fs::write(path, &bytes).with_context(|| format!("write {}", path.display()))
}
