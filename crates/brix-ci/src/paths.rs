//! Well-known locations inside a brix source checkout.
//!
//! Carried as an explicit context object rather than ambient globals, so
//! pipeline runs against different checkouts (including in tests of the
//! pipeline itself) can coexist in one process.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub fn tool_exe_name() -> &'static str {
    if cfg!(windows) {
        "brix.exe"
    } else {
        "brix"
    }
}

#[derive(Debug, Clone)]
pub struct CiPaths {
    project_root: PathBuf,
}

impl CiPaths {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn from_cwd() -> Result<Self> {
        Ok(Self::new(
            std::env::current_dir().context("determine current directory")?,
        ))
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.project_root.join("tools")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.project_root.join("_build")
    }

    /// The trusted baseline executable used to bootstrap a fresh build.
    pub fn prebuilt_tool(&self) -> PathBuf {
        self.project_root.join("_prebuilt").join(tool_exe_name())
    }

    /// The executable produced by the phase-1 self-build.
    pub fn built_tool(&self) -> PathBuf {
        self.build_dir().join(tool_exe_name())
    }

    pub fn catalog_db(&self) -> PathBuf {
        self.build_dir().join("catalog.db")
    }

    /// The dependency catalog definition imported before each phase.
    pub fn catalog_json(&self) -> PathBuf {
        self.project_root.join("catalog.json")
    }

    /// Scratch repository shared by both self-build phases of one run.
    pub fn ci_repo_dir(&self) -> PathBuf {
        self.build_dir().join("_ci-repo")
    }

    pub fn test_basetemp(&self) -> PathBuf {
        self.build_dir().join("_tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_project_root() {
        let paths = CiPaths::new("/src/brix");
        let root = Path::new("/src/brix");
        assert_eq!(paths.build_dir(), root.join("_build"));
        assert_eq!(paths.catalog_db(), root.join("_build/catalog.db"));
        assert_eq!(paths.ci_repo_dir(), root.join("_build/_ci-repo"));
        assert_eq!(paths.catalog_json(), root.join("catalog.json"));
        assert!(paths.prebuilt_tool().starts_with(root.join("_prebuilt")));
        assert!(paths.built_tool().starts_with(root.join("_build")));
        assert_ne!(paths.prebuilt_tool(), paths.built_tool());
    }
}
