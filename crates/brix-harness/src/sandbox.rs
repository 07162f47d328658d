//! Worker-aware allocation of project fixtures.
//!
//! Tests may run in a single process or across a pool of parallel worker
//! processes. The placement strategy branches on that exactly once, here:
//! the primary (or only) worker uses stable test-name-derived paths next
//! to the test sources for easy debugging; any other worker allocates
//! under a temp-dir pool namespaced by worker identity and test name, so
//! no two concurrently running tests can collide even when they share a
//! test name.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::fsutil::{self, DirGuard};
use crate::project::Project;
use crate::tool::ToolWrapper;

pub const WORKER_ENV_VAR: &str = "BRIX_TEST_WORKER";

/// Identity of the current test-execution worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerId {
    /// Single-process execution, or the pool's primary worker.
    Primary,
    /// One worker among a parallel pool.
    Worker(String),
}

impl WorkerId {
    /// Read the identity supplied by the outer test-execution layer.
    /// Unset, empty, or the sentinel `primary` all mean no parallelism.
    pub fn from_env() -> Self {
        match std::env::var(WORKER_ENV_VAR) {
            Ok(id) if !id.is_empty() && id != "primary" => Self::Worker(id),
            _ => Self::Primary,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }
}

/// Allocates isolated project fixtures for one test.
#[derive(Debug)]
pub struct ProjectOpener {
    tool: ToolWrapper,
    worker: WorkerId,
    test_name: String,
    test_dir: PathBuf,
}

impl ProjectOpener {
    /// An opener for the test named `test_name`, whose sources live in
    /// `test_dir`. The worker identity is taken from the environment.
    pub fn new(tool: ToolWrapper, test_name: &str, test_dir: impl Into<PathBuf>) -> Self {
        Self::with_worker(tool, WorkerId::from_env(), test_name, test_dir)
    }

    pub fn with_worker(
        tool: ToolWrapper,
        worker: WorkerId,
        test_name: &str,
        test_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tool,
            worker,
            test_name: test_name.to_string(),
            test_dir: test_dir.into(),
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn test_dir(&self) -> &Path {
        &self.test_dir
    }

    /// Open a project fixture as a copy of `template_dir` (resolved
    /// against the test dir when relative).
    ///
    /// The copy, a cloned tool handle, and a fresh scratch repo dir are
    /// all private to the returned fixture and reclaimed on its teardown.
    /// A partially copied tree is reclaimed the same way.
    pub fn open(&self, template_dir: impl AsRef<Path>) -> Result<Project> {
        let template = self.resolve(template_dir.as_ref());
        if !template.is_dir() {
            bail!("project template not found: {}", template.display());
        }

        let dest = self.fixture_dir("test_project")?;
        let root = dest.content.clone();
        let root_guard = DirGuard::new(dest.owned);
        fsutil::copy_tree(&template, &root)?;
        self.finish(root, root_guard)
    }

    /// Open a fixture over a fresh empty project directory.
    pub fn open_empty(&self) -> Result<Project> {
        let dest = self.fixture_dir("test_project")?;
        let root = dest.content.clone();
        if self.worker.is_primary() {
            // A prior failed run may have left the stable path populated.
            fsutil::ensure_absent(&root)?;
        } else if root.exists() {
            bail!("fixture dir already exists: {}", root.display());
        }
        let root_guard = DirGuard::new(dest.owned);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create {}", root.display()))?;
        self.finish(root, root_guard)
    }

    fn finish(&self, root: PathBuf, root_guard: DirGuard) -> Result<Project> {
        let mut tool = self.tool.clone();

        let scratch = self.fixture_dir("test_repo")?;
        if self.worker.is_primary() {
            fsutil::ensure_absent(&scratch.content)?;
        }
        let scratch_dir = scratch.content.clone();
        let scratch_guard = DirGuard::new(scratch.owned);
        std::fs::create_dir_all(&scratch_dir)
            .with_context(|| format!("create {}", scratch_dir.display()))?;

        tool.set_repo_scratch(&scratch_dir);
        tool.set_default_cwd(&root);

        Ok(Project::new(root, root_guard, scratch_dir, scratch_guard, tool))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.test_dir.join(path)
        }
    }

    fn fixture_dir(&self, kind: &str) -> Result<FixtureDir> {
        match &self.worker {
            WorkerId::Primary => {
                let dir = self.test_dir.join(format!("__{kind}_{}", self.test_name));
                Ok(FixtureDir {
                    content: dir.clone(),
                    owned: dir,
                })
            }
            WorkerId::Worker(id) => {
                let pool = fsutil::create_temp_dir(&format!("brix_{kind}_{id}"))?;
                Ok(FixtureDir {
                    content: pool.join(&self.test_name),
                    owned: pool,
                })
            }
        }
    }
}

/// Where fixture content goes, and which directory the fixture owns for
/// teardown. They differ for pool placements: the whole pool dir is
/// reclaimed, not just the test-name subdirectory inside it.
struct FixtureDir {
    content: PathBuf,
    owned: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_paths_derive_from_test_name() {
        let opener = ProjectOpener::with_worker(
            ToolWrapper::new("brix"),
            WorkerId::Primary,
            "my_test",
            "/src/tests",
        );
        let dir = opener.fixture_dir("test_project").unwrap();
        assert_eq!(dir.content, PathBuf::from("/src/tests/__test_project_my_test"));
        assert_eq!(dir.owned, dir.content);
    }

    #[test]
    fn worker_sentinel_is_primary() {
        assert!(WorkerId::Primary.is_primary());
        assert!(!WorkerId::Worker("gw1".to_string()).is_primary());
    }
}
