//! Project and library fixtures.
//!
//! A `Project` is one test's private copy of a source tree plus a
//! dedicated build-output directory and repo scratch area. It owns both
//! directories and reclaims them exactly once, on explicit teardown or on
//! drop, whichever comes first. A `Library` is a view into a project, not
//! a separate lifetime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::fsutil::DirGuard;
use crate::manifest::{
    self, LibraryManifest, PackageManifest, LIBRARY_MANIFEST_FILENAME, PACKAGE_MANIFEST_FILENAME,
};
use crate::tool::{BuildOptions, RunOutput, ToolWrapper};
use crate::toolchain;

/// Per-call knobs for `Project::build`.
#[derive(Debug, Default)]
pub struct ProjectBuildOptions {
    pub toolchain: Option<String>,
    pub jobs: Option<usize>,
    pub timeout: Option<Duration>,
}

/// A named library under `libs/` of a project, or the project root itself
/// acting as the implicit default library.
#[derive(Debug)]
pub struct Library {
    name: String,
    root: PathBuf,
}

impl Library {
    pub(crate) fn new(name: &str, root: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn library_manifest(&self) -> Result<LibraryManifest> {
        manifest::load(&self.root.join(LIBRARY_MANIFEST_FILENAME))
    }

    pub fn set_library_manifest(&self, doc: &LibraryManifest) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("create_dir_all {}", self.root.display()))?;
        manifest::store(&self.root.join(LIBRARY_MANIFEST_FILENAME), doc)
    }

    /// Write `content` at `path`, resolved against this library's root
    /// when relative, creating parent directories as needed.
    pub fn write(&self, path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create_dir_all {}", parent.display()))?;
        }
        std::fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// An on-disk project fixture with an exclusively owned tool handle.
#[derive(Debug)]
pub struct Project {
    // Declaration order is teardown order: the scratch repo dir was
    // registered last, so it is reclaimed first (LIFO).
    scratch_guard: DirGuard,
    root_guard: DirGuard,
    root: PathBuf,
    scratch_dir: PathBuf,
    build_root: PathBuf,
    tool: ToolWrapper,
}

impl Project {
    pub(crate) fn new(
        root: PathBuf,
        root_guard: DirGuard,
        scratch_dir: PathBuf,
        scratch_guard: DirGuard,
        tool: ToolWrapper,
    ) -> Self {
        let build_root = root.join("_build");
        Self {
            scratch_guard,
            root_guard,
            root,
            scratch_dir,
            build_root,
            tool,
        }
    }

    /// The fixture's private dependency-repository scratch area.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn tool(&self) -> &ToolWrapper {
        &self.tool
    }

    fn root_library(&self) -> Library {
        Library::new("<default>", self.root.clone())
    }

    pub fn lib(&self, name: &str) -> Library {
        Library::new(name, self.root.join("libs").join(name))
    }

    pub fn package_manifest(&self) -> Result<PackageManifest> {
        manifest::load(&self.root.join(PACKAGE_MANIFEST_FILENAME))
    }

    pub fn set_package_manifest(&self, doc: &PackageManifest) -> Result<()> {
        manifest::store(&self.root.join(PACKAGE_MANIFEST_FILENAME), doc)
    }

    pub fn library_manifest(&self) -> Result<LibraryManifest> {
        self.root_library().library_manifest()
    }

    pub fn set_library_manifest(&self, doc: &LibraryManifest) -> Result<()> {
        self.root_library().set_library_manifest(doc)
    }

    pub fn write(&self, path: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        self.root_library().write(path, content)
    }

    /// Run `brix build` on this project with the test toolchain.
    pub fn build(&self, opts: &ProjectBuildOptions) -> Result<RunOutput> {
        let spec = opts
            .toolchain
            .clone()
            .unwrap_or_else(toolchain::get_default_test_toolchain);
        let tc = toolchain::fixup_toolchain(&spec)?;
        self.tool.build(&BuildOptions {
            project: self.root.clone(),
            build_root: Some(self.build_root.clone()),
            toolchain: Some(tc.as_arg().to_string()),
            jobs: opts.jobs,
            timeout: opts.timeout,
            extra_args: vec!["-ltrace".into()],
        })
    }

    pub fn compile_file(&self, files: &[PathBuf], toolchain_spec: Option<&str>) -> Result<RunOutput> {
        let spec = toolchain_spec
            .map(str::to_string)
            .unwrap_or_else(toolchain::get_default_test_toolchain);
        let tc = toolchain::fixup_toolchain(&spec)?;
        self.tool
            .compile_file(files, tc.as_arg(), &self.build_root, &self.root)
    }

    pub fn pkg_create(&self, dest: Option<&Path>, if_exists: Option<&str>) -> Result<RunOutput> {
        std::fs::create_dir_all(&self.build_root)
            .with_context(|| format!("create_dir_all {}", self.build_root.display()))?;
        self.tool
            .pkg_create(&self.root, dest, if_exists, Some(&self.build_root))
    }

    pub fn sdist_export(&self) -> Result<RunOutput> {
        self.tool.sdist_export(&self.root)
    }

    /// Reclaim the project copy and its scratch repo dir now.
    ///
    /// Idempotent, and tolerant of the directories already being gone;
    /// dropping the fixture later performs no further work.
    pub fn teardown(&mut self) {
        self.scratch_guard.remove_now();
        self.root_guard.remove_now();
    }
}
