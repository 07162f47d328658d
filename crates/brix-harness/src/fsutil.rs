//! Filesystem helpers shared by the fixture machinery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

/// Remove `path` whether it is a directory tree, a file, or already gone.
pub fn ensure_absent(path: &Path) -> Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("remove_dir_all {}", path.display()))?;
    } else if path.exists() {
        std::fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}

/// Best-effort removal for teardown paths. Never fails: a teardown error
/// must not mask the test failure it is running after.
pub fn rm_rf(path: &Path) {
    if path.is_dir() {
        let _ = std::fs::remove_dir_all(path);
    } else {
        let _ = std::fs::remove_file(path);
    }
}

/// Copy the tree at `src` into a new directory `dst`.
///
/// Fails if `src` does not exist or `dst` already does. Symlinks are not
/// followed; only files and directories are copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("copy source is not a directory: {}", src.display());
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create_dir_all {}", parent.display()))?;
    }
    std::fs::create_dir(dst).with_context(|| format!("create {}", dst.display()))?;
    copy_dir_contents(src, dst)
}

fn copy_dir_contents(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src).with_context(|| format!("read_dir {}", src.display()))? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if ty.is_dir() {
            std::fs::create_dir_all(&dst_path)
                .with_context(|| format!("create {}", dst_path.display()))?;
            copy_dir_contents(&src_path, &dst_path)?;
        } else if ty.is_file() {
            std::fs::copy(&src_path, &dst_path).with_context(|| {
                format!("copy {} -> {}", src_path.display(), dst_path.display())
            })?;
        }
    }
    Ok(())
}

/// Allocate a fresh directory under the system temp dir.
///
/// The name embeds the pid so that concurrently running test workers can
/// never race each other for a path, and a process-local counter keeps
/// repeated calls within one worker disjoint.
pub fn create_temp_dir(prefix: &str) -> Result<PathBuf> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let base = std::env::temp_dir();
    let pid = std::process::id();
    for _ in 0..10_000 {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = base.join(format!("{prefix}_{pid}_{n}"));
        if std::fs::create_dir(&path).is_ok() {
            return Ok(path);
        }
    }
    bail!("failed to create temp dir under {}", base.display());
}

/// Owns a fixture directory and removes it when dropped.
///
/// Removal is idempotent (a target already deleted by the test itself is
/// fine) and runs exactly once: `release` disarms the guard after an
/// explicit teardown.
#[derive(Debug)]
pub struct DirGuard {
    path: PathBuf,
    armed: bool,
}

impl DirGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the guarded directory now and disarm the guard.
    pub fn remove_now(&mut self) {
        if self.armed {
            rm_rf(&self.path);
            self.armed = false;
        }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        self.remove_now();
    }
}
