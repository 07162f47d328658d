//! Temporary git repository fixtures.
//!
//! Always placed under the temp-dir pool: several tests on the same
//! worker may each want a repo, and none of them needs a stable path.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

use crate::fsutil::{self, DirGuard};

pub const GIT_EXE_ENV_VAR: &str = "BRIX_GIT_EXE";

const FIXTURE_BRANCH: &str = "tmp_git_repo";
const FIXTURE_USER_NAME: &str = "user.name=Fixture Git";
const FIXTURE_USER_EMAIL: &str = "user.email=brix@example.org";

/// A committed copy of a template directory, removed on drop.
#[derive(Debug)]
pub struct GitRepo {
    guard: DirGuard,
    root: PathBuf,
}

impl GitRepo {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn teardown(&mut self) {
        self.guard.remove_now();
    }
}

/// Copy `template_dir` into a fresh temp directory, initialize a git
/// repository over it, and commit everything once on a fixed branch with
/// a fixed author identity.
pub fn tmp_git_repo(template_dir: &Path) -> Result<GitRepo> {
    if !template_dir.is_dir() {
        bail!("repo template not found: {}", template_dir.display());
    }

    let tmp = fsutil::create_temp_dir("brix_git")?;
    let guard = DirGuard::new(tmp.clone());
    let repo = tmp.join("r");
    fsutil::copy_tree(template_dir, &repo)?;

    let git = git_exe();
    run_git(&git, &["init", "."], &repo)?;
    run_git(&git, &["checkout", "-b", FIXTURE_BRANCH], &repo)?;
    run_git(&git, &["add", "-A"], &repo)?;
    run_git(
        &git,
        &[
            "-c",
            FIXTURE_USER_NAME,
            "-c",
            FIXTURE_USER_EMAIL,
            "commit",
            "-m",
            "Initial commit",
        ],
        &repo,
    )?;

    Ok(GitRepo { guard, root: repo })
}

pub fn git_exe() -> String {
    match std::env::var(GIT_EXE_ENV_VAR) {
        Ok(v) if !v.is_empty() => v,
        _ => "git".to_string(),
    }
}

fn run_git(git: &str, args: &[&str], cwd: &Path) -> Result<()> {
    let out = Command::new(git)
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("spawn {git} {}", args.join(" ")))?;
    if !out.status.success() {
        bail!(
            "git command failed ({}): {git} {}\nstdout:\n{}\nstderr:\n{}",
            out.status,
            args.join(" "),
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
    }
    Ok(())
}
