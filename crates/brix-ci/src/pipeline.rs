//! The bootstrap verification pipeline.
//!
//! Two self-build passes back to back: phase 1 proves the trusted
//! baseline can build the project, phase 2 proves the output of that
//! build can do the same with the structured toolchain descriptor. The
//! catalog database is recreated before each phase because the two
//! executables may disagree on its schema. On full success the pipeline
//! hands control to the external test runner and adopts its exit code.

use std::path::Path;
use std::process::{Command, ExitCode};

use anyhow::{Context, Result};

use brix_harness::fsutil;
use brix_harness::toolchain::fixup_toolchain;
use brix_harness::{BuildOptions, ToolWrapper};

use crate::bootstrap::{self, BootstrapMode};
use crate::paths::CiPaths;
use crate::Reporter;

#[derive(Debug)]
pub struct CiOptions {
    pub toolchain: String,
    pub toolchain_json5: Option<String>,
    pub bootstrap_with: BootstrapMode,
    pub build_only: bool,
    pub jobs: Option<usize>,
    pub test_runner: String,
    pub release_base_url: String,
}

pub fn run(paths: &CiPaths, opts: &CiOptions, reporter: &Reporter) -> Result<ExitCode> {
    let baseline = bootstrap::acquire_baseline(
        paths,
        opts.bootstrap_with,
        &opts.release_base_url,
        reporter,
    )?;

    let catalog = paths.catalog_db();
    let ci_repo = paths.ci_repo_dir();
    fsutil::ensure_absent(&catalog)?;
    fsutil::ensure_absent(&ci_repo)?;
    std::fs::create_dir_all(paths.build_dir())
        .with_context(|| format!("create_dir_all {}", paths.build_dir().display()))?;

    import_catalog(&baseline, paths, reporter)?;
    self_build(&baseline, paths, &opts.toolchain, opts.jobs, reporter)?;
    reporter.progress("main build PASSED");
    reporter.progress(&format!(
        "a brix executable has been generated: {}",
        paths.built_tool().display()
    ));

    if opts.build_only {
        reporter.progress("--build-only was given; second phase and tests will not execute");
        return Ok(ExitCode::SUCCESS);
    }

    // The newly built executable may expect an incompatible catalog schema.
    fsutil::ensure_absent(&catalog)?;

    let built = paths.built_tool();
    let structured = opts
        .toolchain_json5
        .as_deref()
        .context("a structured toolchain descriptor is required for the second phase")?;
    import_catalog(&built, paths, reporter)?;
    self_build(&built, paths, structured, opts.jobs, reporter)?;
    reporter.progress("bootstrap test PASSED");

    delegate_tests(paths, opts, reporter)
}

fn import_catalog(exe: &Path, paths: &CiPaths, reporter: &Reporter) -> Result<()> {
    let tool = ToolWrapper::new(exe);
    let out = tool.catalog_import(&paths.catalog_db(), &paths.catalog_json())?;
    reporter.forward(&out);
    Ok(())
}

/// Run the project's self-build with the given executable and toolchain,
/// pinned to this run's private catalog and scratch repo.
fn self_build(
    exe: &Path,
    paths: &CiPaths,
    toolchain_spec: &str,
    jobs: Option<usize>,
    reporter: &Reporter,
) -> Result<()> {
    let tc = fixup_toolchain(toolchain_spec)?;
    let mut tool = ToolWrapper::new(exe);
    tool.set_catalog(paths.catalog_db());
    tool.set_repo_scratch(paths.ci_repo_dir());

    let out = tool.build(&BuildOptions {
        project: paths.project_root().to_path_buf(),
        build_root: Some(paths.build_dir()),
        toolchain: Some(tc.as_arg().to_string()),
        jobs: Some(jobs.unwrap_or_else(default_jobs)),
        timeout: None,
        extra_args: Vec::new(),
    })?;
    reporter.forward(&out);
    Ok(())
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Hand off to the external functional test suite. The pipeline's exit
/// code is the runner's exit code.
fn delegate_tests(paths: &CiPaths, opts: &CiOptions, reporter: &Reporter) -> Result<ExitCode> {
    let workers = opts.jobs.unwrap_or(4);
    reporter.progress(&format!(
        "delegating to the test suite ({} workers)",
        workers
    ));
    let status = Command::new(&opts.test_runner)
        .arg("-v")
        .arg("--durations=10")
        .arg(format!("--basetemp={}", paths.test_basetemp().display()))
        .arg(format!("-n{workers}"))
        .arg("tests/")
        .current_dir(paths.project_root())
        .status()
        .with_context(|| format!("spawn test runner {}", opts.test_runner))?;

    Ok(match status.code() {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::from(1),
    })
}
