//! Thin wrapper around the external `brix` executable.
//!
//! The wrapper composes argument vectors for the tool's subcommands and
//! fails loudly on any non-zero exit, surfacing the captured output
//! verbatim. It never interprets the tool's flags beyond composing them.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

/// Captured result of a successful tool invocation.
#[derive(Debug)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Options for a `brix build` invocation.
#[derive(Debug, Default)]
pub struct BuildOptions {
    pub project: PathBuf,
    pub build_root: Option<PathBuf>,
    pub toolchain: Option<String>,
    pub jobs: Option<usize>,
    pub timeout: Option<Duration>,
    pub extra_args: Vec<OsString>,
}

/// A clonable handle on the tool under test.
///
/// Each fixture gets its own clone so that binding a scratch repo dir or
/// default working directory never leaks between tests.
#[derive(Debug, Clone)]
pub struct ToolWrapper {
    exe: PathBuf,
    catalog_path: Option<PathBuf>,
    repo_scratch: Option<PathBuf>,
    default_cwd: Option<PathBuf>,
}

impl ToolWrapper {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            catalog_path: None,
            repo_scratch: None,
            default_cwd: None,
        }
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    pub fn set_catalog(&mut self, path: impl Into<PathBuf>) {
        self.catalog_path = Some(path.into());
    }

    /// Bind the private dependency-repository scratch area for this handle.
    pub fn set_repo_scratch(&mut self, dir: impl Into<PathBuf>) {
        self.repo_scratch = Some(dir.into());
    }

    pub fn repo_scratch(&self) -> Option<&Path> {
        self.repo_scratch.as_deref()
    }

    pub fn set_default_cwd(&mut self, dir: impl Into<PathBuf>) {
        self.default_cwd = Some(dir.into());
    }

    /// Run the tool with the given argument vector.
    ///
    /// Zero exit yields the captured output; anything else (including a
    /// timeout expiry, which kills the child) is an error carrying the
    /// command line, exit status, and both output streams. Partially
    /// written build output is left in place for post-mortem inspection.
    pub fn run(
        &self,
        args: &[OsString],
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<RunOutput> {
        let mut cmd = Command::new(&self.exe);
        cmd.args(args);
        if let Some(dir) = cwd.or(self.default_cwd.as_deref()) {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let display = render_command(&self.exe, args);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {display}"))?;

        let stdout = child.stdout.take().context("take stdout")?;
        let stderr = child.stderr.take().context("take stderr")?;
        let stdout_thread = std::thread::spawn(move || read_all(stdout));
        let stderr_thread = std::thread::spawn(move || read_all(stderr));

        let (status, timed_out) = wait_with_timeout(&mut child, timeout)?;
        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        if timed_out {
            bail!(
                "command timed out after {:?}: {display}\nstdout:\n{stdout}\nstderr:\n{stderr}",
                timeout.unwrap_or_default(),
            );
        }
        if !status.success() {
            bail!(
                "command failed ({status}): {display}\nstdout:\n{stdout}\nstderr:\n{stderr}"
            );
        }
        Ok(RunOutput { stdout, stderr })
    }

    /// `brix catalog import --catalog=<path> --json=<path>`
    pub fn catalog_import(&self, catalog: &Path, json: &Path) -> Result<RunOutput> {
        self.run(
            &[
                os("catalog"),
                os("import"),
                eq_arg("--catalog", catalog),
                eq_arg("--json", json),
            ],
            None,
            None,
        )
    }

    /// `brix build --project=<root> [--out=..] [--toolchain=..] [-jN] ...`
    ///
    /// The bound catalog and repo scratch dir, when present, are appended
    /// automatically so every build through this handle stays inside its
    /// fixture's private state.
    pub fn build(&self, opts: &BuildOptions) -> Result<RunOutput> {
        let mut args = vec![os("build"), eq_arg("--project", &opts.project)];
        if let Some(out) = &opts.build_root {
            args.push(eq_arg("--out", out));
        }
        if let Some(tc) = &opts.toolchain {
            args.push(os(&format!("--toolchain={tc}")));
        }
        if let Some(jobs) = opts.jobs {
            args.push(os(&format!("-j{jobs}")));
        }
        if let Some(catalog) = &self.catalog_path {
            args.push(eq_arg("--catalog", catalog));
        }
        if let Some(repo) = &self.repo_scratch {
            args.push(eq_arg("--repo-dir", repo));
        }
        args.extend(opts.extra_args.iter().cloned());
        self.run(&args, None, opts.timeout)
    }

    /// `brix pkg create --project=<root> [--out=<dest>] [--if-exists=<policy>]`
    pub fn pkg_create(
        &self,
        project: &Path,
        dest: Option<&Path>,
        if_exists: Option<&str>,
        cwd: Option<&Path>,
    ) -> Result<RunOutput> {
        let mut args = vec![os("pkg"), os("create"), eq_arg("--project", project)];
        if let Some(dest) = dest {
            args.push(eq_arg("--out", dest));
        }
        if let Some(policy) = if_exists {
            args.push(os(&format!("--if-exists={policy}")));
        }
        self.run(&args, cwd, None)
    }

    /// `brix sdist export --cache-dir=<scratch> --project=<root>`
    pub fn sdist_export(&self, project: &Path) -> Result<RunOutput> {
        let scratch = self
            .repo_scratch
            .as_deref()
            .context("sdist export requires a bound repo scratch dir")?;
        self.run(
            &[
                os("sdist"),
                os("export"),
                eq_arg("--cache-dir", scratch),
                eq_arg("--project", project),
            ],
            None,
            None,
        )
    }

    /// `brix compile-file <files..> --toolchain=<ref> --out=<dir> --project=<root>`
    pub fn compile_file(
        &self,
        files: &[PathBuf],
        toolchain: &str,
        out: &Path,
        project: &Path,
    ) -> Result<RunOutput> {
        let mut args = vec![os("compile-file")];
        args.extend(files.iter().map(|f| f.as_os_str().to_os_string()));
        args.push(os(&format!("--toolchain={toolchain}")));
        args.push(eq_arg("--out", out));
        args.push(eq_arg("--project", project));
        self.run(&args, None, None)
    }
}

fn os(s: &str) -> OsString {
    OsString::from(s)
}

fn eq_arg(flag: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push("=");
    arg.push(path.as_os_str());
    arg
}

fn render_command(exe: &Path, args: &[OsString]) -> String {
    let mut parts = vec![exe.display().to_string()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn read_all(mut src: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = src.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

fn wait_with_timeout(
    child: &mut std::process::Child,
    timeout: Option<Duration>,
) -> Result<(std::process::ExitStatus, bool)> {
    let Some(limit) = timeout else {
        let status = child.wait().context("wait child")?;
        return Ok((status, false));
    };

    // A limit too large to express as a deadline is no limit at all.
    let Some(deadline) = Instant::now().checked_add(limit) else {
        let status = child.wait().context("wait child")?;
        return Ok((status, false));
    };
    loop {
        if let Some(status) = child.try_wait().context("try_wait child")? {
            return Ok((status, false));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let status = child.wait().context("wait child after kill")?;
            return Ok((status, true));
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
