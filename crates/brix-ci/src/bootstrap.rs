//! Baseline acquisition: obtain a trusted brix executable to bootstrap
//! the self-build with.

use std::io::{Read as _, Write as _};
use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;

use crate::paths::CiPaths;
use crate::Reporter;

pub const DEFAULT_RELEASE_BASE_URL: &str =
    "https://github.com/brix-build/brix/releases/download/0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BootstrapMode {
    /// Download a prebuilt release artifact for this platform.
    Download,
    /// Build the prior released source tree locally.
    Build,
    /// Assume a previously produced artifact is already in place.
    Skip,
}

/// Resolve a platform key to its release artifact name. Exactly three
/// platforms are supported; anything else fails before any download.
pub fn prebuilt_artifact_name(os: &str) -> Result<&'static str> {
    match os {
        "windows" => Ok("brix-win-x64.exe"),
        "linux" => Ok("brix-linux-x64"),
        "macos" => Ok("brix-macos-x64"),
        other => bail!("no prebuilt brix binary for the \"{other}\" platform"),
    }
}

pub fn acquire_baseline(
    paths: &CiPaths,
    mode: BootstrapMode,
    release_base_url: &str,
    reporter: &Reporter,
) -> Result<PathBuf> {
    let dest = paths.prebuilt_tool();
    match mode {
        BootstrapMode::Download => download_prebuilt(paths, release_base_url, reporter)?,
        BootstrapMode::Build => bootstrap_build(paths, reporter)?,
        BootstrapMode::Skip => {
            if !dest.is_file() {
                bail!(
                    "--bootstrap-with=skip, but no prebuilt brix executable at {}",
                    dest.display()
                );
            }
        }
    }
    Ok(dest)
}

fn download_prebuilt(paths: &CiPaths, release_base_url: &str, reporter: &Reporter) -> Result<()> {
    let filename = prebuilt_artifact_name(std::env::consts::OS)?;
    let url = format!("{release_base_url}/{filename}");
    reporter.progress(&format!("downloading prebuilt brix executable: {url}"));

    let resp = ureq::get(&url)
        .call()
        .with_context(|| format!("GET {url}"))?;
    let mut reader = resp.into_body().into_reader();

    let dest = paths.prebuilt_tool();
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create_dir_all {}", parent.display()))?;
    }
    let mut file =
        std::fs::File::create(&dest).with_context(|| format!("create {}", dest.display()))?;
    let mut buf = [0u8; 1024 * 64];
    loop {
        let n = reader.read(&mut buf).context("read download stream")?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .with_context(|| format!("write {}", dest.display()))?;
    }
    drop(file);

    // Downloaded artifacts are not executable by default.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", dest.display()))?;
    }

    Ok(())
}

fn bootstrap_build(paths: &CiPaths, reporter: &Reporter) -> Result<()> {
    reporter.progress("bootstrapping by a local build of prior versions...");
    let script = paths.tools_dir().join("bootstrap.py");
    let python = python_exe();
    let status = Command::new(&python)
        .arg("-u")
        .arg(&script)
        .current_dir(paths.project_root())
        .status()
        .with_context(|| format!("spawn {python} -u {}", script.display()))?;
    if !status.success() {
        bail!("bootstrap build failed ({status}): {}", script.display());
    }
    Ok(())
}

fn python_exe() -> String {
    if let Some(v) = std::env::var_os("BRIX_PYTHON") {
        let v = v.to_string_lossy().into_owned();
        if !v.is_empty() {
            return v;
        }
    }
    if cfg!(windows) {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_platforms_map_to_fixed_artifacts() {
        assert_eq!(prebuilt_artifact_name("windows").unwrap(), "brix-win-x64.exe");
        assert_eq!(prebuilt_artifact_name("linux").unwrap(), "brix-linux-x64");
        assert_eq!(prebuilt_artifact_name("macos").unwrap(), "brix-macos-x64");
    }

    #[test]
    fn unsupported_platform_fails_immediately() {
        let err = prebuilt_artifact_name("freebsd").unwrap_err();
        assert!(err.to_string().contains("freebsd"), "{err:#}");
    }
}
