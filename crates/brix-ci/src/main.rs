//! Outer CI driver: verifies that brix can build itself across two
//! generations, then delegates to the functional test suite.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;

use brix_harness::RunOutput;

mod bootstrap;
mod paths;
mod pipeline;

use bootstrap::BootstrapMode;
use paths::CiPaths;
use pipeline::CiOptions;

#[derive(Debug, Parser)]
#[command(name = "brix-ci")]
#[command(about = "Bootstrap verification driver for the brix build tool.", long_about = None)]
struct Cli {
    /// How are we to obtain a bootstrapped brix executable?
    #[arg(short = 'B', long = "bootstrap-with", value_enum)]
    bootstrap_with: BootstrapMode,

    /// The toolchain to use for the CI process.
    #[arg(short = 'T', long)]
    toolchain: String,

    /// The structured toolchain document to use with the bootstrapped
    /// executable in the second phase.
    #[arg(long = "toolchain-json5")]
    toolchain_json5: Option<String>,

    /// Only build the brix executable. Skip second phase and tests.
    #[arg(long)]
    build_only: bool,

    /// Root of the brix checkout (defaults to the current directory).
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Base URL the prebuilt baseline is downloaded from.
    #[arg(long, default_value = bootstrap::DEFAULT_RELEASE_BASE_URL)]
    release_base_url: String,

    /// Parallel jobs for the self-builds and the test-suite hint.
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Test runner executable the pipeline delegates to on full success.
    #[arg(long, default_value = "pytest")]
    test_runner: String,

    #[arg(long)]
    quiet: bool,
}

#[derive(Debug)]
pub(crate) struct Reporter {
    quiet: bool,
}

impl Reporter {
    pub(crate) fn progress(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{msg}");
        }
    }

    pub(crate) fn forward(&self, out: &RunOutput) {
        if !self.quiet {
            print!("{}", out.stdout);
            eprint!("{}", out.stderr);
        }
    }
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if !cli.build_only && cli.toolchain_json5.is_none() {
        bail!("the --toolchain-json5 argument is required (unless using --build-only)");
    }

    let paths = match cli.project_root {
        Some(root) => CiPaths::new(root),
        None => CiPaths::from_cwd()?,
    };
    let reporter = Reporter { quiet: cli.quiet };
    let opts = CiOptions {
        toolchain: cli.toolchain,
        toolchain_json5: cli.toolchain_json5,
        bootstrap_with: cli.bootstrap_with,
        build_only: cli.build_only,
        jobs: cli.jobs,
        test_runner: cli.test_runner,
        release_base_url: cli.release_base_url,
    };

    pipeline::run(&paths, &opts, &reporter)
}
