//! Test harness for the `brix` build tool.
//!
//! Everything here treats `brix` as an opaque executable: the harness
//! composes argument vectors, allocates isolated on-disk fixtures for
//! functional tests, and guarantees that scratch state is reclaimed no
//! matter how a test ends.

pub mod fsutil;
pub mod gitrepo;
pub mod manifest;
pub mod project;
pub mod sandbox;
pub mod tool;
pub mod toolchain;

pub use gitrepo::{tmp_git_repo, GitRepo};
pub use manifest::{LibraryManifest, PackageManifest};
pub use project::{Library, Project, ProjectBuildOptions};
pub use sandbox::{ProjectOpener, WorkerId};
pub use tool::{BuildOptions, RunOutput, ToolWrapper};
pub use toolchain::{fixup_toolchain, ScopedToolchain};
