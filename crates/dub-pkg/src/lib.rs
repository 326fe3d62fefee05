//! Project composition, package management and dependency resolution for
//! the dub package manager core.
//!
//! This crate provides:
//! - `Package`: a recipe loaded from a directory, with derived defaults
//! - `PackageManager`: the index of packages across search roots, with
//!   atomic installation and removal
//! - `Project`: the dependency graph of a root package, per-platform
//!   configuration selection and build-settings aggregation
//! - The generic backtracking `resolver` and the `PackageSupplier`
//!   registry seam
//! - `SelectedVersions`: the persisted `dub.selections.json` pin set

pub mod envutil;
pub mod manager;
pub mod package;
pub mod project;
pub mod resolver;
pub mod scm;
pub mod selections;
pub mod supplier;
pub mod vars;

pub use manager::{ManagerError, PackageManager, PlacementLocation, PACKAGES_DIR};
pub use package::{Package, PackageError, SOURCE_DIRS, SOURCE_EXT, VIEWS_DIR};
pub use project::{Project, ProjectError, UpgradeOptions, DUB_DIR, PROJECT_CACHE_FILE};
pub use resolver::{
    ConstraintSource, DependencyProvider, DependencyType, ResolverError, TreeNode, TreeNodes,
};
pub use selections::{SelectedVersions, SelectionsError, FILE_VERSION, SELECTIONS_FILE};
pub use supplier::{MemorySupplier, PackageSupplier, SupplierError};
pub use vars::{expand_settings, expand_vars, VarContext, VarError};
