pub mod env;
pub mod loader;
pub mod schema;

pub use env::{
    resolve_build_script, resolve_build_script_path, resolve_materialize, resolve_target_dir,
    BuildScriptOverrides, CloneOverrides, Environment, ARCH_LIST_ENV, DEFAULT_BUILD_SCRIPT,
    DEFAULT_REPO, DEFAULT_TARGET_DIR, REPO_ENV,
};
pub use loader::{load_from_path, load_from_str, ConfigError};
pub use schema::{
    BuildScriptSection, CloneSection, ProvisionConfig, ValidationError, ValidationIssue,
};
