//! Option resolution at the process boundary.
//!
//! The environment is captured once into an [`Environment`] snapshot and
//! merged with the config file and command-line overrides. Library
//! operations only ever see the resolved option structs.

use crate::arch::ArchList;
use crate::build_script::BuildScriptOptions;
use crate::config::loader::ConfigError;
use crate::config::schema::ProvisionConfig;
use crate::materialize::MaterializeOptions;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

/// Overrides the clone source URL.
pub const REPO_ENV: &str = "WAN2GP_REPO";
/// Semicolon-separated CUDA architectures, required by the build-script patcher.
pub const ARCH_LIST_ENV: &str = "TORCH_CUDA_ARCH_LIST";

pub const DEFAULT_REPO: &str = "https://github.com/deepbeepmeep/Wan2GP.git";
pub const DEFAULT_TARGET_DIR: &str = "/opt/Wan2GP";
pub const DEFAULT_BUILD_SCRIPT: &str = "setup.py";

const KNOWN_VARS: [&str; 2] = [REPO_ENV, ARCH_LIST_ENV];

/// Snapshot of the environment variables this crate reads.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<&'static str, OsString>,
}

impl Environment {
    /// Read the relevant variables from the process environment.
    pub fn capture() -> Self {
        let vars = KNOWN_VARS
            .iter()
            .filter_map(|name| std::env::var_os(name).map(|value| (*name, value)))
            .collect();
        Self { vars }
    }

    /// Build a snapshot from explicit pairs; names outside the known set are ignored.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let vars = pairs
            .into_iter()
            .filter_map(|(name, value)| {
                KNOWN_VARS
                    .iter()
                    .find(|known| **known == name)
                    .map(|known| (*known, OsString::from(value)))
            })
            .collect();
        Self { vars }
    }

    fn get(&self, name: &'static str) -> Result<Option<String>, ConfigError> {
        match self.vars.get(name) {
            None => Ok(None),
            Some(value) => value
                .clone()
                .into_string()
                .map(Some)
                .map_err(|_| ConfigError::InvalidEnv {
                    name,
                    reason: "value is not valid UTF-8".to_string(),
                }),
        }
    }
}

/// Command-line overrides for the `clone` command.
#[derive(Debug, Clone, Default)]
pub struct CloneOverrides {
    pub repo: Option<String>,
    pub target_dir: Option<PathBuf>,
    pub strict: bool,
}

/// Command-line overrides for the `patch-setup` command.
#[derive(Debug, Clone, Default)]
pub struct BuildScriptOverrides {
    pub path: Option<PathBuf>,
    pub arch_list: Option<String>,
    pub strict: bool,
}

/// Resolve materializer options: flag, then `WAN2GP_REPO`, then config, then default.
pub fn resolve_materialize(
    config: &ProvisionConfig,
    env: &Environment,
    overrides: CloneOverrides,
) -> Result<MaterializeOptions, ConfigError> {
    let repo_url = match overrides.repo {
        Some(repo) => repo,
        None => match env.get(REPO_ENV)? {
            Some(repo) if repo.trim().is_empty() => {
                return Err(ConfigError::InvalidEnv {
                    name: REPO_ENV,
                    reason: "value is empty".to_string(),
                })
            }
            Some(repo) => repo,
            None => config
                .clone
                .repo
                .clone()
                .unwrap_or_else(|| DEFAULT_REPO.to_string()),
        },
    };

    let target_dir = overrides
        .target_dir
        .or_else(|| config.clone.target_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR));

    Ok(MaterializeOptions {
        repo_url,
        target_dir,
        strict: overrides.strict || config.clone.strict.unwrap_or(false),
    })
}

/// Resolve build-script options. `TORCH_CUDA_ARCH_LIST` has no default.
pub fn resolve_build_script(
    config: &ProvisionConfig,
    env: &Environment,
    overrides: BuildScriptOverrides,
) -> Result<BuildScriptOptions, ConfigError> {
    let raw = match overrides.arch_list {
        Some(list) => list,
        None => env
            .get(ARCH_LIST_ENV)?
            .ok_or(ConfigError::MissingEnv {
                name: ARCH_LIST_ENV,
            })?,
    };
    let arch_list = ArchList::parse(&raw).map_err(|e| ConfigError::InvalidEnv {
        name: ARCH_LIST_ENV,
        reason: e.to_string(),
    })?;

    Ok(BuildScriptOptions {
        path: resolve_build_script_path(config, overrides.path),
        arch_list,
        strict: overrides.strict || config.build_script.strict.unwrap_or(false),
    })
}

/// Build-script path alone, for read-only status checks.
pub fn resolve_build_script_path(config: &ProvisionConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| config.build_script.path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_SCRIPT))
}

/// Clone directory alone, for read-only status checks.
pub fn resolve_target_dir(config: &ProvisionConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| config.clone.target_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR))
}
