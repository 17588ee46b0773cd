//! Repository materializer: clone Wan2GP once, then patch its motion encoder.
//!
//! The clone step is skipped whenever the target directory already has
//! entries; nothing checks that those entries are a matching clone. The
//! motion-encoder patch rewrites the deprecated `torch.cuda.amp.autocast(`
//! call and is a no-op on files that are already patched or absent.

use crate::edit::{ApplyMode, DriftHint, PatchError, PatchReport, TextPatch};
use crate::safety::{CloneGuard, SafetyError};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;

/// Patch target, relative to the clone root.
pub const MOTION_ENCODER_PATH: &str = "models/wan/animate/motion_encoder.py";

/// Deprecated autocast entry point removed by the patch.
pub const DEPRECATED_AUTOCAST: &str = "torch.cuda.amp.autocast(";
/// Device-generic replacement for [`DEPRECATED_AUTOCAST`].
pub const DEVICE_AUTOCAST: &str = "torch.amp.autocast('cuda', ";

/// The motion-encoder autocast rewrite.
pub fn autocast_patch() -> TextPatch {
    TextPatch::new(DEPRECATED_AUTOCAST, DEVICE_AUTOCAST)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeOptions {
    /// Clone source
    pub repo_url: String,
    /// Directory the repository is cloned into
    pub target_dir: PathBuf,
    /// Fail instead of warning when the patch target no longer matches
    pub strict: bool,
}

#[derive(Error, Debug)]
pub enum CloneError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: ExitStatus },
}

impl CloneError {
    /// Exit code of the failed clone command, if it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CloneError::Failed { status, .. } => status.code(),
            CloneError::Spawn { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to list {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Clone(#[from] CloneError),

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Produces a clone of a repository in an empty directory.
pub trait Cloner {
    fn clone_repo(&self, repo_url: &str, target: &Path) -> Result<(), CloneError>;
}

/// Clones by running the `git` binary with an explicit argument list.
///
/// stdout and stderr are inherited. There is no timeout.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn describe(&self, repo_url: &str, target: &Path) -> String {
        format!(
            "{} clone {} {}",
            self.program.display(),
            repo_url,
            target.display()
        )
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl Cloner for GitCli {
    fn clone_repo(&self, repo_url: &str, target: &Path) -> Result<(), CloneError> {
        let command = self.describe(repo_url, target);
        info!("Running: {command}");

        let status = Command::new(&self.program)
            .arg("clone")
            .arg(repo_url)
            .arg(target)
            .status()
            .map_err(|source| CloneError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !status.success() {
            return Err(CloneError::Failed { command, status });
        }

        Ok(())
    }
}

/// What happened to the clone step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneOutcome {
    /// Repository was cloned into the empty directory
    Cloned,
    /// Dry run against an empty or missing directory
    WouldClone,
    /// Directory already had entries; clone skipped
    AlreadyPresent,
}

/// Result of one materializer run.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "MaterializeReport should be checked for the patch outcome"]
pub struct MaterializeReport {
    pub target_dir: PathBuf,
    pub clone: CloneOutcome,
    /// `None` when the motion-encoder file does not exist
    pub patch: Option<PatchReport>,
    /// File contents before and after, when the patch changed something
    pub diff: Option<(String, String)>,
    /// Closest line to the patch target when it no longer matches
    pub drift: Option<DriftHint>,
}

pub struct Materializer<C = GitCli> {
    options: MaterializeOptions,
    cloner: C,
}

impl Materializer<GitCli> {
    pub fn new(options: MaterializeOptions) -> Self {
        Self::with_cloner(options, GitCli::new())
    }
}

impl<C: Cloner> Materializer<C> {
    pub fn with_cloner(options: MaterializeOptions, cloner: C) -> Self {
        Self { options, cloner }
    }

    pub fn options(&self) -> &MaterializeOptions {
        &self.options
    }

    pub fn cloner(&self) -> &C {
        &self.cloner
    }

    /// Ensure the clone exists, then patch the motion encoder if present.
    pub fn run(&self, mode: ApplyMode) -> Result<MaterializeReport, MaterializeError> {
        let target_dir = &self.options.target_dir;

        let clone = self.ensure_clone(mode)?;

        let encoder = target_dir.join(MOTION_ENCODER_PATH);
        if !encoder.exists() {
            debug!("{} not present, skipping patch", encoder.display());
            return Ok(MaterializeReport {
                target_dir: target_dir.clone(),
                clone,
                patch: None,
                diff: None,
                drift: None,
            });
        }

        let encoder = CloneGuard::new(target_dir)?.validate_path(&encoder)?;

        let plan = autocast_patch().plan(&encoder)?.enforce(self.options.strict)?;
        let report = match mode {
            ApplyMode::Write => plan.commit()?,
            ApplyMode::DryRun => plan.report(),
        };
        if let PatchReport::Applied { .. } = &report {
            info!("{report}");
        }

        let diff = plan
            .changes_content()
            .then(|| (plan.original.clone(), plan.patched.clone()));

        Ok(MaterializeReport {
            target_dir: target_dir.clone(),
            clone,
            patch: Some(report),
            diff,
            drift: plan.hint.clone(),
        })
    }

    fn ensure_clone(&self, mode: ApplyMode) -> Result<CloneOutcome, MaterializeError> {
        let target_dir = &self.options.target_dir;

        if mode == ApplyMode::DryRun {
            return if target_dir.is_dir() && !is_empty_dir(target_dir)? {
                Ok(CloneOutcome::AlreadyPresent)
            } else {
                Ok(CloneOutcome::WouldClone)
            };
        }

        fs::create_dir_all(target_dir).map_err(|source| MaterializeError::CreateDir {
            path: target_dir.clone(),
            source,
        })?;

        if !is_empty_dir(target_dir)? {
            debug!("{} is not empty, skipping clone", target_dir.display());
            return Ok(CloneOutcome::AlreadyPresent);
        }

        self.cloner.clone_repo(&self.options.repo_url, target_dir)?;
        Ok(CloneOutcome::Cloned)
    }
}

/// Whether `dir` has no entries at all, hidden ones included.
pub fn is_empty_dir(dir: &Path) -> Result<bool, MaterializeError> {
    let mut entries = fs::read_dir(dir).map_err(|source| MaterializeError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries.next().is_none())
}
