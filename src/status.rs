//! Read-only status of both provisioning targets.

use crate::build_script::{build_script_status, BuildScriptStatus};
use crate::edit::{PatchError, PatchState};
use crate::materialize::{autocast_patch, is_empty_dir, MaterializeError, MOTION_ENCODER_PATH};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneDirStatus {
    Missing,
    Empty,
    Populated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderStatus {
    Missing,
    Pending,
    Patched,
    Unrecognized,
}

impl From<PatchState> for EncoderStatus {
    fn from(state: PatchState) -> Self {
        match state {
            PatchState::Pending { .. } => EncoderStatus::Pending,
            PatchState::Applied => EncoderStatus::Patched,
            PatchState::NoMatch => EncoderStatus::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub target_dir: PathBuf,
    pub clone_dir: CloneDirStatus,
    pub motion_encoder: EncoderStatus,
    pub build_script_path: PathBuf,
    pub build_script: BuildScriptStatus,
}

impl StatusReport {
    /// True when nothing is left to do on either target.
    pub fn is_provisioned(&self) -> bool {
        self.clone_dir == CloneDirStatus::Populated
            && matches!(
                self.motion_encoder,
                EncoderStatus::Patched | EncoderStatus::Missing
            )
            && self.build_script == BuildScriptStatus::Patched
    }
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    Patch(#[from] PatchError),
}

pub fn clone_dir_status(target_dir: &Path) -> Result<CloneDirStatus, MaterializeError> {
    if !target_dir.is_dir() {
        return Ok(CloneDirStatus::Missing);
    }
    Ok(if is_empty_dir(target_dir)? {
        CloneDirStatus::Empty
    } else {
        CloneDirStatus::Populated
    })
}

pub fn encoder_status(target_dir: &Path) -> Result<EncoderStatus, PatchError> {
    let encoder = target_dir.join(MOTION_ENCODER_PATH);
    if !encoder.exists() {
        return Ok(EncoderStatus::Missing);
    }
    let content = fs::read_to_string(&encoder).map_err(|source| PatchError::Io {
        path: encoder,
        source,
    })?;
    Ok(autocast_patch().state(&content).into())
}

/// Inspect both targets without writing anything.
pub fn collect_status(target_dir: &Path, build_script: &Path) -> Result<StatusReport, StatusError> {
    Ok(StatusReport {
        target_dir: target_dir.to_path_buf(),
        clone_dir: clone_dir_status(target_dir)?,
        motion_encoder: encoder_status(target_dir)?,
        build_script_path: build_script.to_path_buf(),
        build_script: build_script_status(build_script)?,
    })
}
