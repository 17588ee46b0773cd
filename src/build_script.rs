//! Build-script patcher: pin CUDA compute capabilities in `setup.py`.
//!
//! `setup.py` probes the visible GPUs to decide which architectures to
//! compile for. Image builds have no GPU attached, so the probe is replaced
//! by a literal set taken from `TORCH_CUDA_ARCH_LIST`.

use crate::arch::ArchList;
use crate::edit::{ApplyMode, PatchError, PatchPlan, PatchReport, PatchState, TextPatch};
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// GPU auto-detection loop replaced by the patch.
pub const DETECTION_BLOCK: &str = r#"compute_capabilities = set()
device_count = torch.cuda.device_count()
for i in range(device_count):
    major, minor = torch.cuda.get_device_capability(i)
    if major < 8:
        warnings.warn(f"skipping GPU {i} with compute capability {major}.{minor}")
        continue
    compute_capabilities.add(f"{major}.{minor}")"#;

/// Diagnostic line emitted after the pinned assignment.
pub const MANUAL_MARKER: &str =
    r#"print(f"Manually set compute capabilities: {compute_capabilities}")"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildScriptOptions {
    /// Build script to rewrite in place
    pub path: PathBuf,
    pub arch_list: ArchList,
    /// Fail instead of warning when the detection block is missing
    pub strict: bool,
}

/// Replacement text for [`DETECTION_BLOCK`].
pub fn pinned_block(arch_list: &ArchList) -> String {
    format!(
        "compute_capabilities = {}\n{}",
        arch_list.to_set_literal(),
        MANUAL_MARKER
    )
}

pub fn compute_capabilities_patch(arch_list: &ArchList) -> TextPatch {
    TextPatch::new(DETECTION_BLOCK, pinned_block(arch_list))
}

/// Plan the rewrite of the build script without touching it.
///
/// A script pinned earlier, with any arch list, counts as already applied.
pub fn plan_build_script(options: &BuildScriptOptions) -> Result<PatchPlan, PatchError> {
    let mut plan = compute_capabilities_patch(&options.arch_list).plan(&options.path)?;

    if plan.state == PatchState::NoMatch && plan.original.contains(MANUAL_MARKER) {
        debug!(
            "{} already pins compute capabilities",
            options.path.display()
        );
        plan.state = PatchState::Applied;
        plan.hint = None;
    }

    plan.enforce(options.strict)
}

/// Replace the detection block in the build script and write it back.
///
/// A missing block leaves the file untouched unless `strict` is set.
pub fn patch_build_script(
    options: &BuildScriptOptions,
    mode: ApplyMode,
) -> Result<(PatchReport, PatchPlan), PatchError> {
    let plan = plan_build_script(options)?;

    let report = match mode {
        ApplyMode::Write => plan.commit()?,
        ApplyMode::DryRun => plan.report(),
    };

    if let PatchReport::Applied { .. } = &report {
        info!(
            "pinned compute capabilities {} in {}",
            options.arch_list.to_set_literal(),
            options.path.display()
        );
    }

    Ok((report, plan))
}

/// Patch state of a build script, independent of any arch list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildScriptStatus {
    /// GPU auto-detection loop is still present
    DetectionPresent,
    /// Capabilities are pinned
    Patched,
    /// Neither form was found
    Unrecognized,
    /// File does not exist
    Missing,
}

pub fn build_script_status(path: &Path) -> Result<BuildScriptStatus, PatchError> {
    if !path.exists() {
        return Ok(BuildScriptStatus::Missing);
    }

    let content = fs::read_to_string(path).map_err(|source| PatchError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(if content.contains(DETECTION_BLOCK) {
        BuildScriptStatus::DetectionPresent
    } else if content.contains(MANUAL_MARKER) {
        BuildScriptStatus::Patched
    } else {
        BuildScriptStatus::Unrecognized
    })
}
