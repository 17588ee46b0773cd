//! Build-script patcher against a realistic setup.py.

use std::fs;
use tempfile::TempDir;
use wan2gp_provision::build_script::{DETECTION_BLOCK, MANUAL_MARKER};
use wan2gp_provision::config::{
    resolve_build_script, BuildScriptOverrides, ARCH_LIST_ENV,
};
use wan2gp_provision::{
    build_script_status, patch_build_script, ApplyMode, BuildScriptStatus, ConfigError,
    Environment, PatchReport, ProvisionConfig,
};

const SETUP_PY: &str = r#"import os
import warnings

import torch
from setuptools import setup
from torch.utils.cpp_extension import BuildExtension, CUDAExtension

compute_capabilities = set()
device_count = torch.cuda.device_count()
for i in range(device_count):
    major, minor = torch.cuda.get_device_capability(i)
    if major < 8:
        warnings.warn(f"skipping GPU {i} with compute capability {major}.{minor}")
        continue
    compute_capabilities.add(f"{major}.{minor}")

nvcc_flags = []
for capability in compute_capabilities:
    num = capability.replace(".", "")
    nvcc_flags += ["-gencode", f"arch=compute_{num},code=sm_{num}"]

setup(
    name="sageattention",
    ext_modules=[CUDAExtension("sageattention._qattn", ["csrc/qattn.cu"])],
    cmdclass={"build_ext": BuildExtension},
)
"#;

fn write_setup(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("setup.py");
    fs::write(&path, SETUP_PY).unwrap();
    path
}

#[test]
fn test_env_arch_list_pins_capabilities() {
    let dir = TempDir::new().unwrap();
    let path = write_setup(&dir);

    let env = Environment::from_pairs([(ARCH_LIST_ENV, "8.0;8.6;9.0")]);
    let options = resolve_build_script(
        &ProvisionConfig::default(),
        &env,
        BuildScriptOverrides {
            path: Some(path.clone()),
            ..Default::default()
        },
    )
    .unwrap();

    let (report, _) = patch_build_script(&options, ApplyMode::Write).unwrap();
    assert!(matches!(report, PatchReport::Applied { .. }));

    let patched = fs::read_to_string(&path).unwrap();
    let expected = SETUP_PY.replace(
        DETECTION_BLOCK,
        &format!("compute_capabilities = {{\"8.0\", \"8.6\", \"9.0\"}}\n{MANUAL_MARKER}"),
    );
    assert_eq!(patched, expected);
    assert!(patched.contains("for capability in compute_capabilities:"));
    assert_eq!(build_script_status(&path).unwrap(), BuildScriptStatus::Patched);
}

#[test]
fn test_missing_arch_list_fails_before_write() {
    let dir = TempDir::new().unwrap();
    let path = write_setup(&dir);

    let result = resolve_build_script(
        &ProvisionConfig::default(),
        &Environment::default(),
        BuildScriptOverrides {
            path: Some(path.clone()),
            ..Default::default()
        },
    );

    assert!(matches!(result, Err(ConfigError::MissingEnv { .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), SETUP_PY);
    assert_eq!(
        build_script_status(&path).unwrap(),
        BuildScriptStatus::DetectionPresent
    );
}

#[test]
#[cfg(unix)]
fn test_symlinked_setup_py_is_patched_through_link() {
    use std::os::unix::fs::symlink;

    let dir = TempDir::new().unwrap();
    let real = dir.path().join("real_setup.py");
    fs::write(&real, SETUP_PY).unwrap();
    let link = dir.path().join("setup.py");
    symlink(&real, &link).unwrap();

    let options = resolve_build_script(
        &ProvisionConfig::default(),
        &Environment::from_pairs([(ARCH_LIST_ENV, "9.0")]),
        BuildScriptOverrides {
            path: Some(link.clone()),
            ..Default::default()
        },
    )
    .unwrap();

    let (report, _) = patch_build_script(&options, ApplyMode::Write).unwrap();

    assert!(matches!(report, PatchReport::Applied { .. }));
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    let patched = fs::read_to_string(&real).unwrap();
    assert!(!patched.contains(DETECTION_BLOCK));
    assert!(patched.contains(r#"compute_capabilities = {"9.0"}"#));
}

#[test]
fn test_pinned_script_rerun_with_new_arch_list_is_already_applied() {
    let dir = TempDir::new().unwrap();
    let path = write_setup(&dir);

    let pin = |arch: &str, strict: bool| {
        let options = resolve_build_script(
            &ProvisionConfig::default(),
            &Environment::from_pairs([(ARCH_LIST_ENV, arch)]),
            BuildScriptOverrides {
                path: Some(path.clone()),
                strict,
                ..Default::default()
            },
        )
        .unwrap();
        patch_build_script(&options, ApplyMode::Write)
    };

    let (first, _) = pin("8.0", false).unwrap();
    assert!(matches!(first, PatchReport::Applied { .. }));
    let pinned = fs::read_to_string(&path).unwrap();

    let (second, plan) = pin("9.0", true).unwrap();
    assert!(matches!(second, PatchReport::AlreadyApplied { .. }));
    assert!(plan.hint.is_none());
    assert_eq!(fs::read_to_string(&path).unwrap(), pinned);
}

#[test]
fn test_reformatted_block_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("setup.py");
    let reformatted = SETUP_PY.replace("device_count = torch", "device_count  = torch");
    fs::write(&path, &reformatted).unwrap();

    let env = Environment::from_pairs([(ARCH_LIST_ENV, "9.0")]);
    let options = resolve_build_script(
        &ProvisionConfig::default(),
        &env,
        BuildScriptOverrides {
            path: Some(path.clone()),
            ..Default::default()
        },
    )
    .unwrap();

    let (report, plan) = patch_build_script(&options, ApplyMode::Write).unwrap();

    assert!(matches!(report, PatchReport::NoMatch { .. }));
    assert_eq!(plan.hint.map(|h| h.line), Some(8));
    assert_eq!(fs::read_to_string(&path).unwrap(), reformatted);
}
