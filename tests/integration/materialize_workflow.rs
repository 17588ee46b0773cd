//! Materializer workflow: option resolution, clone, patch, re-run.

use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use wan2gp_provision::config::{resolve_materialize, CloneOverrides, DEFAULT_REPO};
use wan2gp_provision::materialize::MOTION_ENCODER_PATH;
use wan2gp_provision::{
    ApplyMode, CloneError, CloneOutcome, Cloner, Environment, GitCli, MaterializeError,
    Materializer, PatchReport, ProvisionConfig,
};

const MOTION_ENCODER: &str = r#"import torch

def encode(x):
    with torch.cuda.amp.autocast(enabled=False):
        y = x.float()
    with torch.cuda.amp.autocast(dtype=torch.bfloat16):
        return y * 2
"#;

/// Writes a fake Wan2GP checkout and counts how often it was asked to.
struct FakeWan2gp {
    with_encoder: bool,
    expected_url: &'static str,
    calls: Cell<usize>,
}

impl FakeWan2gp {
    fn new(with_encoder: bool) -> Self {
        Self {
            with_encoder,
            expected_url: DEFAULT_REPO,
            calls: Cell::new(0),
        }
    }
}

impl Cloner for FakeWan2gp {
    fn clone_repo(&self, repo_url: &str, target: &Path) -> Result<(), CloneError> {
        assert_eq!(repo_url, self.expected_url);
        self.calls.set(self.calls.get() + 1);

        fs::write(target.join("wgp.py"), "print('wan2gp')\n").unwrap();
        if self.with_encoder {
            let encoder = target.join(MOTION_ENCODER_PATH);
            fs::create_dir_all(encoder.parent().unwrap()).unwrap();
            fs::write(encoder, MOTION_ENCODER).unwrap();
        }
        Ok(())
    }
}

fn default_options(target: &Path) -> wan2gp_provision::MaterializeOptions {
    resolve_materialize(
        &ProvisionConfig::default(),
        &Environment::default(),
        CloneOverrides {
            target_dir: Some(target.to_path_buf()),
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn test_default_url_clone_then_patch() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("opt/Wan2GP");

    let options = default_options(&target);
    assert_eq!(options.repo_url, DEFAULT_REPO);

    let materializer = Materializer::with_cloner(options, FakeWan2gp::new(true));
    let report = materializer.run(ApplyMode::Write).unwrap();

    assert!(target.is_dir());
    assert_eq!(report.clone, CloneOutcome::Cloned);
    assert_eq!(materializer.cloner().calls.get(), 1);
    assert!(matches!(
        report.patch,
        Some(PatchReport::Applied { occurrences: 2, .. })
    ));

    let patched = fs::read_to_string(target.join(MOTION_ENCODER_PATH)).unwrap();
    assert_eq!(
        patched,
        MOTION_ENCODER.replace("torch.cuda.amp.autocast(", "torch.amp.autocast('cuda', ")
    );
    assert!(!patched.contains("torch.cuda.amp.autocast("));
}

#[test]
fn test_second_run_neither_clones_nor_changes() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("Wan2GP");
    let materializer = Materializer::with_cloner(default_options(&target), FakeWan2gp::new(true));

    let _ = materializer.run(ApplyMode::Write).unwrap();
    let after_first = fs::read_to_string(target.join(MOTION_ENCODER_PATH)).unwrap();

    let report = materializer.run(ApplyMode::Write).unwrap();

    assert_eq!(report.clone, CloneOutcome::AlreadyPresent);
    assert!(matches!(
        report.patch,
        Some(PatchReport::AlreadyApplied { .. })
    ));
    assert_eq!(materializer.cloner().calls.get(), 1);
    assert_eq!(
        fs::read_to_string(target.join(MOTION_ENCODER_PATH)).unwrap(),
        after_first
    );
}

#[test]
fn test_missing_encoder_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("Wan2GP");
    let materializer = Materializer::with_cloner(default_options(&target), FakeWan2gp::new(false));

    let report = materializer.run(ApplyMode::Write).unwrap();

    assert_eq!(report.clone, CloneOutcome::Cloned);
    assert_eq!(report.patch, None);
    assert!(!target.join(MOTION_ENCODER_PATH).exists());
}

#[test]
fn test_drifted_encoder_is_rewritten_identically() {
    let dir = TempDir::new().unwrap();
    let encoder = dir.path().join(MOTION_ENCODER_PATH);
    fs::create_dir_all(encoder.parent().unwrap()).unwrap();
    let drifted = "with torch.cuda.amp.autocast (enabled=False):\n    pass\n";
    fs::write(&encoder, drifted).unwrap();

    let materializer =
        Materializer::with_cloner(default_options(dir.path()), FakeWan2gp::new(true));
    let report = materializer.run(ApplyMode::Write).unwrap();

    assert!(matches!(report.patch, Some(PatchReport::NoMatch { .. })));
    assert!(report.drift.is_some());
    assert_eq!(fs::read_to_string(&encoder).unwrap(), drifted);
}

#[test]
#[cfg(unix)]
fn test_symlinked_encoder_outside_clone_is_refused() {
    use std::os::unix::fs::symlink;

    let dir = TempDir::new().unwrap();
    let clone = dir.path().join("Wan2GP");
    let encoder = clone.join(MOTION_ENCODER_PATH);
    fs::create_dir_all(encoder.parent().unwrap()).unwrap();

    let outside = dir.path().join("host_file.py");
    fs::write(&outside, "torch.cuda.amp.autocast(\n").unwrap();
    symlink(&outside, &encoder).unwrap();

    let materializer = Materializer::with_cloner(default_options(&clone), FakeWan2gp::new(true));
    let err = materializer.run(ApplyMode::Write).unwrap_err();

    assert!(matches!(err, MaterializeError::Safety(_)));
    assert_eq!(
        fs::read_to_string(&outside).unwrap(),
        "torch.cuda.amp.autocast(\n"
    );
}

#[test]
#[cfg(unix)]
fn test_symlinked_encoder_inside_clone_is_patched_through_link() {
    use std::os::unix::fs::symlink;

    let dir = TempDir::new().unwrap();
    let clone = dir.path().join("Wan2GP");
    let encoder = clone.join(MOTION_ENCODER_PATH);
    fs::create_dir_all(encoder.parent().unwrap()).unwrap();

    let shared = clone.join("shared/encoder.py");
    fs::create_dir_all(shared.parent().unwrap()).unwrap();
    fs::write(&shared, "torch.cuda.amp.autocast(x)\n").unwrap();
    symlink(&shared, &encoder).unwrap();

    let materializer = Materializer::with_cloner(default_options(&clone), FakeWan2gp::new(true));
    let report = materializer.run(ApplyMode::Write).unwrap();

    assert_eq!(report.clone, CloneOutcome::AlreadyPresent);
    assert!(matches!(report.patch, Some(PatchReport::Applied { .. })));
    assert!(fs::symlink_metadata(&encoder)
        .unwrap()
        .file_type()
        .is_symlink());
    assert_eq!(
        fs::read_to_string(&shared).unwrap(),
        "torch.amp.autocast('cuda', x)\n"
    );
}

fn git(args: &[&str], cwd: &Path) -> bool {
    Command::new("git")
        .args(["-c", "user.name=provision", "-c", "user.email=provision@localhost"])
        .args(args)
        .current_dir(cwd)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn test_git_cli_clones_local_repository() {
    let dir = TempDir::new().unwrap();
    let upstream = dir.path().join("upstream");
    fs::create_dir_all(upstream.join("models/wan/animate")).unwrap();
    fs::write(upstream.join(MOTION_ENCODER_PATH), MOTION_ENCODER).unwrap();

    if !git(&["init", "-q"], &upstream) {
        eprintln!("git not available, skipping");
        return;
    }
    assert!(git(&["add", "."], &upstream));
    assert!(git(&["commit", "-q", "-m", "initial"], &upstream));

    let target = dir.path().join("Wan2GP");
    let mut options = default_options(&target);
    options.repo_url = upstream.to_string_lossy().into_owned();

    let materializer = Materializer::with_cloner(options, GitCli::new());
    let report = materializer.run(ApplyMode::Write).unwrap();

    assert_eq!(report.clone, CloneOutcome::Cloned);
    assert!(target.join(".git").is_dir());
    assert!(matches!(report.patch, Some(PatchReport::Applied { .. })));
    assert!(fs::read_to_string(target.join(MOTION_ENCODER_PATH))
        .unwrap()
        .contains("torch.amp.autocast('cuda', enabled=False)"));
}

#[test]
fn test_git_cli_failure_reports_exit_status() {
    let dir = TempDir::new().unwrap();
    if !git(&["--version"], dir.path()) {
        eprintln!("git not available, skipping");
        return;
    }

    let target = dir.path().join("Wan2GP");
    let mut options = default_options(&target);
    options.repo_url = dir.path().join("missing").to_string_lossy().into_owned();

    let materializer = Materializer::with_cloner(options, GitCli::new());
    let err = materializer.run(ApplyMode::Write).unwrap_err();

    match err {
        MaterializeError::Clone(clone_err) => {
            assert!(matches!(clone_err, CloneError::Failed { .. }));
            assert!(clone_err.exit_code().is_some_and(|c| c != 0));
        }
        other => panic!("unexpected error: {other}"),
    }
}
