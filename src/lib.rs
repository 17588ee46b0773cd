//! Wan2GP Provision: image-build steps for Wan2GP
//!
//! Two independent, single-shot procedures:
//!
//! - [`Materializer`] clones the Wan2GP repository into an empty target
//!   directory and rewrites the deprecated `torch.cuda.amp.autocast(` call
//!   in its motion encoder.
//! - [`patch_build_script`] replaces the GPU auto-detection loop in
//!   `setup.py` with a literal set of compute capabilities taken from
//!   `TORCH_CUDA_ARCH_LIST`.
//!
//! # Architecture
//!
//! Both procedures compile down to one primitive, [`TextPatch`]: exact-match
//! find-and-replace over a whole file. A patch is planned first
//! ([`PatchPlan`]) and committed with a single atomic write.
//!
//! Options are resolved once at the process boundary
//! ([`config::resolve_materialize`], [`config::resolve_build_script`]) and
//! passed down explicitly.
//!
//! # Safety
//!
//! - Patches are idempotent: already-patched text is left alone
//! - Atomic file writes (tempfile + fsync + rename), permissions preserved
//! - Patch targets inside a clone must not escape it through symlinks
//! - `git` is invoked with an argument list, never through a shell
//!
//! # Example
//!
//! ```no_run
//! use wan2gp_provision::{ApplyMode, MaterializeOptions, Materializer};
//!
//! let materializer = Materializer::new(MaterializeOptions {
//!     repo_url: "https://github.com/deepbeepmeep/Wan2GP.git".to_string(),
//!     target_dir: "/opt/Wan2GP".into(),
//!     strict: false,
//! });
//!
//! match materializer.run(ApplyMode::Write) {
//!     Ok(report) => println!("{:?}", report.patch),
//!     Err(e) => eprintln!("provisioning failed: {}", e),
//! }
//! ```

pub mod arch;
pub mod build_script;
pub mod config;
pub mod edit;
pub mod materialize;
pub mod safety;
pub mod status;

// Re-exports
pub use arch::{ArchList, ArchListError};
pub use build_script::{
    build_script_status, patch_build_script, plan_build_script, BuildScriptOptions,
    BuildScriptStatus,
};
pub use config::{
    load_from_path, load_from_str, resolve_build_script, resolve_materialize, ConfigError,
    Environment, ProvisionConfig,
};
pub use edit::{ApplyMode, DriftHint, PatchError, PatchPlan, PatchReport, PatchState, TextPatch};
pub use materialize::{
    CloneError, CloneOutcome, Cloner, GitCli, MaterializeError, MaterializeOptions,
    MaterializeReport, Materializer,
};
pub use safety::{CloneGuard, SafetyError};
pub use status::{collect_status, StatusError, StatusReport};
