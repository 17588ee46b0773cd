use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use wan2gp_provision::config::{
    load_from_path, resolve_build_script, resolve_build_script_path, resolve_materialize,
    resolve_target_dir, BuildScriptOverrides, CloneOverrides, Environment, ProvisionConfig,
};
use wan2gp_provision::materialize::MOTION_ENCODER_PATH;
use wan2gp_provision::status::{CloneDirStatus, EncoderStatus};
use wan2gp_provision::{
    collect_status, patch_build_script, ApplyMode, BuildScriptStatus, CloneError, CloneOutcome,
    MaterializeError, Materializer, PatchReport,
};

#[derive(Parser)]
#[command(name = "wan2gp-provision")]
#[command(about = "Provisioning steps for Wan2GP images", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file with defaults for both commands
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone Wan2GP if needed and patch its motion encoder
    Clone {
        /// Repository URL (default: $WAN2GP_REPO, then the upstream repository)
        #[arg(short, long)]
        repo: Option<String>,

        /// Clone directory (default: /opt/Wan2GP)
        #[arg(short, long)]
        target_dir: Option<PathBuf>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Fail when the patch target no longer matches
        #[arg(long)]
        strict: bool,
    },

    /// Pin CUDA compute capabilities in setup.py from TORCH_CUDA_ARCH_LIST
    PatchSetup {
        /// Build script to rewrite (default: ./setup.py)
        #[arg(short, long)]
        setup_py: Option<PathBuf>,

        /// Architecture list, overriding $TORCH_CUDA_ARCH_LIST
        #[arg(short, long)]
        arch_list: Option<String>,

        /// Dry run - show what would be changed without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Fail when the detection block is not found
        #[arg(long)]
        strict: bool,
    },

    /// Report provisioning state without modifying anything
    Status {
        /// Clone directory (default: /opt/Wan2GP)
        #[arg(short, long)]
        target_dir: Option<PathBuf>,

        /// Build script to inspect (default: ./setup.py)
        #[arg(short, long)]
        setup_py: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_from_path(path)?,
        None => ProvisionConfig::default(),
    };
    let env = Environment::capture();

    let result = match cli.command {
        Commands::Clone {
            repo,
            target_dir,
            dry_run,
            diff,
            strict,
        } => {
            let overrides = CloneOverrides {
                repo,
                target_dir,
                strict,
            };
            cmd_clone(&config, &env, overrides, dry_run, diff)
        }

        Commands::PatchSetup {
            setup_py,
            arch_list,
            dry_run,
            diff,
            strict,
        } => {
            let overrides = BuildScriptOverrides {
                path: setup_py,
                arch_list,
                strict,
            };
            cmd_patch_setup(&config, &env, overrides, dry_run, diff)
        }

        Commands::Status {
            target_dir,
            setup_py,
            json,
        } => cmd_status(&config, target_dir, setup_py, json),
    };

    // A failed clone exits with git's own status
    if let Err(err) = &result {
        if let Some(code) = clone_exit_code(err) {
            eprintln!("{} {}", "✗".red(), err);
            std::process::exit(code);
        }
    }

    result
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn clone_exit_code(err: &anyhow::Error) -> Option<i32> {
    match err.downcast_ref::<MaterializeError>()? {
        MaterializeError::Clone(clone_err @ CloneError::Failed { .. }) => clone_err.exit_code(),
        _ => None,
    }
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Helper: Print one patch report line
fn print_patch_report(report: &PatchReport, dry_run: bool, hint: Option<String>) {
    match report {
        PatchReport::Applied { file, occurrences } => {
            let verb = if dry_run { "Would patch" } else { "Patched" };
            println!(
                "{} {} {} ({} occurrence{})",
                "✓".green(),
                verb,
                file.display(),
                occurrences,
                if *occurrences == 1 { "" } else { "s" }
            );
        }
        PatchReport::AlreadyApplied { file } => {
            println!("{} Already applied to {}", "⊙".yellow(), file.display());
        }
        PatchReport::NoMatch { file } => {
            println!(
                "{} Patch target not found in {}, left unchanged",
                "⊘".cyan(),
                file.display()
            );
            if let Some(hint) = hint {
                println!("  {}", hint.dimmed());
            }
        }
    }
}

fn cmd_clone(
    config: &ProvisionConfig,
    env: &Environment,
    overrides: CloneOverrides,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let options = resolve_materialize(config, env, overrides)?;
    let mode = if dry_run {
        ApplyMode::DryRun
    } else {
        ApplyMode::Write
    };

    println!("Repository: {}", options.repo_url);
    println!("Target: {}", options.target_dir.display());
    if dry_run {
        println!("{}", "[DRY RUN - showing what would be applied]".cyan());
    }
    println!();

    let materializer = Materializer::new(options);
    let report = materializer.run(mode)?;

    match report.clone {
        CloneOutcome::Cloned => {
            println!("{} Cloned into {}", "✓".green(), report.target_dir.display())
        }
        CloneOutcome::WouldClone => {
            println!("{} Would clone into {}", "✓".green(), report.target_dir.display())
        }
        CloneOutcome::AlreadyPresent => println!(
            "{} {} is not empty, skipping clone",
            "⊙".yellow(),
            report.target_dir.display()
        ),
    }

    match &report.patch {
        Some(patch) => {
            let hint = report.drift.as_ref().map(|h| h.to_string());
            print_patch_report(patch, dry_run, hint);
            if show_diff {
                if let (PatchReport::Applied { file, .. }, Some((before, after))) =
                    (patch, &report.diff)
                {
                    display_diff(file, before, after);
                }
            }
        }
        None => println!(
            "{} {} not present, nothing to patch",
            "⊘".cyan(),
            MOTION_ENCODER_PATH
        ),
    }

    Ok(())
}

fn cmd_patch_setup(
    config: &ProvisionConfig,
    env: &Environment,
    overrides: BuildScriptOverrides,
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    // Resolving first means a missing TORCH_CUDA_ARCH_LIST fails before any file I/O
    let options = resolve_build_script(config, env, overrides)?;
    let mode = if dry_run {
        ApplyMode::DryRun
    } else {
        ApplyMode::Write
    };

    println!("Build script: {}", options.path.display());
    println!("Architectures: {}", options.arch_list.to_set_literal());
    if dry_run {
        println!("{}", "[DRY RUN - showing what would be applied]".cyan());
    }
    println!();

    let (report, plan) = patch_build_script(&options, mode)
        .with_context(|| format!("failed to patch {}", options.path.display()))?;

    print_patch_report(&report, dry_run, plan.hint.as_ref().map(|h| h.to_string()));

    if show_diff && plan.changes_content() {
        display_diff(&plan.file, &plan.original, &plan.patched);
    }

    Ok(())
}

fn cmd_status(
    config: &ProvisionConfig,
    target_dir: Option<PathBuf>,
    setup_py: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let target_dir = resolve_target_dir(config, target_dir);
    let setup_py = resolve_build_script_path(config, setup_py);

    let report = collect_status(&target_dir, &setup_py)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Provisioning Status Report".bold());
    println!();

    let clone_line = match report.clone_dir {
        CloneDirStatus::Populated => format!("{} cloned", "✓".green()),
        CloneDirStatus::Empty => format!("{} empty", "⊙".yellow()),
        CloneDirStatus::Missing => format!("{} missing", "✗".red()),
    };
    println!("Clone {}: {}", report.target_dir.display(), clone_line);

    let encoder_line = match report.motion_encoder {
        EncoderStatus::Patched => format!("{} patched", "✓".green()),
        EncoderStatus::Pending => format!("{} not patched", "⊙".yellow()),
        EncoderStatus::Unrecognized => format!("{} unrecognized", "✗".red()),
        EncoderStatus::Missing => format!("{} not present", "⊘".cyan()),
    };
    println!("Motion encoder: {}", encoder_line);

    let setup_line = match report.build_script {
        BuildScriptStatus::Patched => format!("{} capabilities pinned", "✓".green()),
        BuildScriptStatus::DetectionPresent => {
            format!("{} GPU auto-detection still present", "⊙".yellow())
        }
        BuildScriptStatus::Unrecognized => format!("{} unrecognized", "✗".red()),
        BuildScriptStatus::Missing => format!("{} not present", "⊘".cyan()),
    };
    println!(
        "Build script {}: {}",
        report.build_script_path.display(),
        setup_line
    );

    println!();
    if report.is_provisioned() {
        println!("{}", "Fully provisioned".green().bold());
    } else {
        println!("{}", "Provisioning incomplete".yellow().bold());
    }

    Ok(())
}
