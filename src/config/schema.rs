use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// On-disk provisioning config. Every field is optional; unset fields fall
/// through to environment variables and then to built-in defaults.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub clone: CloneSection,
    #[serde(default)]
    pub build_script: BuildScriptSection,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CloneSection {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    #[serde(default)]
    pub strict: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildScriptSection {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub strict: Option<bool>,
}

impl ProvisionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if let Some(repo) = &self.clone.repo {
            if repo.trim().is_empty() {
                issues.push(ValidationIssue::EmptyField {
                    field: "clone.repo",
                });
            }
        }
        if let Some(dir) = &self.clone.target_dir {
            if dir.as_os_str().is_empty() {
                issues.push(ValidationIssue::EmptyField {
                    field: "clone.target_dir",
                });
            }
        }
        if let Some(path) = &self.build_script.path {
            if path.as_os_str().is_empty() {
                issues.push(ValidationIssue::EmptyField {
                    field: "build_script.path",
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyField { field: &'static str },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyField { field } => {
                write!(f, "field '{field}' must not be empty")
            }
        }
    }
}
