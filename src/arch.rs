//! CUDA architecture lists as read from `TORCH_CUDA_ARCH_LIST`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between entries of `TORCH_CUDA_ARCH_LIST`.
pub const ARCH_SEPARATOR: char = ';';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchListError {
    #[error("architecture list is empty")]
    Empty,
}

/// Ordered GPU architecture identifiers, e.g. `8.0;8.6;9.0`.
///
/// Entries are kept verbatim and in input order; duplicates are preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchList {
    entries: Vec<String>,
}

impl ArchList {
    pub fn parse(value: &str) -> Result<Self, ArchListError> {
        if value.trim().is_empty() {
            return Err(ArchListError::Empty);
        }

        Ok(Self {
            entries: value.split(ARCH_SEPARATOR).map(str::to_string).collect(),
        })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Render as a Python set literal: `{"8.0", "9.0"}`.
    pub fn to_set_literal(&self) -> String {
        let quoted: Vec<String> = self.entries.iter().map(|a| format!("\"{a}\"")).collect();
        format!("{{{}}}", quoted.join(", "))
    }
}

impl FromStr for ArchList {
    type Err = ArchListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ArchList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entries.join(";"))
    }
}
