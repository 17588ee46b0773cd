use log::{debug, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Minimum similarity for a line to be reported as a drift candidate.
const DRIFT_HINT_THRESHOLD: f64 = 0.6;

/// The patching primitive: exact-match find-and-replace over raw text.
///
/// Every occurrence of `search` is replaced. There is no regex or syntax
/// awareness; a rule either matches byte-for-byte or leaves the text alone.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "TextPatch does nothing until planned and committed"]
pub struct TextPatch {
    /// Exact text to find
    pub search: String,
    /// Text substituted for each occurrence of `search`
    pub replace: String,
}

/// How a text relates to a [`TextPatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    /// Search text is present and would be replaced
    Pending { occurrences: usize },
    /// Search text is absent and the replacement is already there
    Applied,
    /// Neither the search text nor the replacement is present
    NoMatch,
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("patch target not found in {file}{}", hint_suffix(.hint))]
    NoMatch {
        file: PathBuf,
        hint: Option<DriftHint>,
    },
}

fn hint_suffix(hint: &Option<DriftHint>) -> String {
    match hint {
        Some(hint) => format!(" ({hint})"),
        None => String::new(),
    }
}

/// Closest line to the first line of a search text that no longer matches.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftHint {
    /// 1-based line number
    pub line: usize,
    pub text: String,
    pub similarity: f64,
}

impl std::fmt::Display for DriftHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "closest candidate at line {} ({:.0}% similar): {}",
            self.line,
            self.similarity * 100.0,
            self.text.trim()
        )
    }
}

/// Whether a run writes to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    #[default]
    Write,
    DryRun,
}

/// A patch computed against a file's current content, not yet written.
#[derive(Debug, Clone)]
#[must_use = "PatchPlan does nothing until commit() is called"]
pub struct PatchPlan {
    pub file: PathBuf,
    pub original: String,
    pub patched: String,
    pub state: PatchState,
    pub hint: Option<DriftHint>,
}

/// Outcome of planning or committing a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchReport should be checked for applied/no-match"]
pub enum PatchReport {
    /// Content changed (or would change, for a dry run)
    Applied { file: PathBuf, occurrences: usize },
    /// Replacement already present, nothing to do
    AlreadyApplied { file: PathBuf },
    /// Search text not found, content left unchanged
    NoMatch { file: PathBuf },
}

impl std::fmt::Display for PatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchReport::Applied { file, occurrences } => write!(
                f,
                "Patched {} ({} occurrence{})",
                file.display(),
                occurrences,
                if *occurrences == 1 { "" } else { "s" }
            ),
            PatchReport::AlreadyApplied { file } => {
                write!(f, "Already applied to {}", file.display())
            }
            PatchReport::NoMatch { file } => {
                write!(f, "Patch target not found in {}", file.display())
            }
        }
    }
}

impl TextPatch {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }

    /// Classify `content` against this rule.
    pub fn state(&self, content: &str) -> PatchState {
        if self.search.is_empty() {
            return PatchState::NoMatch;
        }

        let occurrences = content.matches(self.search.as_str()).count();
        if occurrences > 0 {
            PatchState::Pending { occurrences }
        } else if !self.replace.is_empty() && content.contains(self.replace.as_str()) {
            PatchState::Applied
        } else {
            PatchState::NoMatch
        }
    }

    /// Replace every occurrence of the search text.
    ///
    /// Returns `content` unchanged when the search text is absent.
    pub fn render(&self, content: &str) -> String {
        if self.search.is_empty() {
            return content.to_string();
        }
        content.replace(self.search.as_str(), &self.replace)
    }

    /// Read `file` and compute the patched content without writing.
    pub fn plan(&self, file: impl Into<PathBuf>) -> Result<PatchPlan, PatchError> {
        let file = file.into();
        let original = fs::read_to_string(&file).map_err(|source| PatchError::Io {
            path: file.clone(),
            source,
        })?;
        Ok(self.plan_content(file, original))
    }

    /// Compute a plan from content already in memory.
    pub fn plan_content(&self, file: impl Into<PathBuf>, original: String) -> PatchPlan {
        let file = file.into();
        let state = self.state(&original);
        let patched = match state {
            PatchState::Pending { .. } => self.render(&original),
            PatchState::Applied | PatchState::NoMatch => original.clone(),
        };
        let hint = match state {
            PatchState::NoMatch => self.drift_hint(&original),
            _ => None,
        };

        debug!("planned patch for {}: {:?}", file.display(), state);

        PatchPlan {
            file,
            original,
            patched,
            state,
            hint,
        }
    }

    /// Find the line most similar to the first non-blank line of the search text.
    pub fn drift_hint(&self, content: &str) -> Option<DriftHint> {
        let needle = self.search.lines().find(|l| !l.trim().is_empty())?.trim();

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| (idx, line, window_similarity(needle, line.trim())))
            .filter(|(_, _, similarity)| *similarity >= DRIFT_HINT_THRESHOLD)
            .max_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(idx, line, similarity)| DriftHint {
                line: idx + 1,
                text: line.to_string(),
                similarity,
            })
    }
}

/// Best similarity between `needle` and any same-length window of `line`.
fn window_similarity(needle: &str, line: &str) -> f64 {
    let width = needle.chars().count();
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= width {
        return strsim::normalized_levenshtein(needle, line);
    }

    chars
        .windows(width)
        .map(|window| {
            let window: String = window.iter().collect();
            strsim::normalized_levenshtein(needle, &window)
        })
        .fold(0.0, f64::max)
}

impl PatchPlan {
    /// Whether committing would change the file.
    pub fn changes_content(&self) -> bool {
        self.original != self.patched
    }

    /// Report for this plan without writing anything.
    pub fn report(&self) -> PatchReport {
        match self.state {
            PatchState::Pending { occurrences } => PatchReport::Applied {
                file: self.file.clone(),
                occurrences,
            },
            PatchState::Applied => PatchReport::AlreadyApplied {
                file: self.file.clone(),
            },
            PatchState::NoMatch => PatchReport::NoMatch {
                file: self.file.clone(),
            },
        }
    }

    /// Fail on `NoMatch` when `strict`; otherwise log the drift and continue.
    pub fn enforce(self, strict: bool) -> Result<Self, PatchError> {
        if self.state != PatchState::NoMatch {
            return Ok(self);
        }
        if strict {
            return Err(PatchError::NoMatch {
                file: self.file,
                hint: self.hint,
            });
        }

        match &self.hint {
            Some(hint) => warn!(
                "patch target not found in {}, leaving it unchanged; {}",
                self.file.display(),
                hint
            ),
            None => warn!(
                "patch target not found in {}, leaving it unchanged",
                self.file.display()
            ),
        }
        Ok(self)
    }

    /// Write the patched content if it differs from the original.
    pub fn commit(&self) -> Result<PatchReport, PatchError> {
        if self.changes_content() {
            atomic_write(&self.file, self.patched.as_bytes()).map_err(|source| {
                PatchError::Io {
                    path: self.file.clone(),
                    source,
                }
            })?;
        }
        Ok(self.report())
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// The original file's permissions carry over to the replacement. A
/// symlinked `path` is resolved first so the link target is rewritten and
/// the link itself survives.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let resolved = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => path.to_path_buf(),
        Err(e) => return Err(e),
    };
    let path = resolved.as_path();

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        }
    };

    let permissions = fs::metadata(path).ok().map(|m| m.permissions());

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    if let Some(permissions) = permissions {
        fs::set_permissions(temp.path(), permissions)?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
