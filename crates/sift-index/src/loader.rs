use std::path::{Path, PathBuf};

use crate::types::Document;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Reads every eligible text file under a corpus directory.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    pub extensions: Vec<String>,
    pub max_file_size: u64,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Per-run diagnostics for a corpus walk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub files_seen: usize,
    pub loaded: usize,
    pub skipped_empty: usize,
    pub skipped_undecodable: usize,
    pub skipped_too_large: usize,
    pub errors: Vec<String>,
}

impl DocumentLoader {
    #[must_use]
    pub fn new(extensions: Vec<String>, max_file_size: u64) -> Self {
        Self {
            extensions,
            max_file_size,
        }
    }

    fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }

    /// Walk `root` recursively and return documents sorted by relative path.
    ///
    /// A missing root yields an empty corpus. Files that are empty after
    /// trimming, not valid UTF-8, or over the size limit are skipped and
    /// counted in the report.
    #[must_use]
    pub fn load(&self, root: &Path) -> (Vec<Document>, LoadReport) {
        let mut report = LoadReport::default();

        if !root.is_dir() {
            tracing::warn!(path = %root.display(), "corpus directory not found, treating as empty");
            return (Vec::new(), report);
        }

        let mut paths: Vec<(String, PathBuf)> = ignore::WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(true)
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("corpus walk error: {e}");
                    None
                }
            })
            .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()) && self.is_eligible(e.path()))
            .map(|e| {
                let path = e.into_path();
                (relative_id(root, &path), path)
            })
            .collect();
        paths.sort_by(|a, b| a.0.cmp(&b.0));

        let mut documents = Vec::with_capacity(paths.len());
        for (id, path) in paths {
            report.files_seen += 1;
            match self.read_one(&path) {
                Ok(Some(raw_text)) => {
                    report.loaded += 1;
                    documents.push(Document {
                        id,
                        source_path: path.display().to_string(),
                        raw_text,
                    });
                }
                Ok(None) => {
                    tracing::debug!(path = %path.display(), "skipping empty file");
                    report.skipped_empty += 1;
                }
                Err(Skip::TooLarge(size)) => {
                    tracing::warn!(path = %path.display(), size, "skipping oversized file");
                    report.skipped_too_large += 1;
                }
                Err(Skip::Undecodable) => {
                    tracing::warn!(path = %path.display(), "skipping file that is not valid UTF-8");
                    report.skipped_undecodable += 1;
                }
                Err(Skip::Io(e)) => {
                    tracing::warn!(path = %path.display(), "failed to read file: {e}");
                    report.errors.push(format!("{}: {e}", path.display()));
                }
            }
        }

        tracing::info!(
            loaded = report.loaded,
            seen = report.files_seen,
            root = %root.display(),
            "corpus loaded"
        );
        (documents, report)
    }

    fn read_one(&self, path: &Path) -> Result<Option<String>, Skip> {
        let size = std::fs::metadata(path).map_err(Skip::Io)?.len();
        if size > self.max_file_size {
            return Err(Skip::TooLarge(size));
        }
        let bytes = std::fs::read(path).map_err(Skip::Io)?;
        let text = String::from_utf8(bytes).map_err(|_| Skip::Undecodable)?;
        let trimmed = text.trim_start_matches('\u{feff}').trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_owned()))
        }
    }
}

enum Skip {
    TooLarge(u64),
    Undecodable,
    Io(std::io::Error),
}

fn relative_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
