//! Directory walk that turns a project tree into `SourceDocument`s.
//!
//! Files are matched by extension only; excluded directory names prune the
//! walk. Unreadable, empty or unsupported files are reported, not fatal.
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::IngestionSettings;
use crate::error::Error;
use crate::types::{ChunkMetadata, ContentKind, SourceDocument};

const CODE_EXTENSIONS: &[&str] = &[".py", ".c", ".cpp", ".h", ".hpp", ".js", ".ts", ".java", ".rs", ".go"];
const PROSE_EXTENSIONS: &[&str] = &[".md", ".txt"];

/// Documents ready for chunking plus the files that were passed over.
#[derive(Debug, Default)]
pub struct LoadedSources {
    pub documents: Vec<SourceDocument>,
    pub skipped: Vec<Error>,
}

pub struct SourceLoader {
    root: PathBuf,
    include: BTreeSet<String>,
    exclude_dirs: BTreeSet<String>,
    project_id: Option<String>,
}

impl SourceLoader {
    pub fn new(root: impl Into<PathBuf>, settings: &IngestionSettings) -> Self {
        let mut include = normalize_extensions(&settings.include_extensions);
        if include.is_empty() {
            include = CODE_EXTENSIONS.iter().chain(PROSE_EXTENSIONS).map(|s| s.to_string()).collect();
        }
        Self {
            root: root.into(),
            include,
            exclude_dirs: settings.exclude_dirs.iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
            project_id: None,
        }
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn load(&self) -> LoadedSources {
        let mut out = LoadedSources::default();
        let mut paths: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.is_excluded(e))
            .filter_map(|e| match e {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|p| extension_of(p).is_some_and(|ext| self.include.contains(&ext)))
            .collect();
        paths.sort();

        for path in paths {
            match self.load_file(&path) {
                Ok(doc) => out.documents.push(doc),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping source file");
                    out.skipped.push(err);
                }
            }
        }
        debug!(documents = out.documents.len(), skipped = out.skipped.len(), root = %self.root.display(), "loaded sources");
        out
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry.file_name().to_str().is_some_and(|name| self.exclude_dirs.contains(name))
    }

    fn load_file(&self, path: &Path) -> Result<SourceDocument, Error> {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let display = rel.to_string_lossy().replace('\\', "/");
        let input_err = |reason: String| Error::IngestionInput { path: display.clone(), reason };

        let ext = extension_of(path).unwrap_or_default();
        let kind = kind_for_extension(&ext).ok_or_else(|| input_err(format!("unsupported file type '{ext}'")))?;
        let text = read_file_content(path).map_err(|e| input_err(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(input_err("no extractable text".to_string()));
        }

        let modified_ts = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_secs()).ok());
        let metadata = ChunkMetadata {
            language: language_for_extension(&ext).map(str::to_string),
            project_id: self.project_id.clone(),
            modified_ts,
            ..Default::default()
        };
        Ok(SourceDocument { path: display, kind, text, metadata })
    }
}

fn read_file_content(path: &Path) -> std::io::Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(|e| format!(".{}", e.to_ascii_lowercase()))
}

/// Accepts `.pdf`, `pdf`, `*.pdf` or `**/*.pdf` and keeps `.pdf`.
fn normalize_extensions(items: &[String]) -> BTreeSet<String> {
    items
        .iter()
        .filter_map(|item| {
            let s = item.trim().to_ascii_lowercase();
            let last = s.rsplit('.').next()?.trim_start_matches(['*', '/']);
            (!last.is_empty() && last.chars().all(|c| c.is_ascii_alphanumeric())).then(|| format!(".{last}"))
        })
        .collect()
}

pub fn kind_for_extension(ext: &str) -> Option<ContentKind> {
    if CODE_EXTENSIONS.contains(&ext) {
        Some(ContentKind::Code)
    } else if PROSE_EXTENSIONS.contains(&ext) {
        Some(ContentKind::Prose)
    } else {
        None
    }
}

fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        ".py" => "python",
        ".c" | ".h" => "c",
        ".cpp" | ".hpp" => "cpp",
        ".js" => "javascript",
        ".ts" => "typescript",
        ".java" => "java",
        ".rs" => "rust",
        ".go" => "go",
        ".md" => "markdown",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_patterns_normalize() {
        let got = normalize_extensions(&["pdf".into(), "*.MD".into(), "**/*.rs".into(), ".txt".into(), "**/".into()]);
        let want: BTreeSet<String> = [".pdf", ".md", ".rs", ".txt"].iter().map(|s| s.to_string()).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn kinds_follow_extension() {
        assert_eq!(kind_for_extension(".rs"), Some(ContentKind::Code));
        assert_eq!(kind_for_extension(".md"), Some(ContentKind::Prose));
        assert_eq!(kind_for_extension(".pdf"), None);
    }
}
