use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// File extensions that are normalized into the durable document format
/// after download. Matching is case-insensitive.
const OFFICE_EXTENSIONS: [&str; 4] = ["doc", "docx", "odt", "rtf"];

/// Extension of the durable document format pages and office files are
/// converted into.
pub(crate) const DOCUMENT_EXTENSION: &str = "pdf";

/// Extension of the link-shortcut artifact written for external URL items.
pub(crate) const SHORTCUT_EXTENSION: &str = "url";

/// Whether a downloaded file of this extension must be converted into the
/// durable document format.
pub(crate) fn requires_conversion(extension: &str) -> bool {
    OFFICE_EXTENSIONS
        .iter()
        .any(|e| e.eq_ignore_ascii_case(extension))
}

/// Sanitizes a name to be safe for use as a file or directory name.
///
/// Characters that are illegal on common filesystems are mapped to `_`;
/// trailing dots and spaces are trimmed since Windows rejects them. The
/// result may be empty (a name made entirely of dots or whitespace), in
/// which case callers fall back to a synthetic name derived from the
/// remote id.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect();

    mapped.trim().trim_end_matches(['.', ' ']).to_string()
}

/// Manages the directory structure the archive is written into.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryManager {
    /// Base directory for the whole archive.
    root_dir: PathBuf,
}

impl DirectoryManager {
    /// Creates a new DirectoryManager rooted at the given directory,
    /// creating it if needed.
    pub(crate) fn new(root_dir: &Path) -> Result<Self> {
        fs::create_dir_all(root_dir)
            .with_context(|| format!("Failed to create archive root at {:?}", root_dir))?;

        Ok(DirectoryManager {
            root_dir: root_dir.to_path_buf(),
        })
    }

    /// Directory the converter bootstrap may place acquired tools into.
    pub(crate) fn tools_dir(&self) -> PathBuf {
        self.root_dir.join(".tools")
    }

    /// Creates or gets `ROOT/<safe course>/<safe module>`. Creation is
    /// idempotent, including intermediate segments.
    pub(crate) fn module_dir(
        &self,
        course_id: i64,
        course_name: &str,
        module_id: i64,
        module_name: &str,
    ) -> Result<PathBuf> {
        let course_segment = safe_segment(course_name, "course", course_id);
        let module_segment = safe_segment(module_name, "module", module_id);
        let dir = self.root_dir.join(course_segment).join(module_segment);

        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create module directory at {:?}", dir))?;
        Ok(dir)
    }
}

/// Sanitizes a path segment, substituting a synthetic `<kind>_<id>` name
/// when nothing survives sanitization.
fn safe_segment(name: &str, kind: &str, id: i64) -> String {
    let sanitized = sanitize_filename(name);
    if sanitized.is_empty() {
        format!("{kind}_{id}")
    } else {
        sanitized
    }
}

/// The canonical on-disk location of one item's artifact: a directory plus a
/// sanitized base filename. The kind-specific terminal extension is applied
/// on top, and the probe methods below are the only existence authority.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveTarget {
    dir: PathBuf,
    stem: String,
}

impl ArchiveTarget {
    /// Resolves a target from the item's title, falling back to `item_<id>`
    /// when the title sanitizes to nothing.
    pub(crate) fn new(dir: &Path, title: &str, item_id: i64) -> Self {
        ArchiveTarget {
            dir: dir.to_path_buf(),
            stem: safe_segment(title, "item", item_id),
        }
    }

    /// The sanitized base filename without any extension.
    pub(crate) fn stem(&self) -> &str {
        &self.stem
    }

    /// Path under the target directory with the given extension. An empty
    /// extension yields the bare stem (some remote files carry none).
    pub(crate) fn with_extension(&self, extension: &str) -> PathBuf {
        if extension.is_empty() {
            self.dir.join(&self.stem)
        } else {
            self.dir.join(format!("{}.{}", self.stem, extension))
        }
    }

    /// Path of the converted/rendered document artifact.
    pub(crate) fn document_path(&self) -> PathBuf {
        self.with_extension(DOCUMENT_EXTENSION)
    }

    /// Path of the link-shortcut artifact.
    pub(crate) fn shortcut_path(&self) -> PathBuf {
        self.with_extension(SHORTCUT_EXTENSION)
    }

    /// Probe for File items. True if the original-extension artifact exists,
    /// or, for office sources, if the converted document already does. Pure
    /// filesystem read.
    pub(crate) fn file_exists(&self, extension: &str) -> bool {
        if self.with_extension(extension).exists() {
            return true;
        }

        requires_conversion(extension) && self.document_path().exists()
    }

    /// True when the office source was already downloaded but its converted
    /// document is missing, so a later run converts without re-downloading.
    pub(crate) fn needs_conversion_only(&self, extension: &str) -> bool {
        requires_conversion(extension)
            && self.with_extension(extension).exists()
            && !self.document_path().exists()
    }

    /// Probe for Page items.
    pub(crate) fn page_exists(&self) -> bool {
        self.document_path().exists()
    }
}
