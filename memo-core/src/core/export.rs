//! Export of the whole outline as a `.zip` of nested text files.
//!
//! The outline is first written to a scratch directory next to the archive
//! (one `<title>.txt` per note, one `<title>/` directory per note that has
//! children), which is then compressed and always removed afterwards.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::note::NoteField;
use crate::core::storage::OutlineStore;
use crate::core::tree::{OutlineTree, TreeNode};

/// Result of a finished export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub archive_path: PathBuf,
    pub note_count: usize,
}

/// Errors specific to exporting.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot walk export directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("cannot read note {id}: {message}")]
    Store { id: i64, message: String },

    #[error("scratch directory already exists: {path}")]
    ScratchExists { path: PathBuf },

    #[error("archive path needs a file extension: {path}")]
    InvalidPath { path: PathBuf },
}

impl ExportError {
    fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path: path.into() },
            _ => Self::Io {
                path: path.into(),
                source: error,
            },
        }
    }
}

/// Removes the scratch directory when dropped, whatever happened in between.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(path: PathBuf) -> Result<Self, ExportError> {
        if path.exists() {
            return Err(ExportError::ScratchExists { path });
        }
        fs::create_dir(&path).map_err(|e| ExportError::from_io(&path, e))?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            log::warn!("Could not remove export scratch directory {}: {e}", self.path.display());
        }
    }
}

/// Exports every note of `tree` into a zip archive at `archive_path`.
///
/// The scratch directory is `archive_path` without its extension; it must
/// not exist beforehand and is removed on every exit path. On failure no
/// partial archive is left behind.
///
/// # Errors
///
/// Returns [`ExportError`] describing the first stage that failed.
pub fn export_all<S: OutlineStore + ?Sized>(
    tree: &OutlineTree,
    store: &S,
    archive_path: &Path,
) -> Result<ExportSummary, ExportError> {
    if archive_path.extension().is_none() {
        return Err(ExportError::InvalidPath {
            path: archive_path.into(),
        });
    }
    let scratch = ScratchDir::create(archive_path.with_extension(""))?;

    let note_count = write_children(tree.root(), store, &scratch.path)?;
    compress_dir(&scratch.path, archive_path)?;

    log::info!("Exported {note_count} notes to {}", archive_path.display());
    Ok(ExportSummary {
        archive_path: archive_path.into(),
        note_count,
    })
}

/// Writes every child of `node` into `dir`, recursing into a same-named
/// subdirectory for children that have children. Returns the note count.
fn write_children<S: OutlineStore + ?Sized>(
    node: &TreeNode,
    store: &S,
    dir: &Path,
) -> Result<usize, ExportError> {
    let mut used = HashSet::new();
    let mut count = 0;

    for child in node.children() {
        let name = unique_name(&file_stem_for(child.title()), &mut used);
        let body = store
            .read_field(child.id(), NoteField::Note)
            .map_err(|e| ExportError::Store {
                id: child.id(),
                message: e.to_string(),
            })?
            .into_text();

        let file_path = dir.join(format!("{name}.txt"));
        fs::write(&file_path, body).map_err(|e| ExportError::from_io(&file_path, e))?;
        count += 1;

        if child.has_children() {
            let sub_dir = dir.join(&name);
            fs::create_dir(&sub_dir).map_err(|e| ExportError::from_io(&sub_dir, e))?;
            count += write_children(child, store, &sub_dir)?;
        }
    }

    Ok(count)
}

/// Turns a note title into a safe file name stem.
fn file_stem_for(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "Untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Appends ` (2)`, ` (3)`, ... until neither `<stem>.txt` nor the `<stem>`
/// directory clashes with a name already taken among its siblings.
/// Comparison ignores case so archives unpack cleanly on any file system.
fn unique_name(stem: &str, used: &mut HashSet<String>) -> String {
    let mut candidate = stem.to_string();
    let mut n = 2;
    loop {
        let dir_name = candidate.to_lowercase();
        let file_name = format!("{dir_name}.txt");
        if !used.contains(&dir_name) && !used.contains(&file_name) {
            used.insert(dir_name);
            used.insert(file_name);
            return candidate;
        }
        candidate = format!("{stem} ({n})");
        n += 1;
    }
}

/// Compresses `work_dir` into a new archive at `archive_path`, removing the
/// archive again if anything fails after it was created.
fn compress_dir(work_dir: &Path, archive_path: &Path) -> Result<(), ExportError> {
    let file = File::create(archive_path).map_err(|e| ExportError::from_io(archive_path, e))?;
    let result = write_archive(file, work_dir);
    if result.is_err() {
        if let Err(e) = fs::remove_file(archive_path) {
            log::warn!("Could not remove partial archive {}: {e}", archive_path.display());
        }
    }
    result
}

fn write_archive(file: File, work_dir: &Path) -> Result<(), ExportError> {
    let mut zip = ZipWriter::new(file);
    let base = work_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());

    zip.add_directory(format!("{base}/"), entry_options(work_dir)?)?;

    for entry in WalkDir::new(work_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let relative: Vec<String> = path
            .strip_prefix(work_dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let name = format!("{base}/{}", relative.join("/"));
        let options = entry_options(path)?;

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
        } else if entry.file_type().is_file() {
            let data = fs::read(path).map_err(|e| ExportError::from_io(path, e))?;
            zip.start_file(name, options)?;
            zip.write_all(&data).map_err(|e| ExportError::from_io(path, e))?;
        }
    }

    zip.finish()?;
    Ok(())
}

fn entry_options(path: &Path) -> Result<SimpleFileOptions, ExportError> {
    let metadata = fs::metadata(path).map_err(|e| ExportError::from_io(path, e))?;
    Ok(SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(permission_bits(&metadata)))
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// `<stem>-YYYY-MM-DD_HH-MM-SS.<extension>`, the default name for exports
/// and backups.
pub fn dated_file_name(stem: &str, extension: &str, at: NaiveDateTime) -> String {
    format!("{stem}-{}.{extension}", at.format("%Y-%m-%d_%H-%M-%S"))
}
