//! File API for project file operations
//!
//! Read/write/delete of single files, confined to a project root.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum file size: 1MB
pub const MAX_FILE_SIZE: u64 = 1_048_576;

/// Maximum path length
pub const MAX_PATH_LENGTH: usize = 4096;

#[derive(Debug, Error)]
pub enum FileApiError {
    #[error("Path escapes project root")]
    PathEscape,
    #[error("Path exceeds maximum length")]
    PathTooLong,
    #[error("File not found")]
    FileNotFound,
    #[error("Path is a directory")]
    IsDirectory,
    #[error("File exceeds 1MB limit")]
    FileTooLarge,
    #[error("File is not valid UTF-8")]
    InvalidUtf8,
    #[error("I/O error: {0}")]
    IoError(std::io::Error),
}

impl From<std::io::Error> for FileApiError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            FileApiError::FileNotFound
        } else {
            FileApiError::IoError(e)
        }
    }
}

/// Validate and resolve a relative path within the project root.
/// `..` may not climb above the root; existing paths are canonicalized so
/// symlinks pointing outside are rejected too.
pub fn resolve_safe_path(project_root: &Path, relative_path: &str) -> Result<PathBuf, FileApiError> {
    if relative_path.len() > MAX_PATH_LENGTH {
        return Err(FileApiError::PathTooLong);
    }

    let mut components = Vec::new();
    for component in relative_path.split(['/', '\\']) {
        match component {
            "" | "." => continue,
            ".." => {
                if components.pop().is_none() {
                    return Err(FileApiError::PathEscape);
                }
            }
            c => components.push(c),
        }
    }

    let full_path = components
        .iter()
        .fold(project_root.to_path_buf(), |path, c| path.join(c));

    let root_canonical = project_root.canonicalize()?;
    if full_path.exists() {
        let canonical = full_path.canonicalize()?;
        if !canonical.starts_with(&root_canonical) {
            warn!(
                "Path escape attempt: {:?} not under {:?}",
                canonical, root_canonical
            );
            return Err(FileApiError::PathEscape);
        }
        return Ok(canonical);
    }

    // 写入新文件：找到最近的已存在祖先并校验
    let mut ancestor = full_path.parent();
    while let Some(dir) = ancestor {
        if dir.exists() {
            if !dir.canonicalize()?.starts_with(&root_canonical) {
                return Err(FileApiError::PathEscape);
            }
            break;
        }
        ancestor = dir.parent();
    }
    Ok(full_path)
}

/// Read file content as UTF-8 string
pub fn read_file(project_root: &Path, relative_path: &str) -> Result<String, FileApiError> {
    let file_path = resolve_safe_path(project_root, relative_path)?;

    debug!("Reading file: {:?}", file_path);

    let metadata = fs::metadata(&file_path)?;
    if metadata.is_dir() {
        return Err(FileApiError::IsDirectory);
    }
    if metadata.len() > MAX_FILE_SIZE {
        return Err(FileApiError::FileTooLarge);
    }

    let mut content = Vec::new();
    fs::File::open(&file_path)?.read_to_end(&mut content)?;

    String::from_utf8(content).map_err(|_| FileApiError::InvalidUtf8)
}

/// Write file content atomically, creating parent directories as needed.
/// Returns the number of bytes written.
pub fn write_file(project_root: &Path, relative_path: &str, content: &str) -> Result<u64, FileApiError> {
    let file_path = resolve_safe_path(project_root, relative_path)?;

    debug!("Writing file: {:?}", file_path);

    let size = content.len() as u64;
    if size > MAX_FILE_SIZE {
        return Err(FileApiError::FileTooLarge);
    }
    if file_path.is_dir() {
        return Err(FileApiError::IsDirectory);
    }

    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // 先写同目录临时文件再 rename
    let temp_path = temp_sibling(&file_path);
    {
        let mut temp_file = fs::File::create(&temp_path)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.sync_all()?;
    }
    if let Err(e) = fs::rename(&temp_path, &file_path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(size)
}

/// Delete a single file
pub fn delete_file(project_root: &Path, relative_path: &str) -> Result<(), FileApiError> {
    let full_path = resolve_safe_path(project_root, relative_path)?;
    if !full_path.exists() {
        return Err(FileApiError::FileNotFound);
    }
    if full_path.is_dir() {
        return Err(FileApiError::IsDirectory);
    }

    debug!("Deleting file: {:?}", full_path);
    fs::remove_file(&full_path)?;
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".devbench-tmp");
    path.with_file_name(name)
}
