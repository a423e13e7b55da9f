use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

const SKIP_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".nyc_output",
    "coverage",
    ".cache",
    ".next",
    ".nuxt",
    ".jsmutator-state.json",
];

const SKIP_SUFFIXES: &[&str] = &[".jsmutator.bak"];

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("failed to create sandbox directory: {0}")]
    TempDir(#[source] std::io::Error),
    #[error("failed to copy {} into the sandbox: {source}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to link {} -> {}: {source}", link.display(), target.display())]
    Symlink {
        target: PathBuf,
        link: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A staged copy of the project. The directory is removed on drop.
pub struct Sandbox {
    pub root: PathBuf,
    _temp_dir: tempfile::TempDir,
}

fn should_skip(name: &str) -> bool {
    SKIP_NAMES.iter().any(|s| *s == name) || SKIP_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// `rel` is the path of `src` relative to the project root. Entries listed in
/// `symlinks` are left out at any depth; `copy_tree` links them afterwards.
fn copy_dir_filtered(src: &Path, dst: &Path, rel: &Path, symlinks: &[PathBuf]) -> Result<(), StagingError> {
    let copy_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StagingError::Copy { path, source }
    };
    fs::create_dir_all(dst).map_err(copy_err(dst))?;
    for entry in fs::read_dir(src).map_err(copy_err(src))? {
        let entry = entry.map_err(copy_err(src))?;
        let name = entry.file_name();
        let rel_path = rel.join(&name);
        if should_skip(&name.to_string_lossy()) || symlinks.iter().any(|link| *link == rel_path) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let ft = entry.file_type().map_err(copy_err(&src_path))?;
        if ft.is_dir() {
            copy_dir_filtered(&src_path, &dst_path, &rel_path, symlinks)?;
        } else if ft.is_file() {
            fs::copy(&src_path, &dst_path).map_err(copy_err(&src_path))?;
        }
        // Skip symlinks and other special files
    }
    Ok(())
}

/// Copy the project into `dest_root`, then link each `symlinks` entry that
/// exists in the project. A link that cannot be created fails the staging.
pub fn copy_tree(project_root: &Path, dest_root: &Path, symlinks: &[PathBuf]) -> Result<(), StagingError> {
    copy_dir_filtered(project_root, dest_root, Path::new(""), symlinks)?;

    for entry in symlinks {
        let target = project_root.join(entry);
        if !target.exists() {
            debug!(path = %target.display(), "symlink source missing, skipped");
            continue;
        }
        let target = target
            .canonicalize()
            .map_err(|source| StagingError::Copy { path: target.clone(), source })?;
        let link = dest_root.join(entry);
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| StagingError::Copy { path: parent.to_path_buf(), source })?;
        }
        symlink(&target, &link).map_err(|source| StagingError::Symlink {
            target: target.clone(),
            link: link.clone(),
            source,
        })?;
        debug!(target = %target.display(), link = %link.display(), "created symbolic link");
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Stage a fresh sandbox copy of `project_root` in a temp directory.
pub fn stage(project_root: &Path, symlinks: &[PathBuf], session_id: &str) -> Result<Sandbox, StagingError> {
    let temp_dir = tempfile::Builder::new()
        .prefix(&format!("jsmutator-{}-", session_id))
        .tempdir()
        .map_err(StagingError::TempDir)?;
    copy_tree(project_root, temp_dir.path(), symlinks)?;
    info!(root = %temp_dir.path().display(), "sandbox staged");
    Ok(Sandbox {
        root: temp_dir.path().to_path_buf(),
        _temp_dir: temp_dir,
    })
}
