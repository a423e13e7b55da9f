use std::path::{Path, PathBuf};

use tracing::warn;

pub fn backup_path(source_file: &Path) -> PathBuf {
    let mut backup = source_file.to_path_buf();
    let name = format!(
        ".{}.jsmutator.bak",
        source_file.file_name().unwrap_or_default().to_string_lossy()
    );
    backup.set_file_name(name);
    backup
}

/// Check if a backup file exists from a previous interrupted in-place run.
pub fn check_interrupted_run(source_file: &Path) -> Option<PathBuf> {
    let bak = backup_path(source_file);
    if bak.exists() {
        Some(bak)
    } else {
        None
    }
}

/// Save the pristine source next to the file before it is mutated in place.
pub fn write_backup(source_file: &Path, original: &str) -> std::io::Result<PathBuf> {
    let bak = backup_path(source_file);
    std::fs::write(&bak, original)?;
    Ok(bak)
}

/// Write the original back and drop the backup.
pub fn restore_original(source_file: &Path, original: &str) -> std::io::Result<()> {
    std::fs::write(source_file, original)?;
    let bak = backup_path(source_file);
    if bak.exists() {
        std::fs::remove_file(bak)?;
    }
    Ok(())
}

/// Restore source from a backup left by an interrupted run.
pub fn restore_from_backup(source_file: &Path, backup_file: &Path) -> std::io::Result<()> {
    std::fs::copy(backup_file, source_file)?;
    std::fs::remove_file(backup_file)?;
    Ok(())
}

/// Restore every file in `files` that still has a backup. Returns the files restored.
pub fn recover_interrupted(files: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut restored = Vec::new();
    for file in files {
        if let Some(bak) = check_interrupted_run(file) {
            warn!(file = %file.display(), "restoring source left mutated by an interrupted run");
            restore_from_backup(file, &bak)?;
            restored.push(file.clone());
        }
    }
    Ok(restored)
}
