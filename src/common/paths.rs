//! Project layout and file operations.
//!
//! All persistent state lives under `<work dir>/.otel-build/`. The work
//! dir is the project root: the OTEL_WORK_DIR environment variable when
//! set, otherwise the current working directory. Setup creates the tree;
//! toolexec subprocesses only read from it, except for their own debug
//! snapshots.

use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    BUILD_TEMP_DIR, ENV_OTEL_MATCHED_MODULES, ENV_OTEL_WORK_DIR, MATCHED_RULE_FILE,
};

/// Resolve the project root directory.
pub fn otel_work_dir() -> PathBuf {
    match std::env::var(ENV_OTEL_WORK_DIR) {
        Ok(wd) if !wd.is_empty() => PathBuf::from(wd),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Path of the build temp directory under the work dir.
pub fn build_temp_dir() -> PathBuf {
    otel_work_dir().join(BUILD_TEMP_DIR)
}

/// Path of `name` under the build temp directory.
pub fn build_temp(name: &str) -> PathBuf {
    build_temp_dir().join(name)
}

/// Path of the persisted matched rule sets.
pub fn matched_rule_file() -> PathBuf {
    build_temp(MATCHED_RULE_FILE)
}

/// Copy a file, creating the destination's parent directories.
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), String> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create dir {}: {}", parent.display(), e))?;
    }
    fs::copy(src, dst).map_err(|e| {
        format!(
            "Failed to copy {} to {}: {}",
            src.display(),
            dst.display(),
            e
        )
    })?;
    Ok(())
}

/// Recursively copy a directory.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), String> {
    fs::create_dir_all(dst).map_err(|e| format!("Failed to create dir: {}", e))?;

    for entry in fs::read_dir(src).map_err(|e| format!("Failed to read dir: {}", e))? {
        let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
        let path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if path.is_dir() {
            copy_dir_recursive(&path, &dst_path)?;
        } else {
            fs::copy(&path, &dst_path).map_err(|e| format!("Failed to copy file: {}", e))?;
        }
    }
    Ok(())
}

fn copy_backup_files(names: &[&str], src: &Path, dst: &Path) -> Result<(), String> {
    let mut errors = Vec::new();
    for name in names {
        let src_file = src.join(name);
        let dst_file = dst.join(name);
        if let Err(e) = copy_file(&src_file, &dst_file) {
            errors.push(e);
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Back up files from the work dir to `.otel-build/backup/`. Missing
/// originals surface as errors the caller may tolerate.
pub fn backup_files(names: &[&str]) -> Result<(), String> {
    copy_backup_files(names, &otel_work_dir(), &build_temp("backup"))
}

/// Restore files from `.otel-build/backup/` back into the work dir.
pub fn restore_files(names: &[&str]) -> Result<(), String> {
    copy_backup_files(names, &build_temp("backup"), &otel_work_dir())
}

/// Escape an import path into a directory name for the debug snapshot
/// tree, e.g. `net/http` -> `net_http`.
pub fn escape_import_path(path: &str) -> String {
    path.replace('/', "_").replace('.', "_")
}

/// The list of matched module paths from the environment, or None when the
/// variable is unset.
pub fn matched_modules() -> Option<Vec<String>> {
    match std::env::var(ENV_OTEL_MATCHED_MODULES) {
        Ok(env) if !env.is_empty() => Some(env.split(',').map(|s| s.to_string()).collect()),
        _ => None,
    }
}

/// Check whether the module is in the matched list. An unset environment
/// means the fast filter is unavailable and the caller must consult the
/// rule-set file, so this returns true.
pub fn is_module_matched(module_path: &str) -> bool {
    match matched_modules() {
        None => true,
        Some(modules) => modules.iter().any(|m| m == module_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_import_path() {
        assert_eq!(escape_import_path("net/http"), "net_http");
        assert_eq!(
            escape_import_path("github.com/gin-gonic/gin"),
            "github_com_gin-gonic_gin"
        );
        assert_eq!(escape_import_path("main"), "main");
    }

    #[test]
    fn test_backup_and_restore() {
        let _guard = crate::testutil::env_guard();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(ENV_OTEL_WORK_DIR, dir.path());
        std::fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();

        backup_files(&["go.mod"]).unwrap();
        std::fs::write(dir.path().join("go.mod"), "mutated").unwrap();
        restore_files(&["go.mod"]).unwrap();

        let restored = std::fs::read_to_string(dir.path().join("go.mod")).unwrap();
        assert_eq!(restored, "module example.com/app\n");
        std::env::remove_var(ENV_OTEL_WORK_DIR);
    }

    #[test]
    fn test_copy_dir_recursive() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("a.txt"), "a").unwrap();
        std::fs::write(src.path().join("nested/b.txt"), "b").unwrap();

        let out = dst.path().join("copy");
        copy_dir_recursive(src.path(), &out).unwrap();
        assert_eq!(std::fs::read_to_string(out.join("a.txt")).unwrap(), "a");
        assert_eq!(
            std::fs::read_to_string(out.join("nested/b.txt")).unwrap(),
            "b"
        );
    }
}
