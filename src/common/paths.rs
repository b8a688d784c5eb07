//! Configuration and task-directory paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/emurun/` and `~/.local/share/emurun/`
//! - macOS: `~/Library/Application Support/emurun/`

use std::io;
use std::path::{Path, PathBuf};

/// Application name used for config and data directories
const APP_NAME: &str = "emurun";

/// Extensions recognised as task definition files
const TASK_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the directory holding task files shipped alongside the user's config
pub fn default_task_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("tasks"))
}

/// Collect every task definition file below `dir`, sorted by path
///
/// Sorting keeps declaration order (and so tie-breaking in the resolver)
/// independent of directory iteration order. A missing directory yields
/// no files.
pub fn task_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if dir.is_dir() {
        collect_task_files(dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_task_files(dir: &Path, files: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_task_files(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TASK_EXTENSIONS.contains(&ext))
        {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }

    #[test]
    fn test_task_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.yml"), "name: b").unwrap();
        std::fs::write(dir.path().join("a.yaml"), "name: a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("nested").join("c.yml"), "name: c").unwrap();

        let files = task_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yml", "nested/c.yml"]);
    }

    #[test]
    fn test_missing_dir_has_no_task_files() {
        let files = task_files(Path::new("/nonexistent/emurun-tasks")).unwrap();
        assert!(files.is_empty());
    }
}
