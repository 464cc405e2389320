//! Where plugins live on disk.

use std::path::PathBuf;

/// Search order for plugin discovery; directories earlier in the list win
/// when two plugins share an id.
pub fn default_plugin_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(home) = etcetera::home_dir() {
        dirs.push(home.join(".config/grim/plugins"));
    }
    dirs.push(PathBuf::from("./plugins"));
    dirs.push(PathBuf::from("/usr/share/grim/plugins"));
    dirs.push(PathBuf::from("/usr/local/share/grim/plugins"));
    dirs
}

/// Cache slot for a prebuilt plugin artifact:
/// `$HOME/.cache/grim/plugins/{name}-{version}-{os}-{arch}`.
pub fn cache_artifact_dir(name: &str, version: &str) -> Option<PathBuf> {
    let home = etcetera::home_dir().ok()?;
    Some(home.join(".cache/grim/plugins").join(format!(
        "{}-{}-{}-{}",
        name,
        version,
        std::env::consts::OS,
        std::env::consts::ARCH
    )))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_search_order() {
        let dirs = default_plugin_dirs();
        assert!(dirs.len() >= 3);
        assert_eq!(
            dirs.last().unwrap(),
            &PathBuf::from("/usr/local/share/grim/plugins")
        );
        if dirs.len() == 4 {
            assert!(dirs[0].ends_with(".config/grim/plugins"));
        }
    }

    #[test]
    fn test_cache_layout() {
        if let Some(dir) = cache_artifact_dir("surround-plus", "1.2.0") {
            let name = dir.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("surround-plus-1.2.0-"));
            assert!(name.contains(std::env::consts::OS));
            assert!(name.ends_with(std::env::consts::ARCH));
        }
    }
}
