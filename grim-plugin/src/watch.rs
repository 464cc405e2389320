//! Hot-reload support: a polling watcher over plugin script mtimes.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

struct WatchEntry {
    plugin: String,
    path: PathBuf,
    mtime: Option<SystemTime>,
}

/// Records the scripts of loaded plugins and reports which ones changed
/// since the last poll. The caller decides what to do about it (normally:
/// reload, and log if that fails).
#[derive(Default)]
pub struct HotReloadWatcher {
    entries: Vec<WatchEntry>,
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

impl HotReloadWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&mut self, plugin: &str, path: &Path) {
        self.unwatch(plugin);
        self.entries.push(WatchEntry {
            plugin: plugin.to_string(),
            path: path.to_path_buf(),
            mtime: mtime_of(path),
        });
    }

    pub fn unwatch(&mut self, plugin: &str) {
        self.entries.retain(|entry| entry.plugin != plugin);
    }

    /// Names of plugins whose script mtime changed since the last poll.
    pub fn poll(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        for entry in &mut self.entries {
            let current = mtime_of(&entry.path);
            if current != entry.mtime {
                entry.mtime = current;
                changed.push(entry.plugin.clone());
            }
        }
        changed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_detects_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("plug.gza");
        std::fs::write(&script, "command a on_a\n").unwrap();

        let mut watcher = HotReloadWatcher::new();
        watcher.watch("plug", &script);
        assert!(watcher.poll().is_empty());

        std::fs::write(&script, "command a on_b\n").unwrap();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&script)
            .unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        assert_eq!(watcher.poll(), ["plug"]);
        // stable afterwards
        assert!(watcher.poll().is_empty());
    }

    #[test]
    fn test_unwatch_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("gone.gza");
        std::fs::write(&script, "x").unwrap();

        let mut watcher = HotReloadWatcher::new();
        watcher.watch("gone", &script);
        std::fs::remove_file(&script).unwrap();
        assert_eq!(watcher.poll(), ["gone"]);

        watcher.unwatch("gone");
        assert!(watcher.poll().is_empty());
    }
}
