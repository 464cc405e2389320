//! Per-language child-process lifecycle: spawn on demand by file
//! extension, one reader thread per server, cooperative polling for
//! clients without one.

use std::collections::HashMap;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use crate::client::Client;
use crate::transport::{split_child, TransportError};
use crate::Error;

/// The default window for the initialize handshake.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ServerProcess {
    pub name: String,
    child: Child,
    pub client: Arc<Client>,
    pub active: bool,
    /// Document version counter for whole-document didChange syncs.
    pub version_counter: i32,
}

/// Map a file extension to `(server name, argv)`.
pub fn server_for_extension(ext: &str) -> Option<(&'static str, &'static [&'static str])> {
    match ext {
        "zig" => Some(("zls", &["zls"])),
        "rs" => Some(("rust_analyzer", &["rust-analyzer"])),
        "go" => Some(("gopls", &["gopls"])),
        "c" | "cc" | "cpp" | "cxx" | "h" | "hpp" | "hxx" => Some(("clangd", &["clangd"])),
        "ts" | "tsx" | "js" | "jsx" => {
            Some(("ts_ls", &["typescript-language-server", "--stdio"]))
        }
        "gza" | "ghost" => Some(("ghostls", &["ghostls"])),
        _ => None,
    }
}

#[derive(Default)]
pub struct ServerManager {
    servers: HashMap<String, ServerProcess>,
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.servers.get(name).is_some_and(|server| server.active)
    }

    pub fn client(&self, name: &str) -> Option<Arc<Client>> {
        self.servers.get(name).map(|server| Arc::clone(&server.client))
    }

    pub fn running_servers(&self) -> Vec<&str> {
        self.servers
            .values()
            .filter(|server| server.active)
            .map(|server| server.name.as_str())
            .collect()
    }

    /// Spawn a language server and start its reader thread. The child gets
    /// piped stdin/stdout and inherits stderr; `initialize` is sent with a
    /// `file://<cwd>` root URI before the reader starts.
    pub fn spawn(&mut self, name: &str, argv: &[&str]) -> Result<Arc<Client>, Error> {
        if self.is_running(name) {
            return Err(Error::ServerAlreadyRunning(name.to_string()));
        }

        let program = argv
            .first()
            .ok_or_else(|| Error::ProcessSpawnFailed(name.to_string(), "empty argv".to_string()))?;
        let program = which::which(program)
            .map_err(|err| Error::ProcessSpawnFailed(name.to_string(), err.to_string()))?;

        let mut child = Command::new(program)
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| Error::ProcessSpawnFailed(name.to_string(), err.to_string()))?;

        let (reader, writer) = split_child(&mut child)?;
        let client = Arc::new(Client::new(name, Box::new(reader), Box::new(writer)));

        let root_uri = format!(
            "file://{}",
            std::env::current_dir()
                .map(|cwd| cwd.display().to_string())
                .unwrap_or_else(|_| "/".to_string())
        );
        client.send_initialize(&root_uri)?;
        client.start_reader_loop();

        self.servers.insert(
            name.to_string(),
            ServerProcess {
                name: name.to_string(),
                child,
                client: Arc::clone(&client),
                active: true,
                version_counter: 0,
            },
        );
        Ok(client)
    }

    /// Spawn (or reuse) the server responsible for `filename`. Unknown
    /// extensions and spawn failures both come back as `None`; failures are
    /// logged, an unknown filetype is not an error.
    pub fn auto_spawn(&mut self, filename: &str) -> Option<Arc<Client>> {
        let ext = Path::new(filename).extension()?.to_str()?;
        let (name, argv) = server_for_extension(ext)?;

        if self.is_running(name) {
            return self.client(name);
        }
        match self.spawn(name, argv) {
            Ok(client) => Some(client),
            Err(err) => {
                log::warn!("failed to start {} for {}: {}", name, filename, err);
                None
            }
        }
    }

    /// Stop a server: mark it inactive, stop the reader, ask the server to
    /// shut down, then reap the child and drop the entry. Returns whether
    /// the server existed.
    pub fn shutdown_server(&mut self, name: &str) -> bool {
        let Some(mut server) = self.servers.remove(name) else {
            return false;
        };
        server.active = false;

        // best effort; the server may already be gone
        if let Err(err) = server
            .client
            .shutdown()
            .and_then(|_| server.client.exit())
        {
            log::debug!("{}: shutdown request failed: {}", name, err);
        }

        if let Err(err) = server.child.kill() {
            log::debug!("{}: kill failed: {}", name, err);
        }
        // the dead child closes its stdout, which unblocks the reader
        server.client.stop_reader_loop();
        if let Err(err) = server.child.wait() {
            log::warn!("{}: wait failed: {}", name, err);
        }
        true
    }

    /// Cooperatively process pending responses for every active server
    /// whose reader thread is not running. Transport failures mark the
    /// entry inactive; nothing here can take the editor down.
    pub fn poll_all(&mut self) {
        for server in self.servers.values_mut() {
            if !server.active || server.client.reader_running() {
                continue;
            }
            match server.client.poll() {
                Ok(()) => {}
                Err(Error::Transport(TransportError::EndOfStream)) => {
                    log::info!("{}: server closed its stream", server.name);
                    server.active = false;
                }
                Err(Error::Transport(err)) => {
                    log::error!("{}: transport failure: {}", server.name, err);
                    server.active = false;
                }
                Err(err) => {
                    log::error!("{}: {}", server.name, err);
                }
            }
        }
    }

    pub fn notify_open(&mut self, name: &str, uri: &str, language_id: &str, text: &str) {
        if let Some(server) = self.servers.get_mut(name) {
            server.version_counter = 0;
            if let Err(err) = server.client.did_open(uri, language_id, text) {
                log::error!("{}: didOpen failed: {}", name, err);
            }
        }
    }

    pub fn notify_change(&mut self, name: &str, uri: &str, text: &str) {
        if let Some(server) = self.servers.get_mut(name) {
            server.version_counter += 1;
            if let Err(err) = server.client.did_change(uri, server.version_counter, text) {
                log::error!("{}: didChange failed: {}", name, err);
            }
        }
    }

    pub fn notify_save(&mut self, name: &str, uri: &str) {
        if let Some(server) = self.servers.get_mut(name) {
            if let Err(err) = server.client.did_save(uri) {
                log::error!("{}: didSave failed: {}", name, err);
            }
        }
    }

    pub fn notify_close(&mut self, name: &str, uri: &str) {
        if let Some(server) = self.servers.get_mut(name) {
            if let Err(err) = server.client.did_close(uri) {
                log::error!("{}: didClose failed: {}", name, err);
            }
        }
    }
}

impl Drop for ServerManager {
    fn drop(&mut self) {
        let names: Vec<String> = self.servers.keys().cloned().collect();
        for name in names {
            self.shutdown_server(&name);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_extension_table() {
        assert_eq!(server_for_extension("zig").unwrap().0, "zls");
        assert_eq!(server_for_extension("rs").unwrap().0, "rust_analyzer");
        assert_eq!(server_for_extension("go").unwrap().0, "gopls");
        for ext in ["c", "cc", "cpp", "cxx", "h", "hpp", "hxx"] {
            assert_eq!(server_for_extension(ext).unwrap().0, "clangd");
        }
        for ext in ["ts", "tsx", "js", "jsx"] {
            let (name, argv) = server_for_extension(ext).unwrap();
            assert_eq!(name, "ts_ls");
            assert_eq!(argv, ["typescript-language-server", "--stdio"]);
        }
        assert_eq!(server_for_extension("gza").unwrap().0, "ghostls");
        assert_eq!(server_for_extension("ghost").unwrap().0, "ghostls");
        assert_eq!(server_for_extension("txt"), None);
    }

    #[test]
    fn test_auto_spawn_unknown_extension() {
        let mut manager = ServerManager::new();
        assert!(manager.auto_spawn("notes.txt").is_none());
        assert!(manager.auto_spawn("no_extension").is_none());
    }

    #[test]
    fn test_spawn_missing_binary() {
        let mut manager = ServerManager::new();
        let err = manager
            .spawn("missing", &["grim-no-such-language-server"])
            .unwrap_err();
        assert!(matches!(err, Error::ProcessSpawnFailed(name, _) if name == "missing"));
        assert!(!manager.is_running("missing"));
    }

    #[test]
    fn test_spawn_and_shutdown_with_stub_process() {
        // `cat` never answers, but it exercises the full pipe + reader
        // thread lifecycle
        let mut manager = ServerManager::new();
        let client = match manager.spawn("stub", &["cat"]) {
            Ok(client) => client,
            // sandboxed test environments may lack cat; nothing to test then
            Err(Error::ProcessSpawnFailed(..)) => return,
            Err(err) => panic!("unexpected error: {}", err),
        };
        assert!(manager.is_running("stub"));
        assert!(client.reader_running());

        assert!(matches!(
            manager.spawn("stub", &["cat"]).unwrap_err(),
            Error::ServerAlreadyRunning(name) if name == "stub"
        ));

        assert!(manager.shutdown_server("stub"));
        assert!(!manager.is_running("stub"));
        assert!(!manager.shutdown_server("stub"));
    }
}
