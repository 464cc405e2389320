//! The sandboxed script host.
//!
//! The script VM itself lives behind the [`ScriptVm`] seam; the host owns
//! the sandbox configuration and the execution statistics, times every call
//! into the VM, and enforces the CPU and memory ceilings between VM ticks
//! (cooperatively: the VM reports its memory usage, it is not preempted).

use std::time::Instant;

use thiserror::Error;

use grim_event::EventType;

use crate::manifest::PluginPermissions;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxViolation {
    #[error("cpu limit exceeded: {elapsed_ms}ms > {limit_ms}ms")]
    CpuLimitExceeded { elapsed_ms: u64, limit_ms: u64 },
    #[error("memory limit exceeded: {used} > {limit} bytes")]
    MemoryLimitExceeded { used: usize, limit: usize },
    #[error("file access denied: {0}")]
    FileAccessDenied(String),
    #[error("network access denied")]
    NetworkAccessDenied,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub enable_filesystem_access: bool,
    pub enable_network_access: bool,
    pub enable_system_calls: bool,
    pub allowed_file_patterns: Vec<String>,
    pub blocked_file_patterns: Vec<String>,
    pub cpu_limit_ms: u64,
    pub memory_limit_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enable_filesystem_access: false,
            enable_network_access: false,
            enable_system_calls: false,
            allowed_file_patterns: Vec::new(),
            blocked_file_patterns: Vec::new(),
            cpu_limit_ms: 100,
            memory_limit_bytes: 64 * 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    pub fn from_permissions(permissions: &PluginPermissions) -> Self {
        Self {
            enable_filesystem_access: permissions.file_system_access,
            enable_network_access: permissions.network_access,
            enable_system_calls: permissions.system_calls,
            allowed_file_patterns: permissions.allowed_directories.clone(),
            blocked_file_patterns: permissions.blocked_directories.clone(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub execution_count: u64,
    pub total_execution_time_ms: u64,
    pub peak_memory_usage: usize,
    pub file_operations_count: u64,
    pub network_requests_count: u64,
    pub sandbox_violations: u64,
    pub last_execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAction {
    pub name: String,
    pub handler: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeymapAction {
    pub keys: String,
    pub handler: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAction {
    pub event: EventType,
    pub handler: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeAction {
    pub name: String,
}

/// The upward-facing surface a plugin setup function registers against.
/// Each callback is wired by the manager and carries the plugin context in
/// its captures.
pub struct ActionCallbacks {
    pub show_message: Box<dyn FnMut(&str)>,
    pub register_command: Box<dyn FnMut(CommandAction)>,
    pub register_keymap: Box<dyn FnMut(KeymapAction)>,
    pub register_event_handler: Box<dyn FnMut(EventAction)>,
    pub register_theme: Box<dyn FnMut(ThemeAction)>,
}

/// The contract a script VM backend fulfils.
pub trait ScriptVm: Send {
    fn compile(&mut self, source: &str) -> anyhow::Result<Box<dyn CompiledScript>>;
}

/// A compiled plugin artifact inside the VM.
pub trait CompiledScript: Send {
    fn execute_setup(&mut self, callbacks: &mut ActionCallbacks) -> anyhow::Result<()>;
    fn call_void(&mut self, symbol: &str) -> anyhow::Result<()>;
    fn call_bool(&mut self, symbol: &str) -> anyhow::Result<bool>;
    /// Queried between ticks for the memory ceiling.
    fn memory_usage(&self) -> usize {
        0
    }
}

pub struct CompiledPlugin {
    script: Box<dyn CompiledScript>,
}

/// Per-plugin host: one VM, one sandbox, one stats record.
pub struct PluginHost {
    vm: Box<dyn ScriptVm>,
    sandbox: SandboxConfig,
    stats: ExecutionStats,
    deinitialized: bool,
}

impl PluginHost {
    pub fn new(vm: Box<dyn ScriptVm>) -> Self {
        Self::with_sandbox(vm, SandboxConfig::default())
    }

    pub fn with_sandbox(vm: Box<dyn ScriptVm>, sandbox: SandboxConfig) -> Self {
        Self {
            vm,
            sandbox,
            stats: ExecutionStats::default(),
            deinitialized: false,
        }
    }

    pub fn sandbox(&self) -> &SandboxConfig {
        &self.sandbox
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn compile(&mut self, source: &str) -> anyhow::Result<CompiledPlugin> {
        let script = self.vm.compile(source)?;
        Ok(CompiledPlugin { script })
    }

    pub fn execute_setup(
        &mut self,
        plugin: &mut CompiledPlugin,
        callbacks: &mut ActionCallbacks,
    ) -> anyhow::Result<()> {
        self.guarded(plugin, |script| script.execute_setup(callbacks))
    }

    pub fn call_void(&mut self, plugin: &mut CompiledPlugin, symbol: &str) -> anyhow::Result<()> {
        self.guarded(plugin, |script| script.call_void(symbol))
    }

    pub fn call_bool(&mut self, plugin: &mut CompiledPlugin, symbol: &str) -> anyhow::Result<bool> {
        self.guarded(plugin, |script| script.call_bool(symbol))
    }

    /// Run one VM call with timing and the resource ceilings applied.
    /// A limit violation is counted, logged and replaces the call result.
    fn guarded<T>(
        &mut self,
        plugin: &mut CompiledPlugin,
        call: impl FnOnce(&mut Box<dyn CompiledScript>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let started = Instant::now();
        let result = call(&mut plugin.script);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.stats.execution_count += 1;
        self.stats.total_execution_time_ms += elapsed_ms;
        self.stats.last_execution_time_ms = elapsed_ms;

        let used = plugin.script.memory_usage();
        self.stats.peak_memory_usage = self.stats.peak_memory_usage.max(used);

        if elapsed_ms > self.sandbox.cpu_limit_ms {
            self.stats.sandbox_violations += 1;
            return Err(SandboxViolation::CpuLimitExceeded {
                elapsed_ms,
                limit_ms: self.sandbox.cpu_limit_ms,
            }
            .into());
        }
        if used > self.sandbox.memory_limit_bytes {
            self.stats.sandbox_violations += 1;
            return Err(SandboxViolation::MemoryLimitExceeded {
                used,
                limit: self.sandbox.memory_limit_bytes,
            }
            .into());
        }

        result
    }

    /// Gate a VM-initiated file operation against the sandbox patterns.
    /// Allowed operations are counted; denials count as violations.
    pub fn check_file_access(&mut self, path: &str) -> Result<(), SandboxViolation> {
        let denied = !self.sandbox.enable_filesystem_access
            || self
                .sandbox
                .blocked_file_patterns
                .iter()
                .any(|pattern| pattern_matches(pattern, path))
            || !(self.sandbox.allowed_file_patterns.is_empty()
                || self
                    .sandbox
                    .allowed_file_patterns
                    .iter()
                    .any(|pattern| pattern_matches(pattern, path)));

        if denied {
            self.stats.sandbox_violations += 1;
            return Err(SandboxViolation::FileAccessDenied(path.to_string()));
        }
        self.stats.file_operations_count += 1;
        Ok(())
    }

    pub fn check_network_access(&mut self) -> Result<(), SandboxViolation> {
        if !self.sandbox.enable_network_access {
            self.stats.sandbox_violations += 1;
            return Err(SandboxViolation::NetworkAccessDenied);
        }
        self.stats.network_requests_count += 1;
        Ok(())
    }

    /// Tear the host down. Safe to call more than once.
    pub fn deinit(&mut self) {
        if self.deinitialized {
            return;
        }
        self.deinitialized = true;
    }

    pub fn is_deinitialized(&self) -> bool {
        self.deinitialized
    }
}

/// `prefix*` matches any path starting with `prefix`; a plain pattern
/// matches the exact path or anything below it as a directory.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    path == pattern || path.starts_with(&format!("{}/", pattern.trim_end_matches('/')))
}

/// A stand-in VM backend. It "compiles" a line-oriented directive script:
///
/// ```text
/// command <name> <handler> [description...]
/// keymap <keys> <handler>
/// event <event_name> <handler>
/// theme <name>
/// message <text...>
/// bool <symbol> <true|false>
/// fail <symbol>
/// slow <symbol> <millis>
/// memory <bytes>
/// ```
///
/// Every invoked symbol is recorded, which is what the tests assert on.
#[derive(Default)]
pub struct NullVm {
    calls: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl NullVm {
    pub fn new() -> Self {
        Self::default()
    }

    /// A VM writing into an existing call log, so several VM instances
    /// (one per plugin host) can share one observable log.
    pub fn with_log(calls: std::sync::Arc<std::sync::Mutex<Vec<String>>>) -> Self {
        Self { calls }
    }

    /// The shared call log; survives the VM moving into a host.
    pub fn calls(&self) -> std::sync::Arc<std::sync::Mutex<Vec<String>>> {
        self.calls.clone()
    }
}

impl ScriptVm for NullVm {
    fn compile(&mut self, source: &str) -> anyhow::Result<Box<dyn CompiledScript>> {
        let mut script = NullScript {
            calls: self.calls.clone(),
            ..NullScript::default()
        };

        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let mut words = line.split_whitespace();
            let directive = words.next().unwrap_or_default();
            let rest: Vec<&str> = words.collect();
            match (directive, rest.as_slice()) {
                ("command", [name, handler, description @ ..]) => {
                    script.setup.push(SetupAction::Command(CommandAction {
                        name: name.to_string(),
                        handler: handler.to_string(),
                        description: description.join(" "),
                    }));
                }
                ("keymap", [keys, handler]) => {
                    script.setup.push(SetupAction::Keymap(KeymapAction {
                        keys: keys.to_string(),
                        handler: handler.to_string(),
                    }));
                }
                ("event", [event, handler]) => {
                    let event = EventType::parse(event)
                        .ok_or_else(|| anyhow::anyhow!("unknown event `{}`", event))?;
                    script.setup.push(SetupAction::Event(EventAction {
                        event,
                        handler: handler.to_string(),
                    }));
                }
                ("theme", [name]) => {
                    script.setup.push(SetupAction::Theme(ThemeAction {
                        name: name.to_string(),
                    }));
                }
                ("message", text) => {
                    script.setup.push(SetupAction::Message(text.join(" ")));
                }
                ("bool", [symbol, value]) => {
                    script
                        .bools
                        .insert(symbol.to_string(), *value == "true");
                }
                ("fail", [symbol]) => {
                    script.fails.push(symbol.to_string());
                }
                ("slow", [symbol, millis]) => {
                    script
                        .slow
                        .insert(symbol.to_string(), millis.parse()?);
                }
                ("memory", [bytes]) => {
                    script.memory = bytes.parse()?;
                }
                _ => anyhow::bail!("unknown directive in line `{}`", line),
            }
        }

        Ok(Box::new(script))
    }
}

enum SetupAction {
    Command(CommandAction),
    Keymap(KeymapAction),
    Event(EventAction),
    Theme(ThemeAction),
    Message(String),
}

#[derive(Default)]
struct NullScript {
    setup: Vec<SetupAction>,
    bools: std::collections::HashMap<String, bool>,
    fails: Vec<String>,
    slow: std::collections::HashMap<String, u64>,
    memory: usize,
    calls: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl NullScript {
    fn enter(&self, symbol: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("call log lock poisoned")
            .push(symbol.to_string());
        if let Some(millis) = self.slow.get(symbol) {
            std::thread::sleep(std::time::Duration::from_millis(*millis));
        }
        if self.fails.iter().any(|fail| fail == symbol) {
            anyhow::bail!("script fault in `{}`", symbol);
        }
        Ok(())
    }
}

impl CompiledScript for NullScript {
    fn execute_setup(&mut self, callbacks: &mut ActionCallbacks) -> anyhow::Result<()> {
        for action in &self.setup {
            match action {
                SetupAction::Command(command) => (callbacks.register_command)(command.clone()),
                SetupAction::Keymap(keymap) => (callbacks.register_keymap)(keymap.clone()),
                SetupAction::Event(event) => (callbacks.register_event_handler)(event.clone()),
                SetupAction::Theme(theme) => (callbacks.register_theme)(theme.clone()),
                SetupAction::Message(text) => (callbacks.show_message)(text),
            }
        }
        Ok(())
    }

    fn call_void(&mut self, symbol: &str) -> anyhow::Result<()> {
        self.enter(symbol)
    }

    fn call_bool(&mut self, symbol: &str) -> anyhow::Result<bool> {
        self.enter(symbol)?;
        Ok(self.bools.get(symbol).copied().unwrap_or(false))
    }

    fn memory_usage(&self) -> usize {
        self.memory
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn collecting_callbacks() -> (ActionCallbacks, Rc<RefCell<Vec<String>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let commands = seen.clone();
        let keymaps = seen.clone();
        let events = seen.clone();
        let themes = seen.clone();
        let messages = seen.clone();
        let callbacks = ActionCallbacks {
            show_message: Box::new(move |text| messages.borrow_mut().push(format!("msg:{}", text))),
            register_command: Box::new(move |action| {
                commands.borrow_mut().push(format!("cmd:{}", action.name))
            }),
            register_keymap: Box::new(move |action| {
                keymaps.borrow_mut().push(format!("key:{}", action.keys))
            }),
            register_event_handler: Box::new(move |action| {
                events
                    .borrow_mut()
                    .push(format!("event:{}", action.event.as_str()))
            }),
            register_theme: Box::new(move |action| {
                themes.borrow_mut().push(format!("theme:{}", action.name))
            }),
        };
        (callbacks, seen)
    }

    #[test]
    fn test_setup_registers_actions() {
        let vm = NullVm::new();
        let mut host = PluginHost::new(Box::new(vm));
        let mut plugin = host
            .compile(
                "command greet on_greet Say hello\n\
                 keymap <C-g> on_key\n\
                 event text_changed on_text\n\
                 theme midnight\n\
                 message loaded\n",
            )
            .unwrap();

        let (mut callbacks, seen) = collecting_callbacks();
        host.execute_setup(&mut plugin, &mut callbacks).unwrap();

        assert_eq!(
            seen.borrow().as_slice(),
            &[
                "cmd:greet",
                "key:<C-g>",
                "event:text_changed",
                "theme:midnight",
                "msg:loaded",
            ]
        );
        assert_eq!(host.stats().execution_count, 1);
    }

    #[test]
    fn test_calls_are_recorded_and_timed() {
        let vm = NullVm::new();
        let calls = vm.calls();
        let mut host = PluginHost::new(Box::new(vm));
        let mut plugin = host.compile("bool on_key true\n").unwrap();

        host.call_void(&mut plugin, "on_save").unwrap();
        assert!(host.call_bool(&mut plugin, "on_key").unwrap());
        assert!(!host.call_bool(&mut plugin, "unknown").unwrap());

        assert_eq!(calls.lock().unwrap().as_slice(), &["on_save", "on_key", "unknown"]);
        assert_eq!(host.stats().execution_count, 3);
        assert_eq!(host.stats().sandbox_violations, 0);
    }

    #[test]
    fn test_script_fault_propagates() {
        let mut host = PluginHost::new(Box::new(NullVm::new()));
        let mut plugin = host.compile("fail on_bad\n").unwrap();
        assert!(host.call_void(&mut plugin, "on_bad").is_err());
        // a fault is not a sandbox violation
        assert_eq!(host.stats().sandbox_violations, 0);
    }

    #[test]
    fn test_cpu_limit_violation() {
        let sandbox = SandboxConfig {
            cpu_limit_ms: 5,
            ..SandboxConfig::default()
        };
        let mut host = PluginHost::with_sandbox(Box::new(NullVm::new()), sandbox);
        let mut plugin = host.compile("slow on_slow 30\n").unwrap();

        let err = host.call_void(&mut plugin, "on_slow").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SandboxViolation>(),
            Some(SandboxViolation::CpuLimitExceeded { .. })
        ));
        assert_eq!(host.stats().sandbox_violations, 1);
        assert!(host.stats().last_execution_time_ms >= 30);
    }

    #[test]
    fn test_memory_limit_violation() {
        let sandbox = SandboxConfig {
            memory_limit_bytes: 1024,
            ..SandboxConfig::default()
        };
        let mut host = PluginHost::with_sandbox(Box::new(NullVm::new()), sandbox);
        let mut plugin = host.compile("memory 4096\n").unwrap();

        let err = host.call_void(&mut plugin, "anything").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SandboxViolation>(),
            Some(SandboxViolation::MemoryLimitExceeded { used: 4096, .. })
        ));
        assert_eq!(host.stats().peak_memory_usage, 4096);
        assert_eq!(host.stats().sandbox_violations, 1);
    }

    #[test]
    fn test_file_access_gating() {
        let sandbox = SandboxConfig {
            enable_filesystem_access: true,
            allowed_file_patterns: vec!["/tmp/grim/*".to_string()],
            blocked_file_patterns: vec!["/tmp/grim/secrets*".to_string()],
            ..SandboxConfig::default()
        };
        let mut host = PluginHost::with_sandbox(Box::new(NullVm::new()), sandbox);

        assert!(host.check_file_access("/tmp/grim/notes.txt").is_ok());
        assert_eq!(
            host.check_file_access("/etc/passwd"),
            Err(SandboxViolation::FileAccessDenied("/etc/passwd".to_string()))
        );
        assert_eq!(
            host.check_file_access("/tmp/grim/secrets.db"),
            Err(SandboxViolation::FileAccessDenied(
                "/tmp/grim/secrets.db".to_string()
            ))
        );
        assert_eq!(host.stats().file_operations_count, 1);
        assert_eq!(host.stats().sandbox_violations, 2);

        let mut closed = PluginHost::new(Box::new(NullVm::new()));
        assert!(closed.check_file_access("/anything").is_err());
    }

    #[test]
    fn test_network_access_gating() {
        let mut host = PluginHost::new(Box::new(NullVm::new()));
        assert_eq!(
            host.check_network_access(),
            Err(SandboxViolation::NetworkAccessDenied)
        );

        let sandbox = SandboxConfig {
            enable_network_access: true,
            ..SandboxConfig::default()
        };
        let mut host = PluginHost::with_sandbox(Box::new(NullVm::new()), sandbox);
        assert!(host.check_network_access().is_ok());
        assert_eq!(host.stats().network_requests_count, 1);
    }

    #[test]
    fn test_deinit_is_idempotent() {
        let mut host = PluginHost::new(Box::new(NullVm::new()));
        assert!(!host.is_deinitialized());
        host.deinit();
        host.deinit();
        assert!(host.is_deinitialized());
    }

    #[test]
    fn test_unknown_directive_fails_compile() {
        let mut host = PluginHost::new(Box::new(NullVm::new()));
        assert!(host.compile("explode everything\n").is_err());
    }
}
