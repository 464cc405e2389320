//! Plugin discovery, lifecycle and action bindings.
//!
//! The manager walks the configured plugin directories, validates
//! permissions, builds a sandboxed host per plugin, drives setup, and owns
//! the command/keymap/event-handler binding tables that route editor
//! activity back into plugin code. One misbehaving plugin is logged and
//! isolated; it never stops the editor or its neighbours.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use grim_event::{EventType, PluginId};

use crate::graph::{matches_requirement, DependencyGraph};
use crate::host::{
    ActionCallbacks, CommandAction, CompiledPlugin, EventAction, KeymapAction, PluginHost,
    SandboxConfig, ScriptVm, ThemeAction,
};
use crate::manifest::PluginManifest;
use crate::native::NativePlugin;
use crate::security::{self, SecurityPolicy};
use crate::{ExecutionStats, PluginError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Script,
    Native,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    pub plugin_dir: PathBuf,
    pub script_path: Option<PathBuf>,
    pub kind: PluginKind,
}

struct LoadedPlugin {
    id: PluginId,
    manifest: PluginManifest,
    plugin_dir: PathBuf,
    script_path: Option<PathBuf>,
    kind: PluginKind,
    host: PluginHost,
    compiled: Option<CompiledPlugin>,
    native: Option<NativePlugin>,
    policy: SecurityPolicy,
}

struct CommandBinding {
    plugin_id: PluginId,
    name: String,
    handler: String,
    #[allow(dead_code)]
    description: String,
}

struct KeymapBinding {
    plugin_id: PluginId,
    keys: String,
    handler: String,
}

struct EventBinding {
    plugin_id: PluginId,
    event: EventType,
    handler: String,
}

enum Registration {
    Command(CommandAction),
    Keymap(KeymapAction),
    Event(EventAction),
    Theme(ThemeAction),
    Message(String),
}

pub type VmFactory = Box<dyn Fn() -> Box<dyn ScriptVm>>;

pub struct PluginManager {
    search_dirs: Vec<PathBuf>,
    vm_factory: VmFactory,
    plugins: HashMap<String, LoadedPlugin>,
    next_plugin_id: PluginId,
    commands: Vec<CommandBinding>,
    keymaps: Vec<KeymapBinding>,
    event_handlers: Vec<EventBinding>,
    themes: Vec<(PluginId, String)>,
    theme_callback: Option<Box<dyn FnMut(&str)>>,
    message_callback: Option<Box<dyn FnMut(&str)>>,
    current_command: Option<String>,
}

impl PluginManager {
    pub fn new(vm_factory: VmFactory) -> Self {
        Self::with_dirs(vm_factory, crate::paths::default_plugin_dirs())
    }

    pub fn with_dirs(vm_factory: VmFactory, search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            vm_factory,
            plugins: HashMap::new(),
            next_plugin_id: 1,
            commands: Vec::new(),
            keymaps: Vec::new(),
            event_handlers: Vec::new(),
            themes: Vec::new(),
            theme_callback: None,
            message_callback: None,
            current_command: None,
        }
    }

    pub fn set_theme_callback(&mut self, callback: Box<dyn FnMut(&str)>) {
        self.theme_callback = Some(callback);
    }

    pub fn set_message_callback(&mut self, callback: Box<dyn FnMut(&str)>) {
        self.message_callback = Some(callback);
    }

    /// Walk the search directories. Plugins found in earlier directories
    /// win on id conflicts; malformed plugins are logged and skipped.
    pub fn discover(&self) -> Vec<DiscoveredPlugin> {
        let mut found: Vec<DiscoveredPlugin> = Vec::new();
        for dir in &self.search_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut entries: Vec<_> = entries.flatten().collect();
            entries.sort_by_key(|entry| entry.file_name());

            for entry in entries {
                let path = entry.path();
                let discovered = if path.is_dir() {
                    discover_packaged(&path)
                } else {
                    discover_standalone(&path)
                };
                match discovered {
                    Ok(Some(plugin)) => {
                        if found
                            .iter()
                            .any(|other| other.manifest.name == plugin.manifest.name)
                        {
                            log::debug!(
                                "skipping {} at {}: id already provided by an earlier directory",
                                plugin.manifest.name,
                                path.display()
                            );
                        } else {
                            found.push(plugin);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => log::warn!("ignoring plugin at {}: {}", path.display(), err),
                }
            }
        }
        found
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn plugin_id(&self, name: &str) -> Option<PluginId> {
        self.plugins.get(name).map(|plugin| plugin.id)
    }

    pub fn loaded_plugins(&self) -> Vec<&PluginManifest> {
        let mut manifests: Vec<_> = self.plugins.values().collect();
        manifests.sort_by_key(|plugin| plugin.id);
        manifests.into_iter().map(|plugin| &plugin.manifest).collect()
    }

    pub fn stats(&self, name: &str) -> Option<&ExecutionStats> {
        self.plugins.get(name).map(|plugin| plugin.host.stats())
    }

    pub fn policy(&self, name: &str) -> Option<&SecurityPolicy> {
        self.plugins.get(name).map(|plugin| &plugin.policy)
    }

    pub fn script_path(&self, name: &str) -> Option<&Path> {
        self.plugins
            .get(name)?
            .script_path
            .as_deref()
    }

    pub fn load(&mut self, discovered: DiscoveredPlugin) -> Result<PluginId, PluginError> {
        self.load_inner(discovered, None)
    }

    /// Load every discovered plugin in dependency order. Resolution
    /// failures keep only the affected plugins unloaded; version
    /// requirements in `requires` entries (`name ^1.2.3`) are checked
    /// against the dependency actually loaded.
    pub fn load_all(
        &mut self,
        discovered: Vec<DiscoveredPlugin>,
    ) -> Vec<(String, Result<PluginId, PluginError>)> {
        let mut results = Vec::new();
        let mut active = discovered;

        let order = loop {
            let mut graph = DependencyGraph::new();
            for plugin in &active {
                graph.add_plugin(&plugin.manifest.name);
            }
            for plugin in &active {
                for requirement in &plugin.manifest.requires {
                    let (dep, _) = split_requirement(requirement);
                    // a dependency loaded in an earlier round is satisfied,
                    // not missing; give it a free node
                    if self.plugins.contains_key(dep) {
                        graph.add_plugin(dep);
                    }
                    graph.add_dependency(&plugin.manifest.name, dep);
                }
                for after in &plugin.manifest.load_after {
                    // soft ordering: only constrains plugins that exist
                    if active.iter().any(|other| other.manifest.name == *after) {
                        graph.add_dependency(&plugin.manifest.name, after);
                    }
                }
            }

            match graph.resolve() {
                Ok(order) => break order,
                Err(PluginError::MissingDependency(dep, dependent)) => {
                    results.push((
                        dependent.clone(),
                        Err(PluginError::MissingDependency(dep, dependent.clone())),
                    ));
                    active.retain(|plugin| plugin.manifest.name != dependent);
                }
                Err(PluginError::CircularDependency(cycle)) => {
                    let members: Vec<String> = cycle
                        .split(" -> ")
                        .map(str::to_string)
                        .collect();
                    let mut dropped = false;
                    active.retain(|plugin| {
                        if members.contains(&plugin.manifest.name) {
                            results.push((
                                plugin.manifest.name.clone(),
                                Err(PluginError::CircularDependency(cycle.clone())),
                            ));
                            dropped = true;
                            false
                        } else {
                            true
                        }
                    });
                    if !dropped {
                        break Vec::new();
                    }
                }
                Err(err) => {
                    log::error!("dependency resolution failed: {}", err);
                    break Vec::new();
                }
            }
        };

        for name in order {
            let Some(plugin) = active
                .iter()
                .find(|plugin| plugin.manifest.name == name)
                .cloned()
            else {
                continue;
            };

            let mut requirement_error = None;
            for requirement in &plugin.manifest.requires {
                let (dep, constraint) = split_requirement(requirement);
                match self.plugins.get(dep) {
                    None => {
                        requirement_error = Some(PluginError::MissingDependency(
                            dep.to_string(),
                            name.clone(),
                        ));
                        break;
                    }
                    Some(loaded) => {
                        if let Some(constraint) = constraint {
                            if !matches_requirement(&loaded.manifest.version, constraint) {
                                requirement_error = Some(PluginError::PluginLoadFailed(
                                    name.clone(),
                                    format!(
                                        "requires {} {}, found {}",
                                        dep, constraint, loaded.manifest.version
                                    ),
                                ));
                                break;
                            }
                        }
                    }
                }
            }

            let result = match requirement_error {
                Some(err) => Err(err),
                None => self.load(plugin),
            };
            results.push((name, result));
        }
        results
    }

    fn load_inner(
        &mut self,
        discovered: DiscoveredPlugin,
        reuse_id: Option<PluginId>,
    ) -> Result<PluginId, PluginError> {
        let name = discovered.manifest.name.clone();
        if self.plugins.contains_key(&name) {
            return Err(PluginError::PluginAlreadyLoaded(name));
        }
        for conflict in &discovered.manifest.conflicts {
            if self.plugins.contains_key(conflict) {
                return Err(PluginError::PluginLoadFailed(
                    name,
                    format!("conflicts with loaded plugin `{}`", conflict),
                ));
            }
        }
        for dir in discovered
            .manifest
            .permissions
            .allowed_directories
            .iter()
            .chain(&discovered.manifest.permissions.blocked_directories)
        {
            security::validate_path_string(dir)?;
        }

        let policy = SecurityPolicy::from_permissions(&discovered.manifest.permissions);
        let sandbox = SandboxConfig::from_permissions(&discovered.manifest.permissions);
        let mut host = PluginHost::with_sandbox((self.vm_factory)(), sandbox);

        let mut compiled = None;
        if matches!(discovered.kind, PluginKind::Script | PluginKind::Hybrid) {
            let script_path = discovered.script_path.as_ref().ok_or_else(|| {
                PluginError::PluginLoadFailed(name.clone(), "missing entry point".to_string())
            })?;
            let source = std::fs::read_to_string(script_path).map_err(|err| {
                PluginError::PluginLoadFailed(name.clone(), err.to_string())
            })?;
            let artifact = host.compile(&source).map_err(|err| {
                PluginError::PluginLoadFailed(name.clone(), format!("{:#}", err))
            })?;
            compiled = Some(artifact);
        }

        let mut native = None;
        if let Some(library) = &discovered.manifest.native_library {
            security::validate_path_string(&library.to_string_lossy())?;
            let library_path = discovered.plugin_dir.join(library);
            native = Some(NativePlugin::open(
                &library_path,
                &discovered.manifest.native_functions,
            )?);
        }

        let id = reuse_id.unwrap_or_else(|| {
            let id = self.next_plugin_id;
            self.next_plugin_id += 1;
            id
        });
        // setup must be idempotent: drop whatever an earlier init left
        self.unregister_plugin_resources(id);

        if let Some(artifact) = compiled.as_mut() {
            let registrations: Rc<RefCell<Vec<Registration>>> = Rc::new(RefCell::new(Vec::new()));
            let mut callbacks = action_callbacks(&registrations);
            host.execute_setup(artifact, &mut callbacks).map_err(|err| {
                PluginError::PluginLoadFailed(name.clone(), format!("{:#}", err))
            })?;
            drop(callbacks);

            for registration in registrations.take() {
                match registration {
                    Registration::Command(action) => self.commands.push(CommandBinding {
                        plugin_id: id,
                        name: action.name,
                        handler: action.handler,
                        description: action.description,
                    }),
                    Registration::Keymap(action) => self.keymaps.push(KeymapBinding {
                        plugin_id: id,
                        keys: action.keys,
                        handler: action.handler,
                    }),
                    Registration::Event(action) => self.event_handlers.push(EventBinding {
                        plugin_id: id,
                        event: action.event,
                        handler: action.handler,
                    }),
                    Registration::Theme(action) => {
                        if let Some(callback) = &mut self.theme_callback {
                            callback(&action.name);
                        }
                        self.themes.push((id, action.name));
                    }
                    Registration::Message(text) => self.show_message(&text),
                }
            }
        }

        log::info!("loaded plugin {} v{}", name, discovered.manifest.version);
        self.plugins.insert(
            name,
            LoadedPlugin {
                id,
                manifest: discovered.manifest,
                plugin_dir: discovered.plugin_dir,
                script_path: discovered.script_path,
                kind: discovered.kind,
                host,
                compiled,
                native,
                policy,
            },
        );
        Ok(id)
    }

    /// Unload a plugin: best-effort `deinit` in the VM, then drop its
    /// bindings, the compiled artifact, and finally the host.
    pub fn unload(&mut self, name: &str) -> Result<(), PluginError> {
        let mut plugin = self
            .plugins
            .remove(name)
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;

        if let Some(artifact) = plugin.compiled.as_mut() {
            if let Err(err) = plugin.host.call_void(artifact, "deinit") {
                log::debug!("{}: deinit failed: {:#}", name, err);
            }
        }
        self.unregister_plugin_resources(plugin.id);

        // the compiled artifact holds the VM reference cycle; break it
        // before the host goes away
        drop(plugin.compiled.take());
        plugin.host.deinit();
        log::info!("unloaded plugin {}", name);
        Ok(())
    }

    /// Unload, re-read the script from disk, and load again under the same
    /// plugin id, so surviving keymaps and commands point at the new
    /// handlers.
    pub fn reload(&mut self, name: &str) -> Result<PluginId, PluginError> {
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;
        let id = plugin.id;
        let discovered = DiscoveredPlugin {
            manifest: plugin.manifest.clone(),
            plugin_dir: plugin.plugin_dir.clone(),
            script_path: plugin.script_path.clone(),
            kind: plugin.kind,
        };

        self.unload(name)?;
        self.load_inner(discovered, Some(id))
    }

    fn unregister_plugin_resources(&mut self, id: PluginId) {
        self.commands.retain(|binding| binding.plugin_id != id);
        self.keymaps.retain(|binding| binding.plugin_id != id);
        self.event_handlers.retain(|binding| binding.plugin_id != id);
        self.themes.retain(|(plugin_id, _)| *plugin_id != id);
    }

    pub fn command_names(&self) -> Vec<&str> {
        self.commands
            .iter()
            .map(|binding| binding.name.as_str())
            .collect()
    }

    pub fn registered_themes(&self) -> Vec<&str> {
        self.themes.iter().map(|(_, name)| name.as_str()).collect()
    }

    pub fn current_command(&self) -> Option<&str> {
        self.current_command.as_deref()
    }

    /// Invoke a plugin command by name. With duplicate names the latest
    /// registration wins. The command name is exposed to the plugin as the
    /// current command for the duration of the call; handler faults are
    /// logged, not propagated.
    pub fn invoke_command(&mut self, name: &str) -> Result<(), PluginError> {
        let binding = self
            .commands
            .iter()
            .rev()
            .find(|binding| binding.name == name)
            .ok_or_else(|| PluginError::CommandNotFound(name.to_string()))?;
        let plugin_id = binding.plugin_id;
        let handler = binding.handler.clone();

        let previous = self.current_command.take();
        self.current_command = Some(name.to_string());
        if let Err(err) = self.call_plugin_void(plugin_id, &handler) {
            log::error!("command {} failed: {}", name, err);
        }
        self.current_command = previous;
        Ok(())
    }

    /// Offer a keystroke to the registered keymaps in registration order.
    /// A handler returning true consumes the key.
    pub fn handle_key(&mut self, keys: &str) -> bool {
        let matching: Vec<(PluginId, String)> = self
            .keymaps
            .iter()
            .filter(|binding| binding.keys == keys)
            .map(|binding| (binding.plugin_id, binding.handler.clone()))
            .collect();

        for (plugin_id, handler) in matching {
            let Some(plugin) = self
                .plugins
                .values_mut()
                .find(|plugin| plugin.id == plugin_id)
            else {
                continue;
            };
            let Some(artifact) = plugin.compiled.as_mut() else {
                continue;
            };
            match plugin.host.call_bool(artifact, &handler) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => log::error!(
                    "keymap {} of {} failed: {:#}",
                    handler,
                    plugin.manifest.name,
                    err
                ),
            }
        }
        false
    }

    /// Fan an event out to every handler registered for it. Faults are
    /// logged per plugin and never stop delivery to the others.
    pub fn dispatch_event(&mut self, event: EventType) {
        let matching: Vec<(PluginId, String)> = self
            .event_handlers
            .iter()
            .filter(|binding| binding.event == event)
            .map(|binding| (binding.plugin_id, binding.handler.clone()))
            .collect();

        for (plugin_id, handler) in matching {
            if let Err(err) = self.call_plugin_void(plugin_id, &handler) {
                log::error!("{} handler {} failed: {}", event, handler, err);
            }
        }
    }

    fn call_plugin_void(&mut self, plugin_id: PluginId, handler: &str) -> Result<(), String> {
        let Some(plugin) = self
            .plugins
            .values_mut()
            .find(|plugin| plugin.id == plugin_id)
        else {
            return Err(format!("plugin {} is gone", plugin_id));
        };

        if let Some(artifact) = plugin.compiled.as_mut() {
            return plugin
                .host
                .call_void(artifact, handler)
                .map_err(|err| format!("{:#}", err));
        }
        if let Some(native) = &plugin.native {
            return native.call(handler).map_err(|err| err.to_string());
        }
        Err(format!("plugin {} has no callable state", plugin.manifest.name))
    }

    fn show_message(&mut self, text: &str) {
        match &mut self.message_callback {
            Some(callback) => callback(text),
            None => log::info!("{}", text),
        }
    }
}

fn action_callbacks(registrations: &Rc<RefCell<Vec<Registration>>>) -> ActionCallbacks {
    let commands = registrations.clone();
    let keymaps = registrations.clone();
    let events = registrations.clone();
    let themes = registrations.clone();
    let messages = registrations.clone();
    ActionCallbacks {
        show_message: Box::new(move |text| {
            messages
                .borrow_mut()
                .push(Registration::Message(text.to_string()))
        }),
        register_command: Box::new(move |action| {
            commands.borrow_mut().push(Registration::Command(action))
        }),
        register_keymap: Box::new(move |action| {
            keymaps.borrow_mut().push(Registration::Keymap(action))
        }),
        register_event_handler: Box::new(move |action| {
            events.borrow_mut().push(Registration::Event(action))
        }),
        register_theme: Box::new(move |action| {
            themes.borrow_mut().push(Registration::Theme(action))
        }),
    }
}

/// `"name ^1.2.3"` → `("name", Some("^1.2.3"))`; a bare name carries no
/// constraint.
fn split_requirement(requirement: &str) -> (&str, Option<&str>) {
    match requirement.split_once(char::is_whitespace) {
        Some((name, constraint)) => (name.trim(), Some(constraint.trim())),
        None => (requirement.trim(), None),
    }
}

fn discover_packaged(dir: &Path) -> Result<Option<DiscoveredPlugin>, PluginError> {
    let manifest = if dir.join("plugin.toml").is_file() {
        PluginManifest::from_toml(&read_file(&dir.join("plugin.toml"))?)?
    } else if dir.join("plugin.json").is_file() {
        PluginManifest::from_json(&read_file(&dir.join("plugin.json"))?)?
    } else {
        return Ok(None);
    };

    let script_path = dir.join(&manifest.entry_point);
    let has_script = script_path.is_file();
    let kind = match (&manifest.native_library, has_script) {
        (Some(_), true) => PluginKind::Hybrid,
        (Some(_), false) => PluginKind::Native,
        (None, true) => PluginKind::Script,
        (None, false) => {
            return Err(PluginError::InvalidPluginFormat(format!(
                "entry point `{}` not found",
                manifest.entry_point
            )))
        }
    };

    Ok(Some(DiscoveredPlugin {
        manifest,
        plugin_dir: dir.to_path_buf(),
        script_path: has_script.then_some(script_path),
        kind,
    }))
}

fn discover_standalone(path: &Path) -> Result<Option<DiscoveredPlugin>, PluginError> {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(_) => return Ok(None), // not a text file, not a plugin
    };
    if !source
        .lines()
        .take_while(|line| line.trim_start().starts_with("//"))
        .any(|line| line.contains("@plugin-"))
    {
        return Ok(None);
    }

    let mut manifest = PluginManifest::from_embedded_comments(&source)?;
    manifest.entry_point = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Some(DiscoveredPlugin {
        manifest,
        plugin_dir: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
        script_path: Some(path.to_path_buf()),
        kind: PluginKind::Script,
    }))
}

fn read_file(path: &Path) -> Result<String, PluginError> {
    std::fs::read_to_string(path)
        .map_err(|err| PluginError::InvalidPluginFormat(format!("{}: {}", path.display(), err)))
}
