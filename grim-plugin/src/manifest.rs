//! Plugin manifests: the TOML and JSON on-disk forms plus the embedded
//! comment-header form used by standalone scripts. Unknown keys are
//! ignored in every form.

use std::path::PathBuf;

use serde::Deserialize;

use crate::PluginError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PluginPermissions {
    #[serde(default)]
    pub file_system_access: bool,
    #[serde(default)]
    pub network_access: bool,
    #[serde(default)]
    pub system_calls: bool,
    #[serde(default)]
    pub editor_full_access: bool,
    #[serde(default)]
    pub allowed_directories: Vec<String>,
    #[serde(default)]
    pub blocked_directories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    /// Entry point relative to the plugin directory (TOML key `main`).
    pub entry_point: String,
    pub license: Option<String>,
    pub homepage: Option<String>,
    pub min_grim_version: Option<String>,

    pub enable_on_startup: bool,
    pub lazy_load: bool,
    pub load_after: Vec<String>,
    pub priority: u8,

    pub requires: Vec<String>,
    pub optional: Vec<String>,
    pub conflicts: Vec<String>,

    pub auto_optimize: bool,
    pub hot_functions: Vec<String>,
    pub compile_on_install: bool,

    pub native_library: Option<PathBuf>,
    pub native_functions: Vec<String>,

    pub permissions: PluginPermissions,
}

// the raw serde shape shared by the TOML and JSON forms
#[derive(Deserialize)]
struct RawManifest {
    plugin: RawPlugin,
    #[serde(default)]
    config: RawConfig,
    #[serde(default)]
    dependencies: RawDependencies,
    #[serde(default)]
    optimize: RawOptimize,
    #[serde(default)]
    native: Option<RawNative>,
    #[serde(default)]
    permissions: Option<PluginPermissions>,
}

#[derive(Deserialize)]
struct RawPlugin {
    name: String,
    version: String,
    author: String,
    description: String,
    #[serde(alias = "entry_point")]
    main: String,
    license: Option<String>,
    homepage: Option<String>,
    min_grim_version: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    enable_on_startup: bool,
    #[serde(default)]
    lazy_load: bool,
    #[serde(default)]
    load_after: Vec<String>,
    #[serde(default)]
    priority: u8,
}

#[derive(Deserialize, Default)]
struct RawDependencies {
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    optional: Vec<String>,
    #[serde(default)]
    conflicts: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawOptimize {
    #[serde(default)]
    auto_optimize: bool,
    #[serde(default)]
    hot_functions: Vec<String>,
    #[serde(default)]
    compile_on_install: bool,
}

#[derive(Deserialize)]
struct RawNative {
    library: PathBuf,
    #[serde(default)]
    functions: Vec<String>,
}

impl PluginManifest {
    pub fn from_toml(source: &str) -> Result<Self, PluginError> {
        let raw: RawManifest = toml::from_str(source)
            .map_err(|err| PluginError::InvalidPluginFormat(err.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_json(source: &str) -> Result<Self, PluginError> {
        let raw: RawManifest = serde_json::from_str(source)
            .map_err(|err| PluginError::InvalidPluginFormat(err.to_string()))?;
        Self::from_raw(raw)
    }

    /// Parse the `// @plugin-*:` header of a standalone script. The entry
    /// point is the script itself, so `entry_point` stays empty until
    /// discovery fills in the file name.
    pub fn from_embedded_comments(source: &str) -> Result<Self, PluginError> {
        let mut id = None;
        let mut name = None;
        let mut version = None;
        let mut author = None;
        let mut description = None;

        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(comment) = line.strip_prefix("//") else {
                break; // the header ends at the first non-comment line
            };
            let comment = comment.trim();
            if let Some(value) = comment.strip_prefix("@plugin-id:") {
                id = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@plugin-name:") {
                name = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@plugin-version:") {
                version = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@plugin-author:") {
                author = Some(value.trim().to_string());
            } else if let Some(value) = comment.strip_prefix("@plugin-description:") {
                description = Some(value.trim().to_string());
            }
        }

        let name = id
            .or(name)
            .ok_or_else(|| PluginError::InvalidPluginFormat("missing @plugin-id".to_string()))?;
        let version = version.ok_or_else(|| {
            PluginError::InvalidPluginFormat("missing @plugin-version".to_string())
        })?;

        Ok(Self {
            name,
            version,
            author: author.unwrap_or_default(),
            description: description.unwrap_or_default(),
            entry_point: String::new(),
            license: None,
            homepage: None,
            min_grim_version: None,
            enable_on_startup: false,
            lazy_load: false,
            load_after: Vec::new(),
            priority: 0,
            requires: Vec::new(),
            optional: Vec::new(),
            conflicts: Vec::new(),
            auto_optimize: false,
            hot_functions: Vec::new(),
            compile_on_install: false,
            native_library: None,
            native_functions: Vec::new(),
            permissions: PluginPermissions::default(),
        })
    }

    fn from_raw(raw: RawManifest) -> Result<Self, PluginError> {
        for (field, value) in [
            ("name", &raw.plugin.name),
            ("version", &raw.plugin.version),
            ("author", &raw.plugin.author),
            ("description", &raw.plugin.description),
            ("main", &raw.plugin.main),
        ] {
            if value.trim().is_empty() {
                return Err(PluginError::InvalidPluginFormat(format!(
                    "empty required field `{}`",
                    field
                )));
            }
        }

        let (native_library, native_functions) = match raw.native {
            Some(native) => (Some(native.library), native.functions),
            None => (None, Vec::new()),
        };

        Ok(Self {
            name: raw.plugin.name,
            version: raw.plugin.version,
            author: raw.plugin.author,
            description: raw.plugin.description,
            entry_point: raw.plugin.main,
            license: raw.plugin.license,
            homepage: raw.plugin.homepage,
            min_grim_version: raw.plugin.min_grim_version,
            enable_on_startup: raw.config.enable_on_startup,
            lazy_load: raw.config.lazy_load,
            load_after: raw.config.load_after,
            priority: raw.config.priority,
            requires: raw.dependencies.requires,
            optional: raw.dependencies.optional,
            conflicts: raw.dependencies.conflicts,
            auto_optimize: raw.optimize.auto_optimize,
            hot_functions: raw.optimize.hot_functions,
            compile_on_install: raw.optimize.compile_on_install,
            native_library,
            native_functions,
            permissions: raw.permissions.unwrap_or_default(),
        })
    }
}
