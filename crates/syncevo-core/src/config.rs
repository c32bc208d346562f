//! Configuration module for SyncEvolution.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, saving, validation, defaults, and a builder pattern for
//! programmatic use. Server configurations can also be converted to and from
//! the flat `(source, key, value)` option list used on the bus.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, SyncMode};

/// Top-level configuration for SyncEvolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub logging: LoggingConfig,
    pub reports: ReportsConfig,
    /// Configured servers by name.
    pub servers: BTreeMap<String, ServerConfig>,
    /// Server templates by name, offered when creating a configuration.
    pub templates: BTreeMap<String, ServerConfig>,
}

/// Where the service appears on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Well-known name requested by the service.
    pub service_name: String,
    /// Object path of the server object.
    pub object_path: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

/// Sync report retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Maximum number of reports kept across all servers.
    pub max_reports: u32,
}

/// Settings of one SyncML server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub sync_url: String,
    #[serde(default)]
    pub username: String,
    /// Empty means the password is requested when a sync starts.
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Options without a dedicated field, passed through unchanged.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Settings of one local data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database name on the server.
    pub uri: String,
    #[serde(default)]
    pub sync: SyncMode,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// One `(source, key, value)` option; an empty source means server level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEntry {
    pub source: String,
    pub key: String,
    pub value: String,
}

impl ConfigEntry {
    pub fn new(source: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

const KEY_SYNC_URL: &str = "syncURL";
const KEY_USERNAME: &str = "username";
const KEY_PASSWORD: &str = "password";
const KEY_URI: &str = "uri";
const KEY_SYNC: &str = "sync";

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/syncevolution/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("syncevolution")
            .join("config.yaml")
    }

    /// Server configuration by name, falling back to a template.
    pub fn server_or_template(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name).or_else(|| self.templates.get(name))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            logging: LoggingConfig::default(),
            reports: ReportsConfig::default(),
            servers: BTreeMap::new(),
            templates: default_templates(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service_name: "org.syncevolution".to_string(),
            object_path: "/org/syncevolution/Server".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self { max_reports: 10 }
    }
}

fn default_templates() -> BTreeMap<String, ServerConfig> {
    let pim_sources = |contacts: &str, events: &str, tasks: &str, memos: &str| {
        [
            ("addressbook", contacts),
            ("calendar", events),
            ("todo", tasks),
            ("memo", memos),
        ]
        .into_iter()
        .map(|(name, uri)| (name.to_string(), SourceConfig::new(uri, SyncMode::TwoWay)))
        .collect()
    };

    let mut templates = BTreeMap::new();
    templates.insert(
        "scheduleworld".to_string(),
        ServerConfig {
            sync_url: "http://sync.scheduleworld.com/funambol/ds".to_string(),
            sources: pim_sources("card3", "cal2", "task2", "note"),
            ..ServerConfig::default()
        },
    );
    templates.insert(
        "funambol".to_string(),
        ServerConfig {
            sync_url: "http://my.funambol.com/sync".to_string(),
            sources: pim_sources("card", "event", "task", "note"),
            ..ServerConfig::default()
        },
    );
    templates
}

impl ServerConfig {
    pub fn new(sync_url: impl Into<String>) -> Self {
        Self {
            sync_url: sync_url.into(),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, name: impl Into<String>, source: SourceConfig) -> Self {
        self.sources.insert(name.into(), source);
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Flattens the configuration into options.
    ///
    /// The password is never reported.
    pub fn to_entries(&self) -> Vec<ConfigEntry> {
        let mut entries = vec![
            ConfigEntry::new("", KEY_SYNC_URL, &self.sync_url),
            ConfigEntry::new("", KEY_USERNAME, &self.username),
        ];
        entries.extend(
            self.options
                .iter()
                .map(|(key, value)| ConfigEntry::new("", key, value)),
        );
        for (name, source) in &self.sources {
            entries.push(ConfigEntry::new(name, KEY_URI, &source.uri));
            entries.push(ConfigEntry::new(name, KEY_SYNC, source.sync.as_str()));
            entries.extend(
                source
                    .options
                    .iter()
                    .map(|(key, value)| ConfigEntry::new(name, key, value)),
            );
        }
        entries
    }

    /// Builds a configuration from options; unknown keys are kept as-is.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a ConfigEntry>,
    ) -> Result<Self, DomainError> {
        let mut config = ServerConfig::default();
        for entry in entries {
            if entry.key.is_empty() {
                return Err(DomainError::InvalidOption {
                    key: entry.source.clone(),
                    message: "empty key".to_string(),
                });
            }
            if entry.source.is_empty() {
                match entry.key.as_str() {
                    KEY_SYNC_URL => config.sync_url = entry.value.clone(),
                    KEY_USERNAME => config.username = entry.value.clone(),
                    KEY_PASSWORD => config.password = entry.value.clone(),
                    _ => {
                        config.options.insert(entry.key.clone(), entry.value.clone());
                    }
                }
                continue;
            }

            let source = config.sources.entry(entry.source.clone()).or_default();
            match entry.key.as_str() {
                KEY_URI => source.uri = entry.value.clone(),
                KEY_SYNC => {
                    source.sync = entry.value.parse().map_err(|err: DomainError| {
                        DomainError::InvalidOption {
                            key: format!("{}/{}", entry.source, entry.key),
                            message: err.to_string(),
                        }
                    })?;
                }
                _ => {
                    source.options.insert(entry.key.clone(), entry.value.clone());
                }
            }
        }
        Ok(config)
    }

    /// Sources that take part in a sync, with their configured mode.
    pub fn enabled_sources(&self) -> impl Iterator<Item = (&str, SyncMode)> {
        self.sources
            .iter()
            .filter(|(_, source)| source.sync.is_enabled())
            .map(|(name, source)| (name.as_str(), source.sync))
    }
}

impl SourceConfig {
    pub fn new(uri: impl Into<String>, sync: SyncMode) -> Self {
        Self {
            uri: uri.into(),
            sync,
            options: BTreeMap::new(),
        }
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"reports.max_reports"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- bus ---
        let elements: Vec<&str> = self.bus.service_name.split('.').collect();
        if elements.len() < 2 || elements.iter().any(|e| e.is_empty()) {
            errors.push(ValidationError {
                field: "bus.service_name".into(),
                message: format!(
                    "'{}' is not a well-known bus name",
                    self.bus.service_name
                ),
            });
        }
        if !self.bus.object_path.starts_with('/') {
            errors.push(ValidationError {
                field: "bus.object_path".into(),
                message: "must start with '/'".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- reports ---
        if self.reports.max_reports == 0 {
            errors.push(ValidationError {
                field: "reports.max_reports".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- servers / templates ---
        for (section, configs) in [("servers", &self.servers), ("templates", &self.templates)] {
            for (name, server) in configs {
                validate_server(&mut errors, &format!("{section}.{name}"), name, server);
            }
        }

        errors
    }
}

fn validate_server(errors: &mut Vec<ValidationError>, field: &str, name: &str, server: &ServerConfig) {
    if name.is_empty() || name.contains('/') {
        errors.push(ValidationError {
            field: field.to_string(),
            message: "name must be non-empty and must not contain '/'".into(),
        });
    }
    if server.sync_url.is_empty() {
        errors.push(ValidationError {
            field: format!("{field}.sync_url"),
            message: "must not be empty".into(),
        });
    }
    for (source, config) in &server.sources {
        if config.sync.is_enabled() && config.uri.is_empty() {
            errors.push(ValidationError {
                field: format!("{field}.sources.{source}.uri"),
                message: "must not be empty for an enabled source".into(),
            });
        }
    }
}

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use syncevo_core::config::{ConfigBuilder, ServerConfig, SourceConfig};
/// use syncevo_core::domain::SyncMode;
///
/// let config = ConfigBuilder::new()
///     .server(
///         "scheduleworld",
///         ServerConfig::new("http://sync.scheduleworld.com/funambol/ds")
///             .with_source("addressbook", SourceConfig::new("card3", SyncMode::TwoWay)),
///     )
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- bus ---

    pub fn bus_service_name(mut self, name: impl Into<String>) -> Self {
        self.config.bus.service_name = name.into();
        self
    }

    pub fn bus_object_path(mut self, path: impl Into<String>) -> Self {
        self.config.bus.object_path = path.into();
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- reports ---

    pub fn reports_max_reports(mut self, n: u32) -> Self {
        self.config.reports.max_reports = n;
        self
    }

    // --- servers ---

    pub fn server(mut self, name: impl Into<String>, server: ServerConfig) -> Self {
        self.config.servers.insert(name.into(), server);
        self
    }

    pub fn template(mut self, name: impl Into<String>, template: ServerConfig) -> Self {
        self.config.templates.insert(name.into(), template);
        self
    }

    pub fn without_templates(mut self) -> Self {
        self.config.templates.clear();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn server() -> ServerConfig {
        ServerConfig::new("http://example.com/sync")
            .with_credentials("alice", "secret")
            .with_source("addressbook", SourceConfig::new("card3", SyncMode::TwoWay))
            .with_source("calendar", SourceConfig::new("cal2", SyncMode::None))
    }

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.bus.service_name, "org.syncevolution");
        assert_eq!(cfg.bus.object_path, "/org/syncevolution/Server");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.reports.max_reports, 10);
        assert!(cfg.servers.is_empty());
        assert!(cfg.templates.contains_key("scheduleworld"));
        assert!(cfg.templates.contains_key("funambol"));
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
bus:
  service_name: org.example.Sync
  object_path: /org/example/Sync
logging:
  level: debug
reports:
  max_reports: 3
servers:
  scheduleworld:
    sync_url: http://sync.scheduleworld.com/funambol/ds
    username: alice
    sources:
      addressbook:
        uri: card3
        sync: slow
      memo:
        uri: note
        sync: none
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.bus.service_name, "org.example.Sync");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.reports.max_reports, 3);
        let server = &cfg.servers["scheduleworld"];
        assert_eq!(server.username, "alice");
        assert!(server.password.is_empty());
        assert_eq!(server.sources["addressbook"].sync, SyncMode::Slow);
        assert_eq!(
            server.enabled_sources().collect::<Vec<_>>(),
            vec![("addressbook", SyncMode::Slow)]
        );
        // templates were not in the file, defaults apply
        assert!(cfg.templates.contains_key("funambol"));
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(cfg.reports.max_reports, 10);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"servers: [not, a, map").unwrap();
        tmp.flush().unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("nested").join("config.yaml");
        let cfg = ConfigBuilder::new().server("work", server()).build();
        cfg.save(&path).expect("save config");

        let loaded = Config::load(&path).expect("load config");
        assert_eq!(loaded.servers["work"], server());
    }

    // -- Validation --

    #[test]
    fn validate_catches_invalid_log_level() {
        let cfg = ConfigBuilder::new().logging_level("verbose").build();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validate_catches_zero_max_reports() {
        let cfg = ConfigBuilder::new().reports_max_reports(0).build();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "reports.max_reports"));
    }

    #[test]
    fn validate_catches_bad_bus_settings() {
        let cfg = ConfigBuilder::new()
            .bus_service_name("syncevolution")
            .bus_object_path("org/syncevolution")
            .build();
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"bus.service_name".to_string()));
        assert!(fields.contains(&"bus.object_path".to_string()));
    }

    #[test]
    fn validate_catches_incomplete_server() {
        let broken = ServerConfig::new("")
            .with_source("addressbook", SourceConfig::new("", SyncMode::TwoWay))
            .with_source("memo", SourceConfig::new("", SyncMode::None));
        let cfg = ConfigBuilder::new().server("work", broken).build();
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "servers.work.sync_url".to_string(),
                "servers.work.sources.addressbook.uri".to_string(),
            ]
        );
    }

    #[test]
    fn validate_reports_all_errors() {
        let cfg = ConfigBuilder::new()
            .logging_level("loud")
            .reports_max_reports(0)
            .build();
        assert_eq!(cfg.validate().len(), 2);
    }

    // -- Builder --

    #[test]
    fn builder_build_validated_succeeds_for_valid_config() {
        let result = ConfigBuilder::new().server("work", server()).build_validated();
        assert!(result.is_ok());
    }

    #[test]
    fn builder_build_validated_fails_for_invalid_config() {
        let errors = ConfigBuilder::new()
            .server("a/b", server())
            .build_validated()
            .unwrap_err();
        assert_eq!(errors[0].field, "servers.a/b");
    }

    #[test]
    fn builder_without_templates() {
        let cfg = ConfigBuilder::new().without_templates().build();
        assert!(cfg.templates.is_empty());
        assert!(cfg.server_or_template("scheduleworld").is_none());
    }

    // -- Options --

    #[test]
    fn entries_hide_password() {
        let entries = server().to_entries();
        assert!(entries.iter().all(|e| e.key != "password"));
        assert!(entries.contains(&ConfigEntry::new("", "syncURL", "http://example.com/sync")));
        assert!(entries.contains(&ConfigEntry::new("addressbook", "uri", "card3")));
        assert!(entries.contains(&ConfigEntry::new("calendar", "sync", "none")));
    }

    #[test]
    fn entries_convert_back() {
        let mut original = server();
        original.options.insert("loglevel".to_string(), "3".to_string());
        let mut entries = original.to_entries();
        entries.push(ConfigEntry::new("", "password", "secret"));

        let restored = ServerConfig::from_entries(&entries).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn entries_reject_bad_sync_mode() {
        let entries = [ConfigEntry::new("addressbook", "sync", "sideways")];
        let err = ServerConfig::from_entries(&entries).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidOption { ref key, .. } if key == "addressbook/sync"
        ));
    }
}
