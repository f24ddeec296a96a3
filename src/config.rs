//! Configuration snapshots read by the dispatcher.
//!
//! Settings come from `settings.toml`, actions and triggers from
//! `actions.json`, both under the wbridge config directory. Missing or
//! malformed files degrade to defaults. The live snapshot is an
//! atomically-swapped `Arc`: readers take one consistent snapshot per
//! request, reload builds a new snapshot and replaces the reference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::warn;

use crate::actions::Action;

/// Nested `section -> key -> value` map used for `{config.section.key}`
/// placeholder expansion.
pub type SettingsMap = HashMap<String, HashMap<String, String>>;

const SETTINGS_FILENAME: &str = "settings.toml";
const ACTIONS_FILENAME: &str = "actions.json";

/// Application settings with defaults overlaid by the settings file.
#[derive(Debug, Clone)]
pub struct Settings {
    map: SettingsMap,
}

impl Default for Settings {
    fn default() -> Self {
        let mut map = SettingsMap::new();
        let general = map.entry("general".to_string()).or_default();
        general.insert("history_max".to_string(), "50".to_string());
        general.insert("poll_interval_ms".to_string(), "300".to_string());
        let integration = map.entry("integration".to_string()).or_default();
        integration.insert("http_trigger_enabled".to_string(), "false".to_string());
        integration.insert(
            "http_trigger_base_url".to_string(),
            "http://127.0.0.1:18081".to_string(),
        );
        integration.insert(
            "http_trigger_health_path".to_string(),
            "/health".to_string(),
        );
        integration.insert(
            "http_trigger_trigger_path".to_string(),
            "/trigger".to_string(),
        );
        Self { map }
    }
}

impl Settings {
    /// Parse a TOML document into the flat section/key map, on top of the
    /// defaults. Non-string scalars are coerced to their string form.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let value: toml::Value = text.parse()?;
        let mut settings = Settings::default();
        if let toml::Value::Table(table) = value {
            for (section, entry) in table {
                if let toml::Value::Table(kv) = entry {
                    let target = settings.map.entry(section).or_default();
                    for (key, v) in kv {
                        target.insert(key, toml_value_to_string(&v));
                    }
                }
            }
        }
        Ok(settings)
    }

    /// Load from disk; a missing or malformed file yields the defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match Self::from_toml_str(&text) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("ignoring malformed settings file {:?}: {e}", path);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.map.get(section)?.get(key).map(String::as_str)
    }

    pub fn get_usize(&self, section: &str, key: &str, fallback: usize) -> usize {
        self.get(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(fallback)
    }

    pub fn get_u64(&self, section: &str, key: &str, fallback: u64) -> u64 {
        self.get(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(fallback)
    }

    pub fn get_bool(&self, section: &str, key: &str, fallback: bool) -> bool {
        self.get(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(fallback)
    }

    pub fn as_map(&self) -> &SettingsMap {
        &self.map
    }
}

fn toml_value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Actions and their trigger aliases, loaded from the actions file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionsConfig {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub triggers: HashMap<String, String>,
}

impl ActionsConfig {
    /// Load from disk; a missing or malformed file yields the empty config.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return ActionsConfig::default();
        };
        match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring malformed actions file {:?}: {e}", path);
                ActionsConfig::default()
            }
        }
    }

    /// Look an action up by its unique name.
    pub fn find(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// One consistent view of settings + actions + triggers.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub settings: Settings,
    pub actions: ActionsConfig,
}

impl ConfigSnapshot {
    pub fn load_from(settings_path: &Path, actions_path: &Path) -> Self {
        Self {
            settings: Settings::load(settings_path),
            actions: ActionsConfig::load(actions_path),
        }
    }
}

/// Shared, reloadable configuration. Readers clone the current `Arc`;
/// `reload` swaps in a freshly built snapshot.
pub struct SharedConfig {
    inner: RwLock<Arc<ConfigSnapshot>>,
    settings_path: PathBuf,
    actions_path: PathBuf,
}

impl SharedConfig {
    pub fn from_dir(dir: &Path) -> Self {
        let settings_path = dir.join(SETTINGS_FILENAME);
        let actions_path = dir.join(ACTIONS_FILENAME);
        let snapshot = ConfigSnapshot::load_from(&settings_path, &actions_path);
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
            settings_path,
            actions_path,
        }
    }

    /// Wrap a fixed snapshot. Used by tests; `reload` would rebuild from the
    /// (empty) paths and therefore yield defaults.
    pub fn with_snapshot(snapshot: ConfigSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
            settings_path: PathBuf::new(),
            actions_path: PathBuf::new(),
        }
    }

    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.inner.read().unwrap().clone()
    }

    pub fn replace(&self, snapshot: ConfigSnapshot) {
        *self.inner.write().unwrap() = Arc::new(snapshot);
    }

    pub fn reload(&self) {
        self.replace(ConfigSnapshot::load_from(
            &self.settings_path,
            &self.actions_path,
        ));
    }
}
