use std::path::PathBuf;

use log::warn;
use serde_json::{json, Map, Value};

use crate::errors::{AppError, Result};

/// Flat key/value settings document backed by a JSON file. Values are
/// free-form; keys the backend never heard of round-trip untouched so the
/// UI can keep its own state in here. Every write persists immediately.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl SettingsStore {
    pub fn load() -> Result<Self> {
        Ok(Self::load_from(Self::default_path()?))
    }

    pub fn load_from(path: PathBuf) -> Self {
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Map<String, Value>>(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!("Settings file {:?} is unreadable ({}), using defaults", path, e);
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };

        let mut store = Self { path, values };
        store.fill_defaults();
        store
    }

    /// Fills in missing defaults without touching keys that already exist.
    fn fill_defaults(&mut self) {
        for (key, value) in Self::defaults() {
            self.values.entry(key).or_insert(value);
        }
    }

    pub fn defaults() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("theme".into(), json!("light"));
        map.insert("language".into(), json!("zh-CN"));
        map.insert("notifications".into(), json!(true));
        map.insert("auto_save".into(), json!(false));
        map.insert("recent_files".into(), json!([]));
        map.insert(
            "defaultOutput".into(),
            json!(default_output_dir().to_string_lossy()),
        );
        map
    }

    pub fn all(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Output directory for exports and downloads, from `defaultOutput`.
    pub fn output_dir(&self) -> PathBuf {
        self.get_str("defaultOutput")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_output_dir)
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        self.save()
    }

    /// Bulk update from the UI; one write for the whole batch.
    pub fn merge(&mut self, updates: Map<String, Value>) -> Result<()> {
        for (key, value) in updates {
            self.values.insert(key, value);
        }
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::NotFound("user config directory".to_string()))?;
        Ok(config_dir.join("soniflow").join("settings.json"))
    }
}

fn default_output_dir() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_starts_from_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::load_from(dir.path().join("settings.json"));

        assert_eq!(store.get_str("theme").unwrap(), "light");
        assert_eq!(store.get_str("language").unwrap(), "zh-CN");
        assert_eq!(store.get("notifications"), Some(&json!(true)));
        assert_eq!(store.get("recent_files"), Some(&json!([])));
        assert!(store.get("no_such_key").is_none());
        assert!(store.output_dir().ends_with("output"));
    }

    #[test]
    fn set_persists_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut store = SettingsStore::load_from(path.clone());
        store.set("theme", json!("dark")).unwrap();

        let reloaded = SettingsStore::load_from(path);
        assert_eq!(reloaded.get_str("theme").unwrap(), "dark");
    }

    #[test]
    fn unknown_keys_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"uiPanelLayout": {"left": 240}, "theme": "dark"}"#).unwrap();

        let mut store = SettingsStore::load_from(path.clone());
        store.set("language", json!("en-US")).unwrap();

        let raw: Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["uiPanelLayout"]["left"], json!(240));
        assert_eq!(raw["theme"], json!("dark"));
        assert_eq!(raw["language"], json!("en-US"));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = SettingsStore::load_from(path);
        assert_eq!(store.get_str("theme").unwrap(), "light");
    }

    #[test]
    fn merge_overwrites_and_keeps_the_rest() {
        let dir = tempdir().unwrap();
        let mut store = SettingsStore::load_from(dir.path().join("settings.json"));

        let mut updates = Map::new();
        updates.insert("theme".into(), json!("dark"));
        updates.insert("bilibiliCookies".into(), json!("SESSDATA=abc"));
        store.merge(updates).unwrap();

        assert_eq!(store.get_str("theme").unwrap(), "dark");
        assert_eq!(store.get_str("bilibiliCookies").unwrap(), "SESSDATA=abc");
        assert_eq!(store.get_str("language").unwrap(), "zh-CN");
    }
}
