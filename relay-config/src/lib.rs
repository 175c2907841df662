// Configuration management for the webhook relay

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{ENV_PREFIX, RelaySettings};
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Layered key/value configuration.
///
/// Each `load_*` call overlays its keys on top of what is already present,
/// so the call order is the precedence order.
#[derive(Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Map<String, Value>>>,
    env_prefix: String,
}

impl ConfigManager {
    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::new(RwLock::new(Map::new())),
            env_prefix: prefix.into(),
        }
    }

    /// Overlay every field of a serializable struct, typically the defaults.
    pub fn load_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        match serde_json::to_value(value).map_err(|e| ConfigError::Conversion(e.to_string()))? {
            Value::Object(map) => {
                self.merge(map);
                Ok(())
            }
            _ => Err(ConfigError::Conversion(
                "settings must serialize to an object".to_string(),
            )),
        }
    }

    /// Overlay prefixed variables from the process environment
    pub fn load_env(&self) -> Result<()> {
        self.load_env_from(std::env::vars())
    }

    /// Overlay prefixed variables from an explicit list
    pub fn load_env_from<I>(&self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let loaded = EnvLoader::new(self.env_prefix.clone()).load_from(vars);
        self.merge_raw(loaded);
        Ok(())
    }

    /// Read a `.env` file into the process environment, then overlay variables.
    ///
    /// A missing default `.env` is not an error; a missing explicit path is.
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::Dotenv(e.to_string()))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    /// Overlay a settings file; the format comes from its extension
    pub fn load_file(&self, path: &Path) -> Result<()> {
        let loader = ConfigLoader::auto(path)?;
        let Value::Object(map) = loader.load_file(path)? else {
            return Ok(());
        };
        if loader.format() == FileFormat::Env {
            self.merge_raw(map.into_iter().filter_map(|(key, value)| match value {
                Value::String(raw) => Some((key, raw)),
                _ => None,
            }));
        } else {
            self.merge(map);
        }
        Ok(())
    }

    /// Set a configuration value
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value =
            serde_json::to_value(value).map_err(|e| ConfigError::Conversion(e.to_string()))?;
        self.config.write().insert(key.to_string(), json_value);
        Ok(())
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let config = self.config.read();
        let value = config
            .get(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value.clone()).map_err(|e| ConfigError::invalid(key, e.to_string()))
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        self.config.read().contains_key(key)
    }

    /// Deserialize the whole map into `T` and validate it
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let snapshot = Value::Object(self.config.read().clone());
        let validated: T =
            serde_json::from_value(snapshot).map_err(|e| ConfigError::Conversion(e.to_string()))?;
        validated.validate()?;
        Ok(validated)
    }

    /// Overlay untyped text values, each converted to the type it replaces
    fn merge_raw(&self, entries: impl IntoIterator<Item = (String, String)>) {
        let mut config = self.config.write();
        for (key, raw) in entries {
            let value = env::coerce(&raw, config.get(&key));
            config.insert(key, value);
        }
    }

    fn merge(&self, entries: Map<String, Value>) {
        let mut config = self.config.write();
        for (key, value) in entries {
            config.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let manager = ConfigManager::with_prefix("TEST");
        manager.set("port", 8080).unwrap();

        let value: u16 = manager.get("port").unwrap();
        assert_eq!(value, 8080);
        assert!(manager.has("port"));
        assert!(!manager.has("host"));
    }

    #[test]
    fn test_missing_key() {
        let manager = ConfigManager::with_prefix("TEST");
        assert!(matches!(
            manager.get::<String>("missing"),
            Err(ConfigError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_later_layers_win() {
        let manager = ConfigManager::with_prefix("TEST");
        manager.set("port", 1).unwrap();
        manager
            .load_env_from(vec![("TEST_PORT".to_string(), "2".to_string())])
            .unwrap();

        assert_eq!(manager.get::<u16>("port").unwrap(), 2);
    }

    #[test]
    fn test_dotenv_style_file_keeps_text_settings() {
        use std::io::Write;

        let manager = ConfigManager::with_prefix("TEST");
        manager.set("port", 1).unwrap();
        manager.set("name", "relay").unwrap();

        let mut file = tempfile::Builder::new().suffix(".env").tempfile().unwrap();
        writeln!(file, "PORT=8080\nNAME=2024").unwrap();
        manager.load_file(file.path()).unwrap();

        assert_eq!(manager.get::<u16>("port").unwrap(), 8080);
        assert_eq!(manager.get::<String>("name").unwrap(), "2024");
    }

    #[test]
    fn test_wrong_type_reports_field() {
        let manager = ConfigManager::with_prefix("TEST");
        manager.set("port", "eighty").unwrap();

        match manager.get::<u16>("port") {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "port"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
