use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use fasc_types::md5_hex;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Environment variable overriding the application home directory.
pub const HOME_ENV: &str = "FASCINATOR_HOME";

pub const DEFAULT_EMAIL: &str = "fascinator@usq.edu.au";

/// Placeholder accepted in configured paths.
const HOME_PLACEHOLDER: &str = "${fascinator.home}";

/// Where a file-system store lives and whose namespace it uses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub home: PathBuf,
    pub email: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            home: app_home().join("storage"),
            email: DEFAULT_EMAIL.to_string(),
        }
    }
}

/// `$FASCINATOR_HOME`, else `.fascinator` in the user's home directory.
pub fn app_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".fascinator"))
        .unwrap_or_else(|| PathBuf::from(".fascinator"))
}

impl StorageConfig {
    pub fn new(home: impl Into<PathBuf>, email: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            email: email.into(),
        }
    }

    /// Per-user namespace directory name: MD5 hex of the email.
    pub fn namespace(&self) -> String {
        md5_hex(&self.email)
    }

    /// Directory that holds the sharded objects.
    pub fn root(&self) -> PathBuf {
        self.home.join(self.namespace())
    }

    /// Parse a flat TOML document with optional `home` and `email` keys.
    pub fn from_toml_str(text: &str) -> StorageResult<Self> {
        let mut config: Self =
            toml::from_str(text).map_err(|e| StorageError::Config(e.to_string()))?;
        config.home = expand_home(&config.home);
        Ok(config)
    }

    /// Parse the JSON system configuration layout:
    ///
    /// ```json
    /// { "email": "...", "storage": { "file-system": { "home": "..." } } }
    /// ```
    pub fn from_json_str(text: &str) -> StorageResult<Self> {
        let layout: JsonLayout =
            serde_json::from_str(text).map_err(|e| StorageError::Config(e.to_string()))?;
        let defaults = Self::default();
        Ok(Self {
            home: layout
                .storage
                .file_system
                .home
                .map(|h| expand_home(&h))
                .unwrap_or(defaults.home),
            email: layout.email.unwrap_or(defaults.email),
        })
    }

    /// Load a configuration file; `.json` files use the JSON layout,
    /// anything else is read as TOML.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let text = fs::read_to_string(path).map_err(StorageError::io("read config", path))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_toml_str(&text)
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix(HOME_PLACEHOLDER)) {
        Some(rest) => app_home().join(rest.trim_start_matches(['/', '\\'])),
        None => path.to_path_buf(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct JsonLayout {
    email: Option<String>,
    #[serde(default)]
    storage: JsonStorage,
}

#[derive(Debug, Default, Deserialize)]
struct JsonStorage {
    #[serde(rename = "file-system", default)]
    file_system: JsonFileSystem,
}

#[derive(Debug, Default, Deserialize)]
struct JsonFileSystem {
    home: Option<PathBuf>,
}
