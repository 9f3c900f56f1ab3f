//! Persistent storage for small client values.
//!
//! Values are JSON files in the platform-appropriate config directory:
//!   - Linux: `~/.config/freqadmin/`
//!   - macOS: `~/Library/Application Support/freqadmin/`
//!   - Windows: `%APPDATA%\freqadmin\`

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

const TOKEN_KEY: &str = "token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Storage rooted in the platform config directory, if there is one.
    pub fn platform() -> Option<Self> {
        let dir = dirs::config_dir()?.join("freqadmin");
        Some(Self { dir })
    }

    /// Storage rooted at an explicit directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }

    /// Save a value.
    ///
    /// Returns `true` if the operation succeeded.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let Ok(json) = serde_json::to_string(value) else {
            return false;
        };
        if !self.dir.exists() && std::fs::create_dir_all(&self.dir).is_err() {
            return false;
        }
        std::fs::write(self.file_path(key), json).is_ok()
    }

    /// Load a value.
    ///
    /// Returns `None` if the key doesn't exist or deserialization fails.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = std::fs::read_to_string(self.file_path(key)).ok()?;
        serde_json::from_str(&json).ok()
    }

    pub fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }

    pub fn load_token(&self) -> Option<String> {
        self.load::<String>(TOKEN_KEY).filter(|t| !t.is_empty())
    }

    pub fn save_token(&self, token: &str) -> bool {
        self.save(TOKEN_KEY, &token)
    }

    pub fn clear_token(&self) {
        self.remove(TOKEN_KEY);
    }
}
