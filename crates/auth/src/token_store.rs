use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A long-lived sign-in credential as persisted on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub provider: String,
    #[serde(default)]
    pub from_device_flow: bool,
    #[serde(default)]
    pub stored_at: Option<i64>,
}

/// JSON file keyed by provider id.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("searchdesk")
            .join("auth.json")
    }

    pub fn open_default() -> Self {
        Self::new(Self::default_path())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn load_all(&self) -> Result<HashMap<String, StoredToken>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save_all(&self, entries: &HashMap<String, StoredToken>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&tmp, &content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn load(&self, provider: &str) -> Result<Option<StoredToken>> {
        Ok(self.load_all()?.remove(provider))
    }

    pub fn store(&self, provider: &str, token: &StoredToken) -> Result<()> {
        let mut entries = self.load_all()?;
        entries.insert(provider.to_string(), token.clone());
        self.save_all(&entries)?;
        tracing::debug!(provider, "Stored credential");
        Ok(())
    }

    /// Returns whether an entry existed.
    pub fn remove(&self, provider: &str) -> Result<bool> {
        let mut entries = self.load_all()?;
        let existed = entries.remove(provider).is_some();
        if existed {
            self.save_all(&entries)?;
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: &str) -> StoredToken {
        StoredToken {
            access_token: value.to_string(),
            provider: "github-copilot".to_string(),
            from_device_flow: true,
            stored_at: Some(1_700_000_000),
        }
    }

    #[test]
    fn store_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join("auth.json"));

        assert!(store.load("github-copilot").unwrap().is_none());
        store.store("github-copilot", &token("gho_1")).unwrap();
        store.store("openai", &token("sk-1")).unwrap();
        store.store("github-copilot", &token("gho_2")).unwrap();

        assert_eq!(
            store.load("github-copilot").unwrap().unwrap().access_token,
            "gho_2"
        );
        assert!(store.remove("github-copilot").unwrap());
        assert!(!store.remove("github-copilot").unwrap());
        assert!(store.load("openai").unwrap().is_some());
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn empty_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(TokenStore::new(path).load("openai").unwrap().is_none());
    }
}
