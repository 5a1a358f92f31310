use std::path::Path;

use folio_store::StoreLayout;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

pub const COMMIT_MESSAGE_ENV: &str = "FOLIO_COMMIT_MESSAGE";
pub const PROXY_URL_ENV: &str = "FOLIO_PROXY_URL";

/// Sync engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Directory holding `<type>/<name>.<ext>` object files.
    pub content_root: String,
    pub types_file: String,
    pub commit_message: String,
    /// Proxy for network operations, passed through to the git backend.
    pub proxy_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let layout = StoreLayout::default();
        Self {
            content_root: layout.content_root,
            types_file: layout.types_file,
            commit_message: "Changes from Folio Editor".into(),
            proxy_url: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(source: &str) -> SyncResult<Self> {
        toml::from_str(source).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&source)
    }

    /// Apply `FOLIO_*` overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(message) = get(COMMIT_MESSAGE_ENV) {
            self.commit_message = message;
        }
        if let Some(proxy) = get(PROXY_URL_ENV) {
            self.proxy_url = Some(proxy);
        }
        self
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout {
            content_root: self.content_root.clone(),
            types_file: self.types_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = EngineConfig::default();
        assert_eq!(c.content_root, "objects");
        assert_eq!(c.types_file, "objects.toml");
        assert_eq!(c.commit_message, "Changes from Folio Editor");
        assert!(c.proxy_url.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml("content_root = \"content\"\n").unwrap();
        assert_eq!(c.content_root, "content");
        assert_eq!(c.types_file, "objects.toml");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EngineConfig::from_toml("content_dir = \"x\"\n").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn overrides_replace_non_empty_values() {
        let c = EngineConfig::default().with_overrides(|key| match key {
            COMMIT_MESSAGE_ENV => Some("Edited online".into()),
            PROXY_URL_ENV => Some("  ".into()),
            _ => None,
        });
        assert_eq!(c.commit_message, "Edited online");
        assert!(c.proxy_url.is_none());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        std::fs::write(&path, "proxy_url = \"http://proxy:8080\"\n").unwrap();
        let c = EngineConfig::load(&path).unwrap();
        assert_eq!(c.proxy_url.as_deref(), Some("http://proxy:8080"));
        assert!(EngineConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
