use std::path::{Path, PathBuf};

use folio_store::StoreLayout;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Editor configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditorConfig {
    /// Branch cloned when none is given.
    pub default_branch: String,
    /// Persisted session state, relative to the working directory.
    pub state_path: PathBuf,
    /// Must match the engine's `content_root`; new objects are shown at
    /// the location the engine will write them to.
    pub content_root: String,
    pub extension: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".into(),
            state_path: PathBuf::from(".folio/state.json"),
            content_root: StoreLayout::default().content_root,
            extension: "toml".into(),
        }
    }
}

impl EditorConfig {
    pub fn from_toml(source: &str) -> SdkResult<Self> {
        toml::from_str(source).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> SdkResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&source)
    }

    /// Where a new object of `object_type` called `name` will be written.
    pub fn object_location(&self, object_type: &str, name: &str) -> String {
        let layout = StoreLayout {
            content_root: self.content_root.clone(),
            ..StoreLayout::default()
        };
        layout.object_location(object_type, name, &self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = EditorConfig::default();
        assert_eq!(c.default_branch, "main");
        assert_eq!(c.state_path, PathBuf::from(".folio/state.json"));
        assert_eq!(c.object_location("post", "hello"), "objects/post/hello.toml");
    }

    #[test]
    fn toml_overrides() {
        let c = EditorConfig::from_toml("default_branch = \"trunk\"\ncontent_root = \"content/\"\n").unwrap();
        assert_eq!(c.default_branch, "trunk");
        assert_eq!(c.object_location("post", "a"), "content/post/a.toml");
        assert!(EditorConfig::from_toml("branch = \"x\"\n").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor.toml");
        std::fs::write(&path, "state_path = \"state/session.json\"\n").unwrap();
        let c = EditorConfig::load(&path).unwrap();
        assert_eq!(c.state_path, PathBuf::from("state/session.json"));
        assert!(matches!(
            EditorConfig::load(dir.path().join("missing.toml")),
            Err(SdkError::Config(_))
        ));
    }
}
