use std::collections::{BTreeMap, HashMap};

use folio_crypto::ContentHasher;
use folio_git::{GitError, Repository};
use folio_schema::TypeRegistry;
use folio_types::{Object, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::ObjectCodec;
use crate::error::{StoreError, StoreResult};

/// Where type definitions and object files live in the working tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreLayout {
    /// Directory holding `<type>/<name>.<ext>` object files.
    pub content_root: String,
    /// Path of the type-definition source.
    pub types_file: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            content_root: "objects".into(),
            types_file: "objects.toml".into(),
        }
    }
}

impl StoreLayout {
    pub fn type_dir(&self, object_type: &str) -> String {
        format!("{}/{object_type}", self.content_root.trim_matches('/'))
    }

    /// Location of a new object file.
    pub fn object_location(&self, object_type: &str, name: &str, extension: &str) -> String {
        format!("{}/{name}.{extension}", self.type_dir(object_type))
    }
}

/// The registry plus every object, grouped by type. This is what the engine
/// hands to the editor after every refresh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectsData {
    pub types: TypeRegistry,
    pub objects: BTreeMap<String, Vec<Object>>,
}

/// The last-synchronized snapshot of every object.
///
/// Rebuilt wholesale by [`refresh`](Self::refresh); pending edits never
/// touch it. Objects within a bucket are ordered by location.
#[derive(Clone, Debug, Default)]
pub struct ObjectStore {
    registry: TypeRegistry,
    buckets: BTreeMap<String, Vec<Object>>,
    index: HashMap<ObjectId, (String, usize)>,
    version: u64,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a received snapshot.
    pub fn from_snapshot(data: ObjectsData) -> Self {
        let mut store = Self {
            registry: data.types,
            buckets: data.objects,
            index: HashMap::new(),
            version: 1,
        };
        store.reindex();
        store
    }

    pub fn snapshot(&self) -> ObjectsData {
        ObjectsData {
            types: self.registry.clone(),
            objects: self.buckets.clone(),
        }
    }

    /// Load a fresh snapshot from `repo`.
    pub async fn load(
        repo: &dyn Repository,
        codec: &dyn ObjectCodec,
        layout: &StoreLayout,
    ) -> StoreResult<Self> {
        let mut store = Self::new();
        store.refresh(repo, codec, layout).await?;
        Ok(store)
    }

    /// Re-read the type definitions and every object file, replacing the
    /// store contents. On error the store is left as it was.
    pub async fn refresh(
        &mut self,
        repo: &dyn Repository,
        codec: &dyn ObjectCodec,
        layout: &StoreLayout,
    ) -> StoreResult<()> {
        let source = repo.read_file(&layout.types_file).await?;
        let registry = TypeRegistry::parse(&source)?;
        let suffix = format!(".{}", codec.extension());

        let mut buckets = BTreeMap::new();
        for object_type in registry.type_names() {
            let dir = layout.type_dir(object_type);
            let entries = match repo.list_dir(&dir).await {
                Ok(entries) => entries,
                Err(GitError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e.into()),
            };

            let mut bucket = Vec::new();
            for entry in entries {
                let Some(name) = entry.strip_suffix(&suffix) else {
                    debug!(dir = %dir, entry = %entry, "skipping non-object file");
                    continue;
                };
                let location = format!("{dir}/{entry}");
                let text = repo.read_file(&location).await?;
                let mut fields = codec.parse(&text).map_err(|source| StoreError::Parse {
                    location: location.clone(),
                    source,
                })?;
                registry.normalize(object_type, &mut fields);
                let id = ContentHasher::hash_fields(&fields)?;
                bucket.push(Object {
                    id,
                    object_type: object_type.to_string(),
                    name: name.to_string(),
                    location: Some(location),
                    fields,
                });
            }
            buckets.insert(object_type.to_string(), bucket);
        }

        let version = self.version + 1;
        *self = Self {
            registry,
            buckets,
            index: HashMap::new(),
            version,
        };
        self.reindex();
        info!(
            types = self.registry.len(),
            objects = self.len(),
            version,
            "object store refreshed"
        );
        Ok(())
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (object_type, bucket) in &self.buckets {
            for (pos, object) in bucket.iter().enumerate() {
                if let Some((_, first)) = self.index.get(&object.id) {
                    warn!(
                        id = %object.id.short(),
                        location = object.location.as_deref().unwrap_or_default(),
                        first = first,
                        "duplicate object content"
                    );
                    continue;
                }
                self.index.insert(object.id, (object_type.clone(), pos));
            }
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Incremented by every refresh.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, id: &ObjectId) -> Option<&Object> {
        let (object_type, pos) = self.index.get(id)?;
        self.buckets.get(object_type)?.get(*pos)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains_key(id)
    }

    /// Objects of one type, ordered by location.
    pub fn all(&self, object_type: &str) -> &[Object] {
        self.buckets
            .get(object_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn buckets(&self) -> &BTreeMap<String, Vec<Object>> {
        &self.buckets
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.buckets.values().flatten()
    }

    /// Returns `true` if some object is backed by `location`.
    pub fn location_taken(&self, location: &str) -> bool {
        self.iter()
            .any(|o| o.location.as_deref() == Some(location))
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TomlCodec;
    use crate::error::CodecError;
    use folio_git::{Anonymous, MemoryRepository, NetworkOptions, SimulatedRemote};
    use folio_types::{Author, FieldValue};

    const URL: &str = "https://git.example.com/site.git";
    const TYPES: &str = "[post]\ntitle = \"string\"\n\n[[post.sections]]\nheading = \"string\"\n\n[page]\nbody = \"markdown\"\n";

    async fn repo_with(files: &[(&str, &str)]) -> MemoryRepository {
        let remote = SimulatedRemote::new(URL);
        let mut changes = vec![("objects.toml", Some(TYPES))];
        changes.extend(files.iter().map(|(p, c)| (*p, Some(*c))));
        remote.commit_files("main", &Author::new("a", "a@b.c"), "seed", changes);
        let repo = MemoryRepository::new(remote);
        repo.clone_repo(URL, "main", NetworkOptions::new(&Anonymous))
            .await
            .unwrap();
        repo
    }

    #[tokio::test]
    async fn refresh_stamps_metadata_and_ids() {
        let repo = repo_with(&[
            ("objects/post/hello.toml", "title = \"Hello\"\nsections = []\n"),
            ("objects/post/README.md", "ignored"),
        ])
        .await;
        let store = ObjectStore::load(&repo, &TomlCodec, &StoreLayout::default())
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.version(), 1);
        let post = &store.all("post")[0];
        assert_eq!(post.name, "hello");
        assert_eq!(post.object_type, "post");
        assert_eq!(post.location.as_deref(), Some("objects/post/hello.toml"));
        assert_eq!(post.fields["sections"], FieldValue::empty_children());
        assert_eq!(post.id, ContentHasher::hash_fields(&post.fields).unwrap());
        assert_eq!(store.get(&post.id), Some(post));
        assert!(store.all("page").is_empty());
        assert!(store.location_taken("objects/post/hello.toml"));
    }

    #[tokio::test]
    async fn malformed_file_fails_whole_refresh() {
        let repo = repo_with(&[("objects/post/a.toml", "title = \"A\"\n")]).await;
        let layout = StoreLayout::default();
        let mut store = ObjectStore::load(&repo, &TomlCodec, &layout).await.unwrap();

        repo.write_file("objects/post/b.toml", "title = ").await.unwrap();
        let err = store.refresh(&repo, &TomlCodec, &layout).await.unwrap_err();
        assert_eq!(err.location(), Some("objects/post/b.toml"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.version(), 1);
    }

    #[tokio::test]
    async fn non_finite_float_names_its_file() {
        let repo = repo_with(&[("objects/post/a.toml", "title = \"A\"\nrating = nan\n")]).await;
        let err = ObjectStore::load(&repo, &TomlCodec, &StoreLayout::default())
            .await
            .unwrap_err();
        assert_eq!(err.location(), Some("objects/post/a.toml"));
        assert!(matches!(
            err,
            StoreError::Parse { source: CodecError::Unsupported { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn bad_type_definitions_are_surfaced() {
        let repo = repo_with(&[]).await;
        repo.write_file("objects.toml", "[post").await.unwrap();
        let err = ObjectStore::load(&repo, &TomlCodec, &StoreLayout::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[tokio::test]
    async fn duplicates_resolve_to_first_location() {
        let repo = repo_with(&[
            ("objects/post/b.toml", "title = \"Same\"\n"),
            ("objects/post/a.toml", "title = \"Same\"\n"),
        ])
        .await;
        let store = ObjectStore::load(&repo, &TomlCodec, &StoreLayout::default())
            .await
            .unwrap();
        assert_eq!(store.all("post").len(), 2);
        let id = store.all("post")[0].id;
        assert_eq!(store.get(&id).unwrap().name, "a");
    }

    #[tokio::test]
    async fn snapshot_roundtrip_preserves_lookup() {
        let repo = repo_with(&[("objects/page/about.toml", "body = \"Hi\"\n")]).await;
        let store = ObjectStore::load(&repo, &TomlCodec, &StoreLayout::default())
            .await
            .unwrap();
        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let rebuilt = ObjectStore::from_snapshot(serde_json::from_str(&json).unwrap());
        let about = &store.all("page")[0];
        assert_eq!(rebuilt.get(&about.id), Some(about));
        assert_eq!(rebuilt.registry(), store.registry());
    }

    #[test]
    fn layout_paths() {
        let layout = StoreLayout {
            content_root: "/content/".into(),
            types_file: "types.toml".into(),
        };
        assert_eq!(
            layout.object_location("post", "hello", "toml"),
            "content/post/hello.toml"
        );
    }
}
