//! Project store and knowledge index seams.
//!
//! The engine persists generated artifacts through [`ProjectStore`] and
//! notifies an optional [`KnowledgeIndex`] once per phase completion. The
//! core never inspects the on-disk representation; [`FileStore`] is one
//! JSON document per project, [`MemoryStore`] backs the tests.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fable_types::{EntityKind, FableError, Result, SceneUnit};

// ---------------------------------------------------------------------------
// ProjectStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Create an entity record, returning its id.
    async fn create_entity(&self, kind: EntityKind, name: &str, description: &str)
        -> Result<String>;
    /// Append a scene to a chapter, returning the stored scene id.
    async fn append_scene(&self, chapter: u32, scene: &SceneUnit) -> Result<String>;
    /// Replace an entity's description.
    async fn set_description(&self, entity_id: &str, text: &str) -> Result<()>;
    /// Flush to durable storage.
    async fn persist(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// KnowledgeIndex
// ---------------------------------------------------------------------------

/// Summary of the project handed to the knowledge index once per phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project_name: String,
    pub entity_count: usize,
    pub scene_count: usize,
    pub total_words: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub entities_indexed: usize,
    pub scenes_indexed: usize,
}

/// Optional semantic-search index. Sync failures are logged by the caller
/// and never block the workflow.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn sync(&self, snapshot: &ProjectSnapshot) -> Result<SyncStats>;
}

/// No-op index used when no retrieval backend is configured.
pub struct NullIndex;

#[async_trait]
impl KnowledgeIndex for NullIndex {
    async fn sync(&self, _snapshot: &ProjectSnapshot) -> Result<SyncStats> {
        Ok(SyncStats::default())
    }
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntity {
    id: String,
    kind: EntityKind,
    name: String,
    description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredScene {
    id: String,
    chapter: u32,
    scene: SceneUnit,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDoc {
    entities: Vec<StoredEntity>,
    scenes: Vec<StoredScene>,
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// JSON-file-backed store, one document per project.
pub struct FileStore {
    path: PathBuf,
    doc: Mutex<StoreDoc>,
}

impl FileStore {
    /// Open or create the store document at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if tokio::fs::try_exists(&path).await? {
            let json = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&json)?
        } else {
            StoreDoc::default()
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn entity_count(&self) -> usize {
        self.doc.lock().unwrap().entities.len()
    }

    pub fn scene_count(&self) -> usize {
        self.doc.lock().unwrap().scenes.len()
    }
}

#[async_trait]
impl ProjectStore for FileStore {
    async fn create_entity(
        &self,
        kind: EntityKind,
        name: &str,
        description: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.doc.lock().unwrap().entities.push(StoredEntity {
            id: id.clone(),
            kind,
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(id)
    }

    async fn append_scene(&self, chapter: u32, scene: &SceneUnit) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.doc.lock().unwrap().scenes.push(StoredScene {
            id: id.clone(),
            chapter,
            scene: scene.clone(),
        });
        Ok(id)
    }

    async fn set_description(&self, entity_id: &str, text: &str) -> Result<()> {
        let mut doc = self.doc.lock().unwrap();
        let entity = doc
            .entities
            .iter_mut()
            .find(|e| e.id == entity_id)
            .ok_or_else(|| FableError::Store(format!("unknown entity id: {entity_id}")))?;
        entity.description = text.to_string();
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let json = {
            let doc = self.doc.lock().unwrap();
            serde_json::to_string_pretty(&*doc)?
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        tracing::debug!(path = %self.path.display(), "Project store persisted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDoc>,
    persist_calls: std::sync::atomic::AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.doc.lock().unwrap().entities.len()
    }

    pub fn scene_count(&self) -> usize {
        self.doc.lock().unwrap().scenes.len()
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.doc
            .lock()
            .unwrap()
            .entities
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn create_entity(
        &self,
        kind: EntityKind,
        name: &str,
        description: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.doc.lock().unwrap().entities.push(StoredEntity {
            id: id.clone(),
            kind,
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(id)
    }

    async fn append_scene(&self, chapter: u32, scene: &SceneUnit) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.doc.lock().unwrap().scenes.push(StoredScene {
            id: id.clone(),
            chapter,
            scene: scene.clone(),
        });
        Ok(id)
    }

    async fn set_description(&self, entity_id: &str, text: &str) -> Result<()> {
        let mut doc = self.doc.lock().unwrap();
        let entity = doc
            .entities
            .iter_mut()
            .find(|e| e.id == entity_id)
            .ok_or_else(|| FableError::Store(format!("unknown entity id: {entity_id}")))?;
        entity.description = text.to_string();
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        self.persist_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

/// Test index that counts syncs and can be told to fail.
pub struct RecordingIndex {
    pub fail: bool,
    syncs: Mutex<Vec<ProjectSnapshot>>,
}

impl RecordingIndex {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            syncs: Mutex::new(Vec::new()),
        }
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.lock().unwrap().len()
    }
}

#[async_trait]
impl KnowledgeIndex for RecordingIndex {
    async fn sync(&self, snapshot: &ProjectSnapshot) -> Result<SyncStats> {
        self.syncs.lock().unwrap().push(snapshot.clone());
        if self.fail {
            return Err(FableError::Other("index backend unreachable".into()));
        }
        Ok(SyncStats {
            entities_indexed: snapshot.entity_count,
            scenes_indexed: snapshot.scene_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> SceneUnit {
        let mut s = SceneUnit::new(1, 1);
        s.content = "She arrived at dusk.".into();
        s.word_count = 4;
        s
    }

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");

        let store = FileStore::open(&path).await.unwrap();
        let id = store
            .create_entity(EntityKind::Character, "Mara", "a cartographer")
            .await
            .unwrap();
        store.append_scene(1, &scene()).await.unwrap();
        store.persist().await.unwrap();

        let reopened = FileStore::open(&path).await.unwrap();
        assert_eq!(reopened.entity_count(), 1);
        assert_eq!(reopened.scene_count(), 1);

        reopened
            .set_description(&id, "a cartographer of dead cities")
            .await
            .unwrap();
        reopened.persist().await.unwrap();

        let again = FileStore::open(&path).await.unwrap();
        assert_eq!(again.entity_count(), 1);
    }

    #[tokio::test]
    async fn set_description_unknown_id_errors() {
        let store = MemoryStore::new();
        let err = store.set_description("nope", "text").await.unwrap_err();
        assert!(matches!(err, FableError::Store(_)));
    }

    #[tokio::test]
    async fn memory_store_counts() {
        let store = MemoryStore::new();
        store
            .create_entity(EntityKind::Location, "Saltmarket", "a port town")
            .await
            .unwrap();
        store.append_scene(2, &scene()).await.unwrap();
        store.persist().await.unwrap();
        store.persist().await.unwrap();

        assert_eq!(store.entity_count(), 1);
        assert_eq!(store.scene_count(), 1);
        assert_eq!(store.persist_calls(), 2);
        assert_eq!(store.entity_names(), vec!["Saltmarket".to_string()]);
    }

    #[tokio::test]
    async fn null_index_returns_zero_stats() {
        let index = NullIndex;
        let snapshot = ProjectSnapshot {
            project_name: "T".into(),
            entity_count: 3,
            scene_count: 5,
            total_words: 1200,
        };
        let stats = index.sync(&snapshot).await.unwrap();
        assert_eq!(stats.entities_indexed, 0);
        assert_eq!(stats.scenes_indexed, 0);
    }

    #[tokio::test]
    async fn recording_index_counts_and_fails_on_demand() {
        let index = RecordingIndex::new(true);
        let snapshot = ProjectSnapshot {
            project_name: "T".into(),
            entity_count: 1,
            scene_count: 1,
            total_words: 10,
        };
        assert!(index.sync(&snapshot).await.is_err());
        assert_eq!(index.sync_count(), 1);
    }
}
