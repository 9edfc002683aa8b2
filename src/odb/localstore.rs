use crate::error::GitSyncError;
use crate::odb::{Database, Storage};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::{Path, PathPart};
use object_store::{ObjectStore, PutPayload};
use std::path::PathBuf;
use std::sync::Arc;

/// [`Database`] over any `object_store` backend; each collection is a path prefix.
#[derive(Clone)]
pub struct ObjectStoreDatabase {
    pub store: Arc<dyn ObjectStore>,
}

impl ObjectStoreDatabase {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        ObjectStoreDatabase { store }
    }

    pub fn in_memory() -> Self {
        ObjectStoreDatabase::new(Arc::new(InMemory::new()))
    }

    pub fn local(path: impl Into<PathBuf>) -> Result<Self, GitSyncError> {
        let path = path.into();
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }
        let store = LocalFileSystem::new_with_prefix(&path)?;
        Ok(ObjectStoreDatabase::new(Arc::new(store)))
    }
}

impl Database for ObjectStoreDatabase {
    fn collection(&self, name: &str) -> Arc<dyn Storage> {
        Arc::new(ObjectStoreCollection {
            store: self.store.clone(),
            prefix: name.to_string(),
        })
    }
}

pub struct ObjectStoreCollection {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreCollection {
    /// Keys are stored hex encoded as the last path part, so any key maps to one
    /// part and lists back unchanged.
    fn path(&self, key: &str) -> Path {
        self.root().child(hex::encode(key))
    }

    fn root(&self) -> Path {
        Path::from_iter([PathPart::from(self.prefix.as_str())])
    }
}

fn decode_key(part: &PathPart<'_>) -> Option<String> {
    let raw = hex::decode(part.as_ref()).ok()?;
    String::from_utf8(raw).ok()
}

#[async_trait]
impl Storage for ObjectStoreCollection {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), GitSyncError> {
        self.store
            .put(&self.path(key), PutPayload::from(value))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, GitSyncError> {
        match self.store.get(&self.path(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, GitSyncError> {
        match self.store.head(&self.path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, GitSyncError> {
        if !self.exists(key).await? {
            return Ok(false);
        }
        match self.store.delete(&self.path(key)).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, GitSyncError> {
        let root = self.root();
        let metas: Vec<_> = self.store.list(Some(&root)).try_collect().await?;
        Ok(metas
            .into_iter()
            .filter_map(|meta| {
                let mut parts = meta.location.prefix_match(&root)?;
                match (parts.next(), parts.next()) {
                    (Some(part), None) => decode_key(&part),
                    _ => None,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(db: &dyn Database) {
        let objects = db.collection("~objects");
        let repos = db.collection("~repos");
        assert!(!objects.exists("abcd").await.unwrap());
        assert!(objects.get("abcd").await.unwrap().is_none());

        objects.put("abcd", Bytes::from_static(b"one")).await.unwrap();
        objects.put("abcd", Bytes::from_static(b"one")).await.unwrap();
        objects.put("ef01", Bytes::from_static(b"two")).await.unwrap();
        repos.put("demo", Bytes::new()).await.unwrap();

        assert!(objects.exists("abcd").await.unwrap());
        assert_eq!(objects.get("ef01").await.unwrap().unwrap(), Bytes::from_static(b"two"));
        let mut keys = objects.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["abcd".to_string(), "ef01".to_string()]);
        assert_eq!(repos.keys().await.unwrap(), vec!["demo".to_string()]);

        assert!(objects.remove("abcd").await.unwrap());
        assert!(!objects.remove("abcd").await.unwrap());
        assert!(!objects.exists("abcd").await.unwrap());
    }

    #[tokio::test]
    async fn test_reserved_characters_list_back_unchanged() {
        let db = ObjectStoreDatabase::in_memory();
        let repos = db.collection("~repos");
        let branches = db.collection("web#app");
        let heads = db.collection("web#app~heads");
        for key in ["web#app", "a%20b", "x[1]|{y}<z>", "caf\u{e9}"] {
            repos.put(key, Bytes::new()).await.unwrap();
        }
        branches.put("fix#1", Bytes::from_static(b"record")).await.unwrap();
        heads.put("fix#1@7", Bytes::from_static(b"head")).await.unwrap();

        let mut keys = repos.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a%20b", "caf\u{e9}", "web#app", "x[1]|{y}<z>"]);
        assert_eq!(branches.keys().await.unwrap(), vec!["fix#1".to_string()]);
        assert_eq!(
            branches.get("fix#1").await.unwrap().unwrap(),
            Bytes::from_static(b"record")
        );
        assert_eq!(heads.keys().await.unwrap(), vec!["fix#1@7".to_string()]);
    }

    #[tokio::test]
    async fn test_in_memory_collections() {
        exercise(&ObjectStoreDatabase::in_memory()).await;
    }

    #[tokio::test]
    async fn test_local_collections() {
        let dir = tempfile::tempdir().unwrap();
        let db = ObjectStoreDatabase::local(dir.path().join("store")).unwrap();
        exercise(&db).await;
    }
}
