use crate::error::GitSyncError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub mod localstore;
pub mod mongo;

/// Collection holding every verified object, keyed by hex hash.
pub const OBJECTS_COLLECTION: &str = "~objects";
/// Collection holding one presence marker per tracked repository.
pub const REPOS_COLLECTION: &str = "~repos";

/// A flat key/value collection.
///
/// Puts are idempotent overwrites; objects are immutable and keyed by their own
/// hash, so concurrent writers of one key are harmless.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), GitSyncError>;
    async fn get(&self, key: &str) -> Result<Option<Bytes>, GitSyncError>;
    async fn exists(&self, key: &str) -> Result<bool, GitSyncError>;
    async fn remove(&self, key: &str) -> Result<bool, GitSyncError>;
    async fn keys(&self) -> Result<Vec<String>, GitSyncError>;
}

/// Opens named collections on one backend.
pub trait Database: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn Storage>;
}
