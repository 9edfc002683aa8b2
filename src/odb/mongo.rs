use crate::error::GitSyncError;
use crate::odb::{Database, Storage};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{Binary, doc};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MongoEntry {
    pub key: String,
    pub value: Binary,
}

/// [`Database`] backed by one MongoDB database; every collection stores
/// `{key, value}` documents.
#[derive(Clone, Debug)]
pub struct MongoDatabase {
    pub db_client: Client,
    pub database: String,
}

impl MongoDatabase {
    pub async fn connect(url: &str, database: &str) -> Result<Self, GitSyncError> {
        let options = mongodb::options::ClientOptions::parse(url).await?;
        let db_client = Client::with_options(options)?;
        Ok(MongoDatabase {
            db_client,
            database: database.to_string(),
        })
    }

    /// Creates the unique `key` index on a collection.
    pub async fn ensure_index(&self, name: &str) -> Result<(), GitSyncError> {
        let collection = self
            .db_client
            .database(&self.database)
            .collection::<MongoEntry>(name);
        let index = IndexModel::builder()
            .keys(doc! { "key": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        collection.create_index(index).await?;
        Ok(())
    }
}

impl Database for MongoDatabase {
    fn collection(&self, name: &str) -> Arc<dyn Storage> {
        Arc::new(MongoStorage {
            collection: self.db_client.database(&self.database).collection(name),
        })
    }
}

pub struct MongoStorage {
    pub collection: Collection<MongoEntry>,
}

#[async_trait]
impl Storage for MongoStorage {
    async fn put(&self, key: &str, value: Bytes) -> Result<(), GitSyncError> {
        let entry = MongoEntry {
            key: key.to_string(),
            value: Binary {
                subtype: BinarySubtype::Generic,
                bytes: value.to_vec(),
            },
        };
        self.collection
            .replace_one(doc! { "key": key }, entry)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, GitSyncError> {
        let result = self.collection.find_one(doc! { "key": key }).await?;
        Ok(result.map(|entry| Bytes::from(entry.value.bytes)))
    }

    async fn exists(&self, key: &str) -> Result<bool, GitSyncError> {
        let count = self
            .collection
            .count_documents(doc! { "key": key })
            .await?;
        Ok(count > 0)
    }

    async fn remove(&self, key: &str) -> Result<bool, GitSyncError> {
        let result = self.collection.delete_one(doc! { "key": key }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, GitSyncError> {
        let cursor = self.collection.find(doc! {}).await?;
        let entries: Vec<MongoEntry> = cursor.try_collect().await?;
        Ok(entries.into_iter().map(|entry| entry.key).collect())
    }
}
