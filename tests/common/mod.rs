#![allow(dead_code)]

use async_trait::async_trait;
use git_sync::config::{AppConfig, StorageConfig};
use git_sync::control::Control;
use git_sync::fetcher::producer::ObjectProducer;
use git_sync::objects::encode_object;
use git_sync::objects::tree::TreeItem;
use git_sync::objects::types::ObjectType;
use git_sync::odb::localstore::ObjectStoreDatabase;
use git_sync::odb::{Database, Storage};
use git_sync::repository::push::PushOutcome;
use git_sync::serve::Server;
use git_sync::sha::ObjectHash;
use git_sync::transport::memory::MemoryNetwork;
use git_sync::transport::{Component, Interest, Name, Packet, RequestHandler, Transport};
use std::sync::Arc;
use std::time::Duration;

pub fn node_config(site: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.node.cmd_prefix = format!("/site/{}", site);
    config.node.local_cmd_prefix = None;
    config.storage = StorageConfig::Memory;
    config.fetcher.retry_interval_ms = 20;
    config.fetcher.request_lifetime_ms = 500;
    config.sync.min_interval_ms = 30;
    config.sync.max_interval_ms = 60;
    config.sync.lifetime_ms = 200;
    config
}

pub async fn start_node(net: &Arc<MemoryNetwork>, site: &str) -> Arc<Server> {
    git_sync::logs::init_test_tracing();
    Server::from_config(net.clone(), Control::current(), node_config(site))
        .await
        .unwrap()
}

/// Issues a command and decodes its reply code; `None` when nothing answered.
pub async fn command(
    net: &MemoryNetwork,
    name: Name,
    body: Option<String>,
    lifetime: Duration,
) -> Option<PushOutcome> {
    let mut interest = Interest::new(name).with_lifetime(lifetime);
    if let Some(body) = body {
        interest = interest.with_body(body);
    }
    let packet = net.request(interest).await.into_data()?;
    PushOutcome::decode(&packet.content)
}

pub async fn fetch_text(net: &MemoryNetwork, name: &str) -> Option<String> {
    let packet = net
        .request(Interest::new(Name::from(name)).with_lifetime(Duration::from_millis(300)))
        .await
        .into_data()?;
    String::from_utf8(packet.content.to_vec()).ok()
}

/// Polls `check` until it holds or `limit` passes.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check().await
}

/// A client-side object store, the way a pushing working copy exposes its objects.
pub struct Workspace {
    pub store: Arc<dyn Storage>,
}

pub struct Snapshot {
    pub commit: ObjectHash,
    pub tree: ObjectHash,
    pub blobs: Vec<ObjectHash>,
}

impl Workspace {
    pub fn new() -> Self {
        Workspace {
            store: ObjectStoreDatabase::in_memory().collection("~objects"),
        }
    }

    pub async fn put(&self, kind: ObjectType, content: &[u8]) -> ObjectHash {
        let (hash, raw) = encode_object(kind, content).unwrap();
        self.store.put(&hash.to_string(), raw).await.unwrap();
        hash
    }

    /// Writes a commit over a flat tree with one blob per file.
    pub async fn commit(
        &self,
        files: &[(&str, &str)],
        parents: &[ObjectHash],
        message: &str,
    ) -> Snapshot {
        let mut blobs = Vec::new();
        let mut tree_data = Vec::new();
        for (name, content) in files {
            let blob = self.put(ObjectType::Blob, content.as_bytes()).await;
            tree_data.extend(TreeItem::new("100644", *name, blob).to_data());
            blobs.push(blob);
        }
        let tree = self.put(ObjectType::Tree, &tree_data).await;
        let mut text = format!("tree {}\n", tree);
        for parent in parents {
            text.push_str(&format!("parent {}\n", parent));
        }
        text.push_str("author Dev <dev@example.com> 1700000000 +0000\n");
        text.push_str("committer Dev <dev@example.com> 1700000000 +0000\n\n");
        text.push_str(message);
        let commit = self.put(ObjectType::Commit, text.as_bytes()).await;
        Snapshot {
            commit,
            tree,
            blobs,
        }
    }

    /// Serves this workspace's objects under `/git/<repo>/objects`.
    pub async fn serve(&self, net: &Arc<MemoryNetwork>, repo: &str) -> ObjectProducer {
        let producer = ObjectProducer::new(
            net.clone(),
            Name::from("/git").append(repo).append("objects"),
            self.store.clone(),
            Default::default(),
        );
        producer.register().await;
        producer
    }

    /// Serves objects only after `delay`.
    pub async fn serve_slowly(&self, net: &Arc<MemoryNetwork>, repo: &str, delay: Duration) {
        let prefix = Name::from("/git").append(repo).append("objects");
        let handler = Arc::new(SlowObjects {
            prefix: prefix.clone(),
            store: self.store.clone(),
            delay,
        });
        net.register_prefix(prefix, handler).await.unwrap();
    }
}

struct SlowObjects {
    prefix: Name,
    store: Arc<dyn Storage>,
    delay: Duration,
}

#[async_trait]
impl RequestHandler for SlowObjects {
    async fn on_request(&self, interest: Interest) -> Option<Packet> {
        let hash = match interest.name.strip_prefix(&self.prefix)? {
            [Component::Generic(hash)] => hash.clone(),
            _ => return None,
        };
        tokio::time::sleep(self.delay).await;
        let raw = self.store.get(&hash).await.ok()??;
        Some(Packet::new(interest.name, raw))
    }
}
