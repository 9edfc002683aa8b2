use crate::config::AppConfig;
use crate::control::Control;
use crate::error::GitSyncError;
use crate::fetcher::ObjectFetcher;
use crate::fetcher::producer::ObjectProducer;
use crate::odb::{Database, Storage};
use crate::sha::ObjectHash;
use crate::sync::{StateVectorSync, UpdateCallback, now_micros};
use crate::transport::{
    Component, Interest, Name, Packet, RegisteredPrefix, RequestHandler, Transport,
    register_or_log,
};
use async_trait::async_trait;
use branch::{BranchRecord, head_key, validate_branch_name};
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use push::PushStatusTable;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod branch;
pub mod push;
pub mod update;

/// Everything a repository needs from its node.
#[derive(Clone)]
pub struct RepoContext {
    pub transport: Arc<dyn Transport>,
    pub control: Control,
    pub db: Arc<dyn Database>,
    pub objects: Arc<dyn Storage>,
    pub config: Arc<AppConfig>,
}

/// A tracked repository: its branch registry, sync vector and object producer.
pub struct Repository {
    pub name: String,
    prefix: Name,
    ctx: RepoContext,
    records: Arc<dyn Storage>,
    heads: Arc<dyn Storage>,
    branches: DashMap<String, BranchRecord>,
    branch_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    push_statuses: PushStatusTable,
    sync: Arc<StateVectorSync>,
    producer: ObjectProducer,
    registrations: Mutex<Vec<RegisteredPrefix>>,
}

#[derive(Clone, Copy, Debug)]
enum Route {
    RefList,
    BranchInfo,
    Refs,
}

impl Route {
    fn component(self) -> &'static str {
        match self {
            Route::RefList => "ref-list",
            Route::BranchInfo => "branch-info",
            Route::Refs => "refs",
        }
    }
}

impl Repository {
    /// Opens `name`: loads its branch records, seeds the sync vector from them,
    /// then starts serving and syncing.
    pub async fn open(ctx: RepoContext, name: &str) -> Result<Arc<Self>, GitSyncError> {
        let repo = Self::build(ctx, name);
        repo.load().await?;
        repo.start().await;
        Ok(repo)
    }

    fn build(ctx: RepoContext, name: &str) -> Arc<Self> {
        let prefix = Name::parse(&ctx.config.node.git_prefix).append(name);
        Arc::new_cyclic(|weak: &Weak<Repository>| {
            let weak = weak.clone();
            let on_update: UpdateCallback = Arc::new(move |branch, timestamp| {
                if let Some(repo) = weak.upgrade() {
                    let control = repo.ctx.control.clone();
                    control.spawn(async move {
                        repo.on_remote_update(branch, timestamp).await;
                    });
                }
            });
            let sync = StateVectorSync::new(
                prefix.clone().append("sync"),
                ctx.transport.clone(),
                ctx.control.clone(),
                ctx.config.sync.clone(),
                on_update,
            );
            let producer = ObjectProducer::new(
                ctx.transport.clone(),
                prefix.clone().append("objects"),
                ctx.objects.clone(),
                ctx.config.producer.clone(),
            );
            Repository {
                name: name.to_string(),
                records: ctx.db.collection(name),
                heads: ctx.db.collection(&format!("{}~heads", name)),
                branches: DashMap::new(),
                branch_locks: DashMap::new(),
                push_statuses: PushStatusTable::new(Duration::from_secs(
                    ctx.config.push.status_retention_secs,
                )),
                sync,
                producer,
                registrations: Mutex::new(Vec::new()),
                prefix,
                ctx,
            }
        })
    }

    async fn load(&self) -> Result<(), GitSyncError> {
        for key in self.records.keys().await? {
            let Some(raw) = self.records.get(&key).await? else {
                continue;
            };
            match BranchRecord::from_json(&raw) {
                Ok(record) => {
                    self.sync.publish(&record.name, Some(record.timestamp)).await;
                    self.branches.insert(record.name.clone(), record);
                }
                Err(e) => warn!(repo = %self.name, key = %key, error = %e, "skipping unreadable branch record"),
            }
        }
        info!(repo = %self.name, branches = self.branches.len(), "repository loaded");
        Ok(())
    }

    async fn start(self: &Arc<Self>) {
        self.producer.register().await;
        let mut ids = Vec::new();
        for route in [Route::RefList, Route::BranchInfo, Route::Refs] {
            let handler = Arc::new(MetadataHandler {
                repo: Arc::downgrade(self),
                route,
            });
            let prefix = self.prefix.clone().append(route.component());
            if let Some(id) = register_or_log(self.ctx.transport.as_ref(), prefix, handler).await {
                ids.push(id);
            }
        }
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);
        self.sync.run().await;
    }

    /// Unregisters every prefix and stops the sync loop.
    pub async fn close(&self) {
        self.sync.stop().await;
        self.producer.cancel().await;
        let ids = std::mem::take(
            &mut *self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in ids {
            self.ctx.transport.unregister_prefix(id).await;
        }
    }

    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub fn sync(&self) -> &Arc<StateVectorSync> {
        &self.sync
    }

    pub fn branch(&self, name: &str) -> Option<BranchRecord> {
        self.branches.get(name).map(|record| record.clone())
    }

    pub fn branches(&self) -> Vec<BranchRecord> {
        let mut records: Vec<BranchRecord> =
            self.branches.iter().map(|record| record.clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// `<head> refs/heads/<branch>` per branch, newline separated.
    pub fn ref_list(&self) -> String {
        self.branches()
            .iter()
            .map(BranchRecord::ref_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Creates a branch with no head, owned by `custodian`.
    pub async fn create_branch(
        &self,
        name: &str,
        custodian: &str,
    ) -> Result<BranchRecord, GitSyncError> {
        validate_branch_name(name)?;
        let record = BranchRecord::new(name, custodian);
        match self.branches.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(GitSyncError::BranchExists(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        if let Err(e) = self.persist(&record).await {
            self.branches.remove(name);
            return Err(e);
        }
        self.sync.publish(name, Some(record.timestamp)).await;
        info!(repo = %self.name, branch = name, custodian, "branch created");
        Ok(record)
    }

    /// Advances `branch` to `head`.
    ///
    /// Without an explicit `timestamp` the new one is the current time, bumped past
    /// the record's so it always increases. An explicit timestamp that does not
    /// increase is refused. The head-pointer payload is stored before the new
    /// timestamp is published, so peers reacting to it can read the payload.
    pub async fn commit_branch(
        &self,
        branch: &str,
        head: ObjectHash,
        payload: Bytes,
        timestamp: Option<u64>,
    ) -> Result<BranchRecord, GitSyncError> {
        let mut record = self
            .branch(branch)
            .ok_or_else(|| GitSyncError::BranchNotFound(branch.to_string()))?;
        let timestamp = match timestamp {
            Some(timestamp) if timestamp <= record.timestamp => {
                return Err(GitSyncError::StaleUpdate {
                    branch: branch.to_string(),
                    current: record.timestamp,
                    proposed: timestamp,
                });
            }
            Some(timestamp) => timestamp,
            None => match record.timestamp.checked_add(1) {
                Some(next) => now_micros().max(next),
                None => {
                    return Err(GitSyncError::StaleUpdate {
                        branch: branch.to_string(),
                        current: record.timestamp,
                        proposed: record.timestamp,
                    });
                }
            },
        };

        self.heads.put(&head_key(branch, timestamp), payload).await?;
        self.sync.publish(branch, Some(timestamp)).await;
        record.timestamp = timestamp;
        record.head = head.to_string();
        self.persist(&record).await?;

        self.branches
            .entry(branch.to_string())
            .and_modify(|current| {
                if current.timestamp < record.timestamp {
                    *current = record.clone();
                }
            })
            .or_insert_with(|| record.clone());
        Ok(record)
    }

    /// Head-pointer payload committed at `timestamp` (the current one if `None`).
    pub async fn head_payload(
        &self,
        branch: &str,
        timestamp: Option<u64>,
    ) -> Result<Option<Bytes>, GitSyncError> {
        let timestamp = match timestamp {
            Some(timestamp) => timestamp,
            None => match self.branch(branch) {
                Some(record) if record.has_head() => record.timestamp,
                _ => return Ok(None),
            },
        };
        self.heads.get(&head_key(branch, timestamp)).await
    }

    async fn persist(&self, record: &BranchRecord) -> Result<(), GitSyncError> {
        self.records
            .put(&record.name, Bytes::from(record.to_json()?))
            .await
    }

    fn branch_lock(&self, branch: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.branch_locks
            .entry(branch.to_string())
            .or_default()
            .clone()
    }

    fn new_fetcher(&self) -> Arc<ObjectFetcher> {
        ObjectFetcher::new(
            self.ctx.transport.clone(),
            self.ctx.control.clone(),
            self.ctx.objects.clone(),
            self.prefix.clone().append("objects"),
            self.ctx.config.fetcher.clone(),
        )
    }

    async fn answer(&self, route: Route, interest: &Interest) -> Option<Bytes> {
        let args = interest.name.strip_prefix(&self.prefix)?.get(1..)?;
        match (route, args) {
            (Route::RefList, []) => Some(Bytes::from(self.ref_list())),
            (Route::BranchInfo, [Component::Generic(branch)]) => {
                let record = self.branch(branch)?;
                record.to_json().ok().map(Bytes::from)
            }
            (Route::Refs, [Component::Generic(branch)]) => self.lookup_head(branch, None).await,
            (Route::Refs, [Component::Generic(branch), Component::Timestamp(timestamp)]) => {
                self.lookup_head(branch, Some(*timestamp)).await
            }
            _ => None,
        }
    }

    async fn lookup_head(&self, branch: &str, timestamp: Option<u64>) -> Option<Bytes> {
        match self.head_payload(branch, timestamp).await {
            Ok(payload) => payload,
            Err(e) => {
                debug!(repo = %self.name, branch, error = %e, "head lookup failed");
                None
            }
        }
    }
}

struct MetadataHandler {
    repo: Weak<Repository>,
    route: Route,
}

#[async_trait]
impl RequestHandler for MetadataHandler {
    async fn on_request(&self, interest: Interest) -> Option<Packet> {
        let repo = self.repo.upgrade()?;
        let content = repo.answer(self.route, &interest).await?;
        Some(Packet::new(interest.name, content).with_freshness(Duration::from_secs(1)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::odb::OBJECTS_COLLECTION;
    use crate::odb::localstore::ObjectStoreDatabase;
    use crate::transport::memory::MemoryNetwork;

    pub(crate) fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.storage = StorageConfig::Memory;
        config.fetcher.retry_interval_ms = 10;
        config.fetcher.request_lifetime_ms = 200;
        config.sync.min_interval_ms = 20;
        config.sync.max_interval_ms = 40;
        config.sync.lifetime_ms = 100;
        config
    }

    pub(crate) fn test_context(net: Arc<MemoryNetwork>) -> RepoContext {
        let db: Arc<dyn Database> = Arc::new(ObjectStoreDatabase::in_memory());
        RepoContext {
            transport: net,
            control: Control::current(),
            objects: db.collection(OBJECTS_COLLECTION),
            db,
            config: Arc::new(test_config()),
        }
    }

    #[tokio::test]
    async fn test_create_branch() {
        let net = MemoryNetwork::new();
        let repo = Repository::open(test_context(net.clone()), "demo").await.unwrap();
        let record = repo.create_branch("main", "/site/alice").await.unwrap();
        assert_eq!(record.timestamp, 0);
        assert_eq!(record.custodian, "/site/alice");
        assert!(matches!(
            repo.create_branch("main", "/site/bob").await,
            Err(GitSyncError::BranchExists(_))
        ));
        assert!(repo.create_branch("a:b", "/site/alice").await.is_err());
        assert_eq!(repo.sync().get("main").await, Some(0));
        assert_eq!(repo.ref_list(), "? refs/heads/main");
        repo.close().await;
        assert_eq!(net.route_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_is_monotone() {
        let net = MemoryNetwork::new();
        let repo = Repository::open(test_context(net), "demo").await.unwrap();
        repo.create_branch("main", "/site/alice").await.unwrap();
        let head = ObjectHash::digest(b"head");
        let payload = Bytes::from(head.to_string());

        let first = repo
            .commit_branch("main", head, payload.clone(), Some(100))
            .await
            .unwrap();
        assert_eq!(first.timestamp, 100);
        assert!(matches!(
            repo.commit_branch("main", head, payload.clone(), Some(100)).await,
            Err(GitSyncError::StaleUpdate { .. })
        ));
        let second = repo.commit_branch("main", head, payload.clone(), None).await.unwrap();
        assert!(second.timestamp > 100);
        assert_eq!(repo.sync().get("main").await, Some(second.timestamp));
        assert_eq!(
            repo.head_payload("main", Some(100)).await.unwrap(),
            Some(payload.clone())
        );
        assert_eq!(repo.head_payload("main", None).await.unwrap(), Some(payload));
        assert!(matches!(
            repo.commit_branch("dev", head, Bytes::new(), None).await,
            Err(GitSyncError::BranchNotFound(_))
        ));
        repo.close().await;
    }

    #[tokio::test]
    async fn test_exhausted_timestamp_is_refused() {
        let net = MemoryNetwork::new();
        let repo = Repository::open(test_context(net), "demo").await.unwrap();
        repo.create_branch("main", "/site/alice").await.unwrap();
        let head = ObjectHash::digest(b"head");
        let payload = Bytes::from(head.to_string());
        repo.commit_branch("main", head, payload.clone(), Some(u64::MAX))
            .await
            .unwrap();

        let other = ObjectHash::digest(b"other");
        assert!(matches!(
            repo.commit_branch("main", other, Bytes::from(other.to_string()), None)
                .await,
            Err(GitSyncError::StaleUpdate { current: u64::MAX, .. })
        ));
        let record = repo.branch("main").unwrap();
        assert_eq!(record.timestamp, u64::MAX);
        assert_eq!(record.head, head.to_string());
        assert_eq!(repo.sync().get("main").await, Some(u64::MAX));
        repo.close().await;
    }

    #[tokio::test]
    async fn test_metadata_over_network() {
        let net = MemoryNetwork::new();
        let repo = Repository::open(test_context(net.clone()), "demo").await.unwrap();
        repo.create_branch("main", "/site/alice").await.unwrap();
        let head = ObjectHash::digest(b"head");
        let committed = repo
            .commit_branch("main", head, Bytes::from(head.to_string()), Some(7))
            .await
            .unwrap();

        let list = net
            .request(Interest::new(Name::from("/git/demo/ref-list")))
            .await
            .into_data()
            .unwrap();
        assert_eq!(list.content, Bytes::from(format!("{} refs/heads/main", head)));

        let info = net
            .request(Interest::new(Name::from("/git/demo/branch-info/main")))
            .await
            .into_data()
            .unwrap();
        assert_eq!(BranchRecord::from_json(&info.content).unwrap(), committed);

        let pointer = net
            .request(Interest::new(Name::from("/git/demo/refs/main").append_timestamp(7)))
            .await
            .into_data()
            .unwrap();
        assert_eq!(pointer.content, Bytes::from(head.to_string()));

        let missing = Interest::new(Name::from("/git/demo/branch-info/dev"))
            .with_lifetime(Duration::from_millis(50));
        assert!(net.request(missing).await.into_data().is_none());
        repo.close().await;
    }

    #[tokio::test]
    async fn test_reload_restores_branches() {
        let net = MemoryNetwork::new();
        let ctx = test_context(net);
        let repo = Repository::open(ctx.clone(), "demo").await.unwrap();
        repo.create_branch("main", "/site/alice").await.unwrap();
        let head = ObjectHash::digest(b"head");
        repo.commit_branch("main", head, Bytes::from(head.to_string()), Some(55))
            .await
            .unwrap();
        repo.close().await;

        let reopened = Repository::open(ctx, "demo").await.unwrap();
        let record = reopened.branch("main").unwrap();
        assert_eq!(record.timestamp, 55);
        assert_eq!(record.head, head.to_string());
        assert_eq!(reopened.sync().get("main").await, Some(55));
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_reload_keeps_unusual_branch_names() {
        let net = MemoryNetwork::new();
        let ctx = test_context(net.clone());
        let repo = Repository::open(ctx.clone(), "web#app").await.unwrap();
        let head = ObjectHash::digest(b"head");
        for branch in ["fix#1", "feature/x"] {
            repo.create_branch(branch, "/site/alice").await.unwrap();
            repo.commit_branch(branch, head, Bytes::from(head.to_string()), Some(9))
                .await
                .unwrap();
        }
        repo.close().await;

        let reopened = Repository::open(ctx, "web#app").await.unwrap();
        let names: Vec<String> = reopened.branches().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["feature/x".to_string(), "fix#1".to_string()]);
        assert_eq!(reopened.sync().get("fix#1").await, Some(9));
        assert_eq!(
            reopened.head_payload("feature/x", None).await.unwrap(),
            Some(Bytes::from(head.to_string()))
        );

        let info = net
            .request(Interest::new(Name::parse("/git/web#app/branch-info/feature%2Fx")))
            .await
            .into_data()
            .unwrap();
        assert_eq!(BranchRecord::from_json(&info.content).unwrap().name, "feature/x");
        reopened.close().await;
    }
}
