use crate::config::SyncConfig;
use crate::control::Control;
use crate::error::GitSyncError;
use crate::repository::branch::is_valid_branch_name;
use crate::sha::ObjectHash;
use crate::transport::{
    Interest, Name, Packet, RegisteredPrefix, RequestHandler, Transport, register_or_log,
};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub mod vector;

pub use vector::SyncVector;

/// Invoked with `(branch, timestamp)` whenever a peer announces a newer timestamp.
pub type UpdateCallback = Arc<dyn Fn(String, u64) + Send + Sync>;

/// Current wall-clock time in microseconds, the default publish timestamp.
pub fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

/// State-vector sync for one repository.
///
/// The local vector is broadcast to `<prefix>` periodically and immediately after
/// every `publish`. Vectors received from peers are merged entry-wise; each entry
/// that moved forward is reported through the update callback.
pub struct StateVectorSync {
    prefix: Name,
    transport: Arc<dyn Transport>,
    control: Control,
    config: SyncConfig,
    state: tokio::sync::Mutex<SyncVector>,
    wake: Notify,
    running: AtomicBool,
    on_update: UpdateCallback,
    registration: Mutex<Option<RegisteredPrefix>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StateVectorSync {
    pub fn new(
        prefix: Name,
        transport: Arc<dyn Transport>,
        control: Control,
        config: SyncConfig,
        on_update: UpdateCallback,
    ) -> Arc<Self> {
        Arc::new(StateVectorSync {
            prefix,
            transport,
            control,
            config,
            state: tokio::sync::Mutex::new(SyncVector::new()),
            wake: Notify::new(),
            running: AtomicBool::new(false),
            on_update,
            registration: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Raises the local entry for `branch` (to now, unless `timestamp` is given) and
    /// wakes the broadcast loop. Returns the timestamp used.
    pub async fn publish(&self, branch: &str, timestamp: Option<u64>) -> u64 {
        let timestamp = timestamp.unwrap_or_else(now_micros);
        self.state.lock().await.update(branch, timestamp);
        debug!(prefix = %self.prefix, branch, timestamp, "published");
        self.wake.notify_one();
        timestamp
    }

    pub async fn vector(&self) -> SyncVector {
        self.state.lock().await.clone()
    }

    pub async fn get(&self, branch: &str) -> Option<u64> {
        self.state.lock().await.get(branch)
    }

    /// Registers the inbound handler and starts the broadcast loop.
    pub async fn run(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let handler = Arc::new(SyncHandler {
            sync: Arc::downgrade(self),
        });
        let id = register_or_log(self.transport.as_ref(), self.prefix.clone(), handler).await;
        *self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id;

        let task = self.control.spawn(broadcast_loop(Arc::downgrade(self)));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        let id = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.transport.unregister_prefix(id).await;
        }
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Merges a peer's encoded vector. A malformed vector changes nothing; entries
    /// naming an invalid branch are dropped.
    pub async fn on_inbound(&self, raw: &[u8]) -> Result<Vec<(String, u64)>, GitSyncError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| GitSyncError::ProtocolViolation("sync vector is not UTF-8".into()))?;
        let incoming: SyncVector = SyncVector::decode(text)?
            .iter()
            .filter(|(branch, _)| {
                let valid = is_valid_branch_name(branch);
                if !valid {
                    debug!(prefix = %self.prefix, branch = %branch, "dropping invalid branch");
                }
                valid
            })
            .map(|(branch, timestamp)| (branch.clone(), *timestamp))
            .collect();
        let changed = self.state.lock().await.merge(&incoming);
        for (branch, timestamp) in &changed {
            debug!(prefix = %self.prefix, branch = %branch, timestamp, "peer is ahead");
            (self.on_update)(branch.clone(), *timestamp);
        }
        Ok(changed)
    }

    fn next_delay(&self) -> Duration {
        let min = self.config.min_interval_ms;
        let max = self.config.max_interval_ms;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..max))
    }

    async fn broadcast(&self) {
        let body = self.state.lock().await.encode();
        let digest = ObjectHash::digest(body.as_bytes());
        let interest = Interest::new(self.prefix.clone().append(digest.to_string()))
            .with_body(body)
            .with_lifetime(Duration::from_millis(self.config.lifetime_ms))
            .must_be_fresh(true);
        let transport = self.transport.clone();
        self.control.spawn(async move {
            let _ = transport.request(interest).await;
        });
    }
}

async fn broadcast_loop(sync: Weak<StateVectorSync>) {
    loop {
        let Some(sync) = sync.upgrade() else {
            break;
        };
        if !sync.is_running() {
            break;
        }
        sync.broadcast().await;
        let delay = sync.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = sync.wake.notified() => {}
        }
    }
}

struct SyncHandler {
    sync: Weak<StateVectorSync>,
}

#[async_trait]
impl RequestHandler for SyncHandler {
    async fn on_request(&self, interest: Interest) -> Option<Packet> {
        let sync = self.sync.upgrade()?;
        let Some(body) = interest.body else {
            warn!(name = %interest.name, "sync request without vector");
            return None;
        };
        if let Err(e) = sync.on_inbound(&body).await {
            warn!(name = %interest.name, error = %e, "rejected sync vector");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{FnHandler, MemoryNetwork};
    use tokio::sync::mpsc;

    fn fast() -> SyncConfig {
        SyncConfig {
            min_interval_ms: 20,
            max_interval_ms: 40,
            lifetime_ms: 50,
        }
    }

    fn recorder() -> (UpdateCallback, mpsc::UnboundedReceiver<(String, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: UpdateCallback = Arc::new(move |branch, timestamp| {
            let _ = tx.send((branch, timestamp));
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn test_publish_takes_larger() {
        let net = MemoryNetwork::new();
        let (callback, _rx) = recorder();
        let sync = StateVectorSync::new(
            Name::from("/git/demo/sync"),
            net,
            Control::current(),
            fast(),
            callback,
        );
        assert_eq!(sync.publish("main", Some(10)).await, 10);
        assert_eq!(sync.publish("main", Some(3)).await, 3);
        assert_eq!(sync.get("main").await, Some(10));
        let now = sync.publish("dev", None).await;
        assert!(now > 1_600_000_000_000_000);
    }

    #[tokio::test]
    async fn test_malformed_vector_changes_nothing() {
        let net = MemoryNetwork::new();
        let (callback, mut rx) = recorder();
        let sync = StateVectorSync::new(
            Name::from("/git/demo/sync"),
            net,
            Control::current(),
            fast(),
            callback,
        );
        sync.publish("main", Some(5)).await;
        assert!(sync.on_inbound(b"main:9~dev").await.is_err());
        assert_eq!(sync.get("main").await, Some(5));
        assert!(rx.try_recv().is_err());

        let changed = sync.on_inbound(b"main:9~dev:1~old:0").await.unwrap();
        assert_eq!(changed.len(), 3);
        assert!(sync.on_inbound(b"main:7").await.unwrap().is_empty());
        assert_eq!(sync.get("main").await, Some(9));
    }

    #[tokio::test]
    async fn test_invalid_branches_are_dropped() {
        let net = MemoryNetwork::new();
        let (callback, mut rx) = recorder();
        let sync = StateVectorSync::new(
            Name::from("/git/demo/sync"),
            net,
            Control::current(),
            fast(),
            callback,
        );
        let changed = sync.on_inbound(b"a//b:5~./x:6~feature/x:7").await.unwrap();
        assert_eq!(changed, vec![("feature/x".to_string(), 7)]);
        assert_eq!(sync.get("a//b").await, None);
        assert_eq!(sync.vector().await.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), ("feature/x".to_string(), 7));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_asks_for_fresh_data() {
        let net = MemoryNetwork::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = FnHandler(move |interest: Interest| {
            let _ = tx.send(interest);
            None
        });
        net.register_prefix(Name::from("/git/demo/sync"), Arc::new(listener))
            .await
            .unwrap();
        let (callback, _rx) = recorder();
        let sync = StateVectorSync::new(
            Name::from("/git/demo/sync"),
            net,
            Control::current(),
            fast(),
            callback,
        );
        sync.publish("main", Some(3)).await;
        sync.run().await;
        let interest = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(interest.must_be_fresh);
        assert_eq!(interest.body.as_deref(), Some(&b"main:3"[..]));
        sync.stop().await;
    }

    #[tokio::test]
    async fn test_peers_converge() {
        let net = MemoryNetwork::new();
        let (cb_a, _rx_a) = recorder();
        let (cb_b, mut rx_b) = recorder();
        let prefix = Name::from("/git/demo/sync");
        let a = StateVectorSync::new(prefix.clone(), net.clone(), Control::current(), fast(), cb_a);
        let b = StateVectorSync::new(prefix, net.clone(), Control::current(), fast(), cb_b);
        a.run().await;
        b.run().await;

        a.publish("main", Some(42)).await;
        let update = tokio::time::timeout(Duration::from_secs(2), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update, ("main".to_string(), 42));
        assert_eq!(b.get("main").await, Some(42));

        a.stop().await;
        b.stop().await;
        assert!(!a.is_running());
        assert_eq!(net.route_count(), 0);
    }
}
