use crate::error::GitSyncError;
use crate::transport::{
    Interest, NackReason, Name, Packet, RegisteredPrefix, Reply, RequestHandler, Transport,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

struct Route {
    prefix: Name,
    handler: Arc<dyn RequestHandler>,
}

/// Loopback network connecting every node in one process.
///
/// A request is delivered to every handler whose prefix matches its name, so a
/// sync broadcast reaches all peers. The first handler that answers wins. When
/// nothing matches the requester gets `Nack(NoRoute)`; when every handler declines
/// (or the lifetime runs out) it gets `Timeout`.
#[derive(Default)]
pub struct MemoryNetwork {
    routes: DashMap<u64, Route>,
    next_id: AtomicU64,
    log: Mutex<Vec<Name>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryNetwork::default())
    }

    /// Every name requested so far, in issue order.
    pub fn requests(&self) -> Vec<Name> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests issued under `prefix`.
    pub fn request_count(&self, prefix: &Name) -> usize {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|name| prefix.is_prefix_of(name))
            .count()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn matching(&self, name: &Name) -> Vec<Arc<dyn RequestHandler>> {
        self.routes
            .iter()
            .filter(|route| route.prefix.is_prefix_of(name))
            .map(|route| route.handler.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn request(&self, interest: Interest) -> Reply {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(interest.name.clone());

        let handlers = self.matching(&interest.name);
        if handlers.is_empty() {
            debug!(name = %interest.name, "no route");
            return Reply::Nack(NackReason::NoRoute);
        }

        let lifetime = interest.lifetime;
        let mut pending = handlers
            .into_iter()
            .map(|handler| {
                let interest = interest.clone();
                tokio::spawn(async move { handler.on_request(interest).await })
            })
            .collect::<FuturesUnordered<_>>();

        let first_answer = async {
            while let Some(result) = pending.next().await {
                if let Ok(Some(packet)) = result {
                    return Some(packet);
                }
            }
            None
        };
        match tokio::time::timeout(lifetime, first_answer).await {
            Ok(Some(packet)) => Reply::Data(packet),
            Ok(None) | Err(_) => Reply::Timeout,
        }
    }

    async fn register_prefix(
        &self,
        prefix: Name,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<RegisteredPrefix, GitSyncError> {
        if prefix.is_empty() {
            return Err(GitSyncError::Registration(
                "cannot register the root prefix".to_string(),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(prefix = %prefix, id, "prefix registered");
        self.routes.insert(id, Route { prefix, handler });
        Ok(RegisteredPrefix(id))
    }

    async fn unregister_prefix(&self, id: RegisteredPrefix) {
        self.routes.remove(&id.0);
    }
}

/// Handler built from a closure, mostly for wiring small responders in tests.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> RequestHandler for FnHandler<F>
where
    F: Fn(Interest) -> Option<Packet> + Send + Sync,
{
    async fn on_request(&self, interest: Interest) -> Option<Packet> {
        (self.0)(interest)
    }
}
