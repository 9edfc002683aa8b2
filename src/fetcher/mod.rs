use crate::config::FetcherConfig;
use crate::control::Control;
use crate::error::GitSyncError;
use crate::objects::GitObject;
use crate::objects::commit::commit_references;
use crate::objects::tree::tree_references;
use crate::objects::types::ObjectType;
use crate::odb::Storage;
use crate::sha::ObjectHash;
use crate::transport::{Interest, Name, Packet, Reply, Transport};
use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, warn};

pub mod producer;

/// Upper bound on the segment loop when no final segment has been announced yet.
pub const FINAL_BLOCK_ID: u64 = (1 << 31) - 1;

#[derive(Default)]
struct Progress {
    requested: HashSet<ObjectHash>,
    completed: usize,
}

/// One fetch session: retrieves objects under `prefix` together with everything
/// they reference, verifying each one before it reaches the store.
///
/// Within a session every hash is requested at most once. The first verification
/// or transport failure makes the session fail; tasks already in flight drain but
/// schedule no further children.
pub struct ObjectFetcher {
    transport: Arc<dyn Transport>,
    control: Control,
    objects: Arc<dyn Storage>,
    prefix: Name,
    config: FetcherConfig,
    admission: Semaphore,
    progress: Mutex<Progress>,
    failed: AtomicBool,
    done: watch::Sender<bool>,
}

impl ObjectFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        control: Control,
        objects: Arc<dyn Storage>,
        prefix: Name,
        config: FetcherConfig,
    ) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(ObjectFetcher {
            transport,
            control,
            objects,
            prefix,
            admission: Semaphore::new(config.max_in_flight.max(1)),
            config,
            progress: Mutex::new(Progress::default()),
            failed: AtomicBool::new(false),
            done,
        })
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues `hash` (and, transitively, its references) for retrieval.
    pub fn fetch(self: &Arc<Self>, hash: ObjectHash, expected_kind: Option<ObjectType>) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        if !self.progress().requested.insert(hash) {
            return;
        }
        let session = self.clone();
        self.control.spawn(async move {
            session.run_one(hash, expected_kind).await;
        });
    }

    pub fn requested_count(&self) -> usize {
        self.progress().requested.len()
    }

    pub fn is_finished(&self) -> bool {
        if self.failed.load(Ordering::SeqCst) {
            return true;
        }
        let progress = self.progress();
        progress.requested.len() == progress.completed
    }

    pub fn succeeded(&self) -> bool {
        !self.failed.load(Ordering::SeqCst)
    }

    /// Waits until every enqueued object resolved or the session failed, and
    /// returns whether it succeeded. A session with nothing enqueued is finished.
    pub async fn wait_until_finished(&self) -> bool {
        let mut done = self.done.subscribe();
        if !self.is_finished() {
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.succeeded()
    }

    async fn run_one(self: Arc<Self>, hash: ObjectHash, expected_kind: Option<ObjectType>) {
        match self.retrieve(hash, expected_kind).await {
            Ok(()) => {
                let finished = {
                    let mut progress = self.progress();
                    progress.completed += 1;
                    progress.requested.len() == progress.completed
                };
                if finished {
                    self.done.send_replace(true);
                }
            }
            Err(e) => {
                warn!(object = %hash, prefix = %self.prefix, error = %e, "fetch failed");
                self.failed.store(true, Ordering::SeqCst);
                self.done.send_replace(true);
            }
        }
    }

    async fn retrieve(
        self: &Arc<Self>,
        hash: ObjectHash,
        expected_kind: Option<ObjectType>,
    ) -> Result<(), GitSyncError> {
        let key = hash.to_string();
        let raw = match self.objects.get(&key).await? {
            Some(raw) => raw,
            None => self.request_object(&hash).await?,
        };

        let object = GitObject::decode(&raw)?;
        object.verify(&hash, expected_kind)?;

        // Another session may have stored it while we were waiting.
        let from_store = self.objects.exists(&key).await?;
        if !from_store {
            self.objects.put(&key, raw).await?;
        }

        if self.failed.load(Ordering::SeqCst) {
            return Ok(());
        }
        match object.kind {
            ObjectType::Commit => {
                if !from_store {
                    for (child, kind) in commit_references(&object.content())? {
                        self.fetch(child, Some(kind));
                    }
                }
            }
            ObjectType::Tree => {
                for (child, kind) in tree_references(&object.content())? {
                    self.fetch(child, Some(kind));
                }
            }
            ObjectType::Blob => {}
            ObjectType::Unknown => {
                error!(object = %hash, kind = %object.kind_name, "unknown object type");
            }
        }
        Ok(())
    }

    /// Retrieves all segments of one object and concatenates them.
    async fn request_object(&self, hash: &ObjectHash) -> Result<Bytes, GitSyncError> {
        let base = self.prefix.clone().append(hash.to_string());
        let mut data = BytesMut::new();
        let mut final_id = FINAL_BLOCK_ID;
        let mut segment = 0;
        while segment <= final_id {
            let name = if segment == 0 {
                base.clone()
            } else {
                base.clone().append_segment(segment)
            };
            let packet = self.request_segment(name).await?;
            data.extend_from_slice(&packet.content);
            match packet.final_segment {
                Some(last) => final_id = last,
                None => break,
            }
            segment += 1;
        }
        Ok(data.freeze())
    }

    async fn request_segment(&self, name: Name) -> Result<Packet, GitSyncError> {
        request_with_retry(
            self.transport.as_ref(),
            &name,
            &self.config,
            Some(&self.admission),
        )
        .await
    }
}

/// Requests `name` up to `config.attempts` times, pausing between attempts. When an
/// admission gate is given, each attempt holds one of its permits.
pub async fn request_with_retry(
    transport: &dyn Transport,
    name: &Name,
    config: &FetcherConfig,
    admission: Option<&Semaphore>,
) -> Result<Packet, GitSyncError> {
    let attempts = config.attempts.max(1);
    for attempt in 1..=attempts {
        let reply = {
            let _permit = match admission {
                Some(gate) => Some(
                    gate.acquire()
                        .await
                        .map_err(|e| GitSyncError::Other(e.to_string()))?,
                ),
                None => None,
            };
            let interest = Interest::new(name.clone()).with_lifetime(config.request_lifetime());
            transport.request(interest).await
        };
        match reply {
            Reply::Data(packet) => return Ok(packet),
            Reply::Timeout => debug!(name = %name, attempt, "request timed out"),
            Reply::Nack(reason) => debug!(name = %name, attempt, ?reason, "request nacked"),
        }
        if attempt < attempts {
            tokio::time::sleep(config.retry_interval()).await;
        }
    }
    Err(GitSyncError::TransportFailure(format!(
        "{} unanswered after {} attempts",
        name, attempts
    )))
}
