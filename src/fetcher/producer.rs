use crate::config::ProducerConfig;
use crate::odb::Storage;
use crate::sha::ObjectHash;
use crate::transport::{
    Component, Interest, Name, Packet, RegisteredPrefix, RequestHandler, Transport,
    register_or_log,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// Serves stored objects under `<repo>/objects`. Stored bytes go out as they are;
/// verification is the fetcher's job.
pub struct ObjectProducer {
    transport: Arc<dyn Transport>,
    prefix: Name,
    handler: Arc<ObjectHandler>,
    registration: Mutex<Option<RegisteredPrefix>>,
}

impl ObjectProducer {
    pub fn new(
        transport: Arc<dyn Transport>,
        prefix: Name,
        objects: Arc<dyn Storage>,
        config: ProducerConfig,
    ) -> Self {
        let handler = Arc::new(ObjectHandler {
            prefix: prefix.clone(),
            objects,
            freshness: Duration::from_millis(config.freshness_ms),
            segment_size: config.segment_size.max(1),
        });
        ObjectProducer {
            transport,
            prefix,
            handler,
            registration: Mutex::new(None),
        }
    }

    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub async fn register(&self) {
        let id = register_or_log(
            self.transport.as_ref(),
            self.prefix.clone(),
            self.handler.clone(),
        )
        .await;
        let previous = std::mem::replace(
            &mut *self.registration.lock().unwrap_or_else(PoisonError::into_inner),
            id,
        );
        if let Some(previous) = previous {
            self.transport.unregister_prefix(previous).await;
        }
    }

    pub async fn cancel(&self) {
        let id = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.transport.unregister_prefix(id).await;
        }
    }
}

struct ObjectHandler {
    prefix: Name,
    objects: Arc<dyn Storage>,
    freshness: Duration,
    segment_size: usize,
}

#[async_trait]
impl RequestHandler for ObjectHandler {
    async fn on_request(&self, interest: Interest) -> Option<Packet> {
        let (hash_name, segment) = match interest.name.strip_prefix(&self.prefix)? {
            [Component::Generic(hash)] => (hash.as_str(), None),
            [Component::Generic(hash), Component::Segment(n)] => (hash.as_str(), Some(*n)),
            _ => return None,
        };
        let hash: ObjectHash = hash_name.parse().ok()?;
        info!(name = %interest.name, "object request");

        let raw = match self.objects.get(&hash.to_string()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(object = %hash, "not held");
                return None;
            }
            Err(e) => {
                debug!(object = %hash, error = %e, "store read failed");
                return None;
            }
        };

        if raw.len() <= self.segment_size {
            return match segment {
                None | Some(0) => {
                    Some(Packet::new(interest.name, raw).with_freshness(self.freshness))
                }
                Some(_) => None,
            };
        }

        let last = ((raw.len() - 1) / self.segment_size) as u64;
        let index = segment.unwrap_or(0);
        if index > last {
            return None;
        }
        let start = index as usize * self.segment_size;
        let end = (start + self.segment_size).min(raw.len());
        Some(
            Packet::new(interest.name, raw.slice(start..end))
                .with_freshness(self.freshness)
                .with_final_segment(last),
        )
    }
}
