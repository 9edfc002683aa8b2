use crate::error::GitSyncError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod name;

pub use name::{Component, Name};

pub const DEFAULT_LIFETIME: Duration = Duration::from_millis(4000);

/// A named request, optionally carrying a body.
#[derive(Clone, Debug)]
pub struct Interest {
    pub name: Name,
    pub body: Option<Bytes>,
    pub lifetime: Duration,
    pub must_be_fresh: bool,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Interest {
            name,
            body: None,
            lifetime: DEFAULT_LIFETIME,
            must_be_fresh: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn must_be_fresh(mut self, fresh: bool) -> Self {
        self.must_be_fresh = fresh;
        self
    }
}

/// A response bound to the name of the request it answers.
#[derive(Clone, Debug)]
pub struct Packet {
    pub name: Name,
    pub content: Bytes,
    pub freshness: Option<Duration>,
    /// Index of the last segment; `None` means the payload is not segmented.
    pub final_segment: Option<u64>,
}

impl Packet {
    pub fn new(name: Name, content: impl Into<Bytes>) -> Self {
        Packet {
            name,
            content: content.into(),
            freshness: None,
            final_segment: None,
        }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = Some(freshness);
        self
    }

    pub fn with_final_segment(mut self, final_segment: u64) -> Self {
        self.final_segment = Some(final_segment);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NackReason {
    NoRoute,
    Congestion,
    Duplicate,
}

#[derive(Clone, Debug)]
pub enum Reply {
    Data(Packet),
    Timeout,
    Nack(NackReason),
}

impl Reply {
    pub fn into_data(self) -> Option<Packet> {
        match self {
            Reply::Data(packet) => Some(packet),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegisteredPrefix(pub u64);

/// Answers requests under a registered prefix. Returning a packet is the one-shot
/// response; returning `None` leaves the requester to time out.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn on_request(&self, interest: Interest) -> Option<Packet>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, interest: Interest) -> Reply;
    async fn register_prefix(
        &self,
        prefix: Name,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<RegisteredPrefix, GitSyncError>;
    async fn unregister_prefix(&self, id: RegisteredPrefix);
}

/// Registers a handler, logging instead of failing when the transport refuses.
pub async fn register_or_log(
    transport: &dyn Transport,
    prefix: Name,
    handler: Arc<dyn RequestHandler>,
) -> Option<RegisteredPrefix> {
    match transport.register_prefix(prefix.clone(), handler).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(prefix = %prefix, error = %e, "prefix registration failed");
            None
        }
    }
}
