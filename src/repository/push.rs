use crate::error::GitSyncError;
use crate::objects::types::ObjectType;
use crate::repository::Repository;
use crate::sha::ObjectHash;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

/// Reply to push and admin commands, sent as a 4-byte little-endian integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushOutcome {
    Pending,
    Success,
    Failure,
}

impl PushOutcome {
    pub fn code(self) -> i32 {
        match self {
            PushOutcome::Pending => 0,
            PushOutcome::Success => 1,
            PushOutcome::Failure => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(PushOutcome::Pending),
            1 => Some(PushOutcome::Success),
            2 => Some(PushOutcome::Failure),
            _ => None,
        }
    }

    pub fn encode(self) -> Bytes {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, self.code());
        Bytes::copy_from_slice(&buf)
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() != 4 {
            return None;
        }
        Self::from_code(LittleEndian::read_i32(raw))
    }
}

impl From<bool> for PushOutcome {
    fn from(success: bool) -> Self {
        if success {
            PushOutcome::Success
        } else {
            PushOutcome::Failure
        }
    }
}

#[derive(Clone, Debug)]
pub struct PushStatus {
    pub id: Uuid,
    pub outcome: PushOutcome,
    pub updated_at: DateTime<Utc>,
}

/// Latest known outcome per `(branch, commit)`.
pub struct PushStatusTable {
    entries: DashMap<(String, ObjectHash), PushStatus>,
    retention: chrono::Duration,
}

impl PushStatusTable {
    pub fn new(retention: Duration) -> Self {
        PushStatusTable {
            entries: DashMap::new(),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }

    /// Records a new attempt as pending and returns its id.
    pub fn begin(&self, branch: &str, commit: ObjectHash) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.insert(
            (branch.to_string(), commit),
            PushStatus {
                id,
                outcome: PushOutcome::Pending,
                updated_at: Utc::now(),
            },
        );
        id
    }

    /// Stores the outcome of attempt `id`, unless a newer attempt replaced it.
    pub fn finish(&self, branch: &str, commit: ObjectHash, id: Uuid, outcome: PushOutcome) {
        if let Some(mut status) = self.entries.get_mut(&(branch.to_string(), commit)) {
            if status.id == id {
                status.outcome = outcome;
                status.updated_at = Utc::now();
            }
        }
    }

    pub fn get(&self, branch: &str, commit: ObjectHash) -> Option<PushStatus> {
        self.entries
            .get(&(branch.to_string(), commit))
            .map(|status| status.clone())
    }

    /// Drops finished entries older than the retention window.
    pub fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.entries.retain(|_, status| {
            status.outcome == PushOutcome::Pending || status.updated_at >= cutoff
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Repository {
    /// Runs one push of `payload` (a hex commit hash) to `branch`.
    ///
    /// The commit graph is fetched and, on success, the branch advances. The reply
    /// is `Pending` if that has not happened within `deadline`; the attempt keeps
    /// running and its outcome lands in the push-status table.
    pub async fn push(self: &Arc<Self>, branch: &str, payload: Bytes, deadline: Duration) -> PushOutcome {
        if !self.branches.contains_key(branch) {
            info!(repo = %self.name, branch, "push to unknown branch");
            return PushOutcome::Failure;
        }
        let commit = match parse_head(&payload) {
            Ok(commit) => commit,
            Err(e) => {
                warn!(repo = %self.name, branch, error = %e, "push without a commit hash");
                return PushOutcome::Failure;
            }
        };

        let id = self.push_statuses.begin(branch, commit);
        let span = info_span!("push", %id, repo = %self.name, branch, %commit);
        let (tx, rx) = oneshot::channel();
        let repo = self.clone();
        let branch_name = branch.to_string();
        self.ctx.control.spawn(
            async move {
                let outcome = repo.fetch_and_commit(&branch_name, commit, payload).await;
                repo.push_statuses.finish(&branch_name, commit, id, outcome);
                info!(?outcome, "push finished");
                let _ = tx.send(outcome);
            }
            .instrument(span),
        );

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => PushOutcome::Failure,
            Err(_) => {
                info!(repo = %self.name, branch, %id, "push still running, replying pending");
                PushOutcome::Pending
            }
        }
    }

    /// Serialised per branch: fetches the graph under `commit`, then commits it.
    async fn fetch_and_commit(&self, branch: &str, commit: ObjectHash, payload: Bytes) -> PushOutcome {
        let lock = self.branch_lock(branch);
        let _guard = lock.lock().await;

        let session = self.new_fetcher();
        session.fetch(commit, Some(ObjectType::Commit));
        if !session.wait_until_finished().await {
            warn!(repo = %self.name, branch, %commit, "graph fetch failed");
            return PushOutcome::Failure;
        }
        match self.commit_branch(branch, commit, payload, None).await {
            Ok(record) => {
                info!(repo = %self.name, branch, timestamp = record.timestamp, "branch advanced");
                PushOutcome::Success
            }
            Err(e) => {
                error!(repo = %self.name, branch, error = %e, "commit failed");
                PushOutcome::Failure
            }
        }
    }

    /// Outcome of the latest push of `commit` to `branch`. Without a recorded
    /// attempt, a branch already at `commit` counts as a success.
    pub fn push_status(&self, branch: &str, commit: ObjectHash) -> PushOutcome {
        self.push_statuses.prune(chrono::Utc::now());
        if let Some(status) = self.push_statuses.get(branch, commit) {
            return status.outcome;
        }
        let at_head = self
            .branches
            .get(branch)
            .is_some_and(|record| record.head == commit.to_string());
        PushOutcome::from(at_head)
    }
}

/// Reads a head-pointer payload as a hex commit hash.
pub fn parse_head(payload: &[u8]) -> Result<ObjectHash, GitSyncError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| GitSyncError::ProtocolViolation("head pointer is not UTF-8".into()))?;
    text.trim().parse()
}
