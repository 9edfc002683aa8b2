use crate::error::GitSyncError;
use crate::fetcher::request_with_retry;
use crate::objects::types::ObjectType;
use crate::repository::Repository;
use crate::repository::branch::{BranchRecord, validate_branch_name};
use crate::repository::push::parse_head;
use tracing::{debug, info, warn};

impl Repository {
    pub(crate) async fn on_remote_update(&self, branch: String, timestamp: u64) {
        if let Err(e) = self.apply_remote_update(&branch, timestamp).await {
            warn!(repo = %self.name, branch = %branch, timestamp, error = %e, "remote update not applied");
        }
    }

    /// Pulls the head a peer announced for `branch` at `timestamp` and commits it
    /// locally once its whole graph is here. Branches not seen before are first
    /// adopted from the peer's `branch-info`.
    pub async fn apply_remote_update(
        &self,
        branch: &str,
        timestamp: u64,
    ) -> Result<(), GitSyncError> {
        validate_branch_name(branch)?;
        if !self.branches.contains_key(branch) {
            self.adopt_branch(branch).await?;
        }

        let lock = self.branch_lock(branch);
        let _guard = lock.lock().await;
        let current = self
            .branch(branch)
            .ok_or_else(|| GitSyncError::BranchNotFound(branch.to_string()))?;
        if timestamp <= current.timestamp {
            debug!(repo = %self.name, branch, timestamp, current = current.timestamp, "already up to date");
            return Ok(());
        }

        let name = self
            .prefix
            .clone()
            .append("refs")
            .append(branch)
            .append_timestamp(timestamp);
        let packet = request_with_retry(
            self.ctx.transport.as_ref(),
            &name,
            &self.ctx.config.fetcher,
            None,
        )
        .await?;
        let head = parse_head(&packet.content)?;

        let session = self.new_fetcher();
        session.fetch(head, Some(ObjectType::Commit));
        if !session.wait_until_finished().await {
            return Err(GitSyncError::FetchFailed(head));
        }
        self.commit_branch(branch, head, packet.content, Some(timestamp))
            .await?;
        info!(repo = %self.name, branch, timestamp, %head, "followed remote update");
        Ok(())
    }

    async fn adopt_branch(&self, branch: &str) -> Result<(), GitSyncError> {
        let name = self.prefix.clone().append("branch-info").append(branch);
        let packet = request_with_retry(
            self.ctx.transport.as_ref(),
            &name,
            &self.ctx.config.fetcher,
            None,
        )
        .await?;
        let info = BranchRecord::from_json(&packet.content)?;
        if info.name != branch {
            return Err(GitSyncError::ProtocolViolation(format!(
                "branch-info for {} describes {}",
                branch, info.name
            )));
        }
        let record = BranchRecord::new(branch, info.custodian);
        let inserted = self
            .branches
            .entry(branch.to_string())
            .or_insert_with(|| record.clone())
            .value()
            == &record;
        if inserted {
            self.persist(&record).await?;
            info!(repo = %self.name, branch, custodian = %record.custodian, "adopted branch");
        }
        Ok(())
    }
}
