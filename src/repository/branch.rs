use crate::error::GitSyncError;
use serde::{Deserialize, Serialize};

/// Head value of a branch nobody has pushed to yet.
pub const UNKNOWN_HEAD: &str = "?";

/// One tracked branch as stored in the repository's collection and served as
/// `branch-info`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
    /// Command prefix of the node that accepts pushes for this branch.
    pub custodian: String,
    pub timestamp: u64,
    pub head: String,
}

impl BranchRecord {
    pub fn new(name: impl Into<String>, custodian: impl Into<String>) -> Self {
        BranchRecord {
            name: name.into(),
            custodian: custodian.into(),
            timestamp: 0,
            head: UNKNOWN_HEAD.to_string(),
        }
    }

    pub fn has_head(&self) -> bool {
        self.head != UNKNOWN_HEAD
    }

    pub fn to_json(&self) -> Result<Vec<u8>, GitSyncError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, GitSyncError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn ref_line(&self) -> String {
        format!("{} refs/heads/{}", self.head, self.name)
    }
}

/// Key of the head-pointer payload committed at `timestamp`.
pub fn head_key(branch: &str, timestamp: u64) -> String {
    format!("{}@{}", branch, timestamp)
}

/// Repository names also name storage collections, so every separator is refused.
pub fn is_valid_name(name: &str) -> bool {
    !name.contains('/') && is_valid_branch_name(name)
}

/// Branch names follow git's hierarchical form (`feature/x`). The sync vector
/// separators and the head-key `@` are refused, as are empty or dot-only levels.
pub fn is_valid_branch_name(name: &str) -> bool {
    !(name.is_empty()
        || name.contains(['~', ':', '@'])
        || name.chars().any(|c| c.is_whitespace() || c.is_control())
        || name
            .split('/')
            .any(|level| level.is_empty() || level == "." || level == ".."))
}

pub fn validate_branch_name(name: &str) -> Result<(), GitSyncError> {
    if !is_valid_branch_name(name) {
        return Err(GitSyncError::InvalidBranchName(name.to_string()));
    }
    Ok(())
}
