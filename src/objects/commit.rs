use crate::error::GitSyncError;
use crate::objects::types::ObjectType;
use crate::sha::ObjectHash;
use std::str::FromStr;

/// Objects a commit points at, read from its leading `tree`/`parent` header lines.
///
/// Scanning stops at the first line that is neither, so author, committer and the
/// message are never looked at. Parents are expected to be commits, the tree a tree.
pub fn commit_references(content: &[u8]) -> Result<Vec<(ObjectHash, ObjectType)>, GitSyncError> {
    let text = std::str::from_utf8(content)
        .map_err(|_| GitSyncError::MalformedObject("commit is not UTF-8".into()))?;
    let mut refs = Vec::new();
    for line in text.split('\n') {
        let kind = if line.starts_with("tree") {
            ObjectType::Tree
        } else if line.starts_with("parent") {
            ObjectType::Commit
        } else {
            break;
        };
        let mut parts = line.trim_end_matches('\r').split(' ');
        let (Some(_), Some(hex), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GitSyncError::MalformedObject(format!(
                "bad commit header line {:?}",
                line
            )));
        };
        refs.push((ObjectHash::from_str(hex)?, kind));
    }
    Ok(refs)
}
