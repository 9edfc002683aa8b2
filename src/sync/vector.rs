use crate::error::GitSyncError;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

const ENTRY_SEPARATOR: char = '~';
const FIELD_SEPARATOR: char = ':';

/// Branch name to logical timestamp. Entries only ever move forward.
///
/// ```
/// use git_sync::sync::vector::SyncVector;
///
/// let vector = SyncVector::decode("main:12~dev:7").unwrap();
/// assert_eq!(vector.get("main"), Some(12));
/// assert_eq!(vector.encode(), "dev:7~main:12");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncVector(BTreeMap<String, u64>);

impl SyncVector {
    pub fn new() -> Self {
        SyncVector::default()
    }

    pub fn get(&self, branch: &str) -> Option<u64> {
        self.0.get(branch).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }

    /// Raises the entry for `branch` to `timestamp` if that is larger (or the entry
    /// is absent) and returns whether anything changed.
    pub fn update(&mut self, branch: &str, timestamp: u64) -> bool {
        match self.0.get_mut(branch) {
            Some(current) if *current >= timestamp => false,
            Some(current) => {
                *current = timestamp;
                true
            }
            None => {
                self.0.insert(branch.to_string(), timestamp);
                true
            }
        }
    }

    /// Takes the per-branch maximum with `other`; returns the entries that moved.
    pub fn merge(&mut self, other: &SyncVector) -> Vec<(String, u64)> {
        other
            .0
            .iter()
            .filter(|(branch, timestamp)| self.update(branch, **timestamp))
            .map(|(branch, timestamp)| (branch.clone(), *timestamp))
            .collect()
    }

    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(branch, timestamp)| format!("{}{}{}", branch, FIELD_SEPARATOR, timestamp))
            .collect::<Vec<_>>()
            .join(&ENTRY_SEPARATOR.to_string())
    }

    /// Parses an encoded vector. Any bad entry rejects the whole vector.
    pub fn decode(raw: &str) -> Result<SyncVector, GitSyncError> {
        let mut vector = SyncVector::new();
        for entry in raw.split(ENTRY_SEPARATOR).filter(|e| !e.is_empty()) {
            let (branch, timestamp) = entry.rsplit_once(FIELD_SEPARATOR).ok_or_else(|| {
                GitSyncError::ProtocolViolation(format!("sync entry without timestamp: {:?}", entry))
            })?;
            if branch.is_empty() {
                return Err(GitSyncError::ProtocolViolation(format!(
                    "sync entry without branch: {:?}",
                    entry
                )));
            }
            let timestamp = timestamp.parse::<u64>().map_err(|_| {
                GitSyncError::ProtocolViolation(format!("bad sync timestamp: {:?}", entry))
            })?;
            vector.update(branch, timestamp);
        }
        Ok(vector)
    }
}

impl Display for SyncVector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromIterator<(String, u64)> for SyncVector {
    fn from_iter<T: IntoIterator<Item = (String, u64)>>(iter: T) -> Self {
        let mut vector = SyncVector::new();
        for (branch, timestamp) in iter {
            vector.update(&branch, timestamp);
        }
        vector
    }
}
