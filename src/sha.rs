use crate::error::GitSyncError;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt::{Debug, Display};
use std::str::FromStr;

/// SHA-1 name of a git object: the digest of `"<kind> <len>\0<content>"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHash {
    state: [u8; 20],
}

impl ObjectHash {
    pub const LEN: usize = 20;

    pub fn digest(data: &[u8]) -> ObjectHash {
        let mut sha1 = Sha1::new();
        sha1.update(data);
        ObjectHash {
            state: <[u8; 20]>::from(sha1.finalize()),
        }
    }

    pub fn from_slice(raw: &[u8]) -> Option<ObjectHash> {
        let state: [u8; 20] = raw.try_into().ok()?;
        Some(ObjectHash { state })
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.state
    }

    pub fn is_zero(&self) -> bool {
        self.state == [0; 20]
    }
}

impl FromStr for ObjectHash {
    type Err = GitSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 40 {
            return Err(GitSyncError::InvalidHash(s.to_string()));
        }
        let raw = hex::decode(s).map_err(|_| GitSyncError::InvalidHash(s.to_string()))?;
        ObjectHash::from_slice(&raw).ok_or_else(|| GitSyncError::InvalidHash(s.to_string()))
    }
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.state))
    }
}

impl Debug for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Serialize for ObjectHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ObjectHash::from_str(&s).map_err(|_| serde::de::Error::custom("Invalid hash value"))
    }
}
