use crate::objects::types::ObjectType;
use crate::sha::ObjectHash;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug)]
pub enum GitSyncError {
    InvalidHash(String),
    DecompressionError,
    MalformedObject(String),
    LengthMismatch { declared: usize, actual: usize },
    TypeMismatch { expected: ObjectType, actual: ObjectType },
    DigestMismatch { expected: ObjectHash, actual: ObjectHash },
    ObjectNotFound(ObjectHash),
    TransportFailure(String),
    ProtocolViolation(String),
    RepoNotFound(String),
    RepoExists(String),
    BranchNotFound(String),
    BranchExists(String),
    InvalidBranchName(String),
    StaleUpdate { branch: String, current: u64, proposed: u64 },
    FetchFailed(ObjectHash),
    Registration(String),
    Storage(String),
    MongodbError(String),
    Serialization(String),
    Config(String),
    Io(String),
    Other(String),
}

impl GitSyncError {
    /// Errors that mean the bytes we got are wrong, as opposed to absent.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            GitSyncError::DecompressionError
                | GitSyncError::MalformedObject(_)
                | GitSyncError::LengthMismatch { .. }
                | GitSyncError::TypeMismatch { .. }
                | GitSyncError::DigestMismatch { .. }
        )
    }
}

impl Display for GitSyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GitSyncError::InvalidHash(s) => write!(f, "invalid object hash: {}", s),
            GitSyncError::DecompressionError => write!(f, "object failed to decompress"),
            GitSyncError::MalformedObject(msg) => write!(f, "malformed object: {}", msg),
            GitSyncError::LengthMismatch { declared, actual } => write!(
                f,
                "declared length {} does not match content length {}",
                declared, actual
            ),
            GitSyncError::TypeMismatch { expected, actual } => {
                write!(f, "expected a {} object, got {}", expected, actual)
            }
            GitSyncError::DigestMismatch { expected, actual } => {
                write!(f, "digest mismatch: expected {}, got {}", expected, actual)
            }
            GitSyncError::ObjectNotFound(hash) => write!(f, "object {} not found", hash),
            GitSyncError::TransportFailure(name) => write!(f, "no response for {}", name),
            GitSyncError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            GitSyncError::RepoNotFound(repo) => write!(f, "repository {} not found", repo),
            GitSyncError::RepoExists(repo) => write!(f, "repository {} already tracked", repo),
            GitSyncError::BranchNotFound(branch) => write!(f, "branch {} not found", branch),
            GitSyncError::BranchExists(branch) => write!(f, "branch {} already exists", branch),
            GitSyncError::InvalidBranchName(branch) => {
                write!(f, "invalid branch name {:?}", branch)
            }
            GitSyncError::StaleUpdate {
                branch,
                current,
                proposed,
            } => write!(
                f,
                "stale update for {}: timestamp {} is not newer than {}",
                branch, proposed, current
            ),
            GitSyncError::FetchFailed(hash) => write!(f, "fetching graph of {} failed", hash),
            GitSyncError::Registration(msg) => write!(f, "prefix registration failed: {}", msg),
            GitSyncError::Storage(msg) => write!(f, "storage error: {}", msg),
            GitSyncError::MongodbError(msg) => write!(f, "mongodb error: {}", msg),
            GitSyncError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            GitSyncError::Config(msg) => write!(f, "configuration error: {}", msg),
            GitSyncError::Io(msg) => write!(f, "io error: {}", msg),
            GitSyncError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for GitSyncError {}

impl From<object_store::Error> for GitSyncError {
    fn from(e: object_store::Error) -> Self {
        GitSyncError::Storage(format!("{}", e))
    }
}

impl From<mongodb::error::Error> for GitSyncError {
    fn from(e: mongodb::error::Error) -> Self {
        GitSyncError::MongodbError(format!("{}", e))
    }
}

impl From<serde_json::Error> for GitSyncError {
    fn from(e: serde_json::Error) -> Self {
        GitSyncError::Serialization(format!("{}", e))
    }
}

impl From<toml::de::Error> for GitSyncError {
    fn from(e: toml::de::Error) -> Self {
        GitSyncError::Config(format!("{}", e))
    }
}

impl From<std::io::Error> for GitSyncError {
    fn from(e: std::io::Error) -> Self {
        GitSyncError::Io(format!("{}", e))
    }
}
