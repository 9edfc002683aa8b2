use crate::error::GitSyncError;
use crate::sha::ObjectHash;
use crate::transport::{Component, Interest};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Push,
    CreateBranch,
    TrackRepo,
    PushStatus,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Push,
        CommandKind::CreateBranch,
        CommandKind::TrackRepo,
        CommandKind::PushStatus,
    ];

    pub fn component(self) -> &'static str {
        match self {
            CommandKind::Push => "push",
            CommandKind::CreateBranch => "create-branch",
            CommandKind::TrackRepo => "track-repo",
            CommandKind::PushStatus => "push-status",
        }
    }
}

/// A decoded admin command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Push { repo: String, branch: String, commit: ObjectHash },
    CreateBranch { repo: String, branch: String },
    TrackRepo { repo: String },
    PushStatus { repo: String, branch: String, commit: ObjectHash },
}

impl Command {
    /// Decodes the components that follow the command name. Trailing components
    /// beyond the expected ones (a parameters digest, for one) are ignored.
    pub fn parse(
        kind: CommandKind,
        args: &[Component],
        interest: &Interest,
    ) -> Result<Command, GitSyncError> {
        let needed = match kind {
            CommandKind::TrackRepo => 1,
            _ => 2,
        };
        let args = args
            .iter()
            .take(needed)
            .map(|c| c.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .filter(|args| args.len() == needed)
            .ok_or_else(|| {
                GitSyncError::ProtocolViolation(format!(
                    "{} expects {} argument(s): {}",
                    kind.component(),
                    needed,
                    interest.name
                ))
            })?;
        let mut args = args.into_iter();
        let repo = args.next().unwrap_or_default();
        let branch = args.next().unwrap_or_default();
        Ok(match kind {
            CommandKind::Push => Command::Push {
                repo,
                branch,
                commit: commit_from_body(interest)?,
            },
            CommandKind::CreateBranch => Command::CreateBranch { repo, branch },
            CommandKind::TrackRepo => Command::TrackRepo { repo },
            CommandKind::PushStatus => Command::PushStatus {
                repo,
                branch,
                commit: commit_from_body(interest)?,
            },
        })
    }
}

fn commit_from_body(interest: &Interest) -> Result<ObjectHash, GitSyncError> {
    let body = interest
        .body
        .as_ref()
        .ok_or_else(|| GitSyncError::ProtocolViolation(format!("{} has no body", interest.name)))?;
    crate::repository::push::parse_head(body)
        .map_err(|e| GitSyncError::ProtocolViolation(format!("{}: {}", interest.name, e)))
}
