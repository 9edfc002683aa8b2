use crate::config::AppConfig;
use crate::control::Control;
use crate::error::GitSyncError;
use crate::odb::{OBJECTS_COLLECTION, REPOS_COLLECTION, Storage};
use crate::repository::branch::is_valid_name;
use crate::repository::push::PushOutcome;
use crate::repository::{RepoContext, Repository};
use crate::sha::ObjectHash;
use crate::transport::{
    Interest, Name, Packet, RegisteredPrefix, RequestHandler, Transport, register_or_log,
};
use async_trait::async_trait;
use bytes::Bytes;
use command::{Command, CommandKind};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod command;

/// The repository set of one node, plus the command endpoints that drive it.
pub struct Server {
    ctx: RepoContext,
    repos: DashMap<String, Arc<Repository>>,
    repos_db: Arc<dyn Storage>,
    tracking: tokio::sync::Mutex<()>,
    registrations: Mutex<Vec<RegisteredPrefix>>,
    metrics: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Opens the configured storage and starts a node on `transport`.
    pub async fn from_config(
        transport: Arc<dyn Transport>,
        control: Control,
        config: AppConfig,
    ) -> Result<Arc<Self>, GitSyncError> {
        let db = config.storage.open().await?;
        let ctx = RepoContext {
            transport,
            control,
            objects: db.collection(OBJECTS_COLLECTION),
            db,
            config: Arc::new(config),
        };
        Self::start(ctx).await
    }

    /// Reloads every tracked repository and registers the command prefixes.
    pub async fn start(ctx: RepoContext) -> Result<Arc<Self>, GitSyncError> {
        let server = Arc::new(Server {
            repos_db: ctx.db.collection(REPOS_COLLECTION),
            ctx,
            repos: DashMap::new(),
            tracking: tokio::sync::Mutex::new(()),
            registrations: Mutex::new(Vec::new()),
            metrics: Mutex::new(None),
        });
        server.load_repos().await?;

        let period = server.ctx.config.node.metrics_interval_secs;
        if period > 0 {
            let task = server
                .ctx
                .control
                .start_metrics_logging(Duration::from_secs(period));
            *server.metrics.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        }

        let mut prefixes = vec![Name::parse(&server.ctx.config.node.cmd_prefix)];
        if let Some(local) = &server.ctx.config.node.local_cmd_prefix {
            prefixes.push(Name::parse(local));
        }
        let mut ids = Vec::new();
        for prefix in prefixes {
            for kind in CommandKind::ALL {
                let handler = Arc::new(CommandHandler {
                    server: Arc::downgrade(&server),
                    prefix: prefix.clone().append(kind.component()),
                    kind,
                });
                let id = register_or_log(
                    server.ctx.transport.as_ref(),
                    handler.prefix.clone(),
                    handler,
                )
                .await;
                ids.extend(id);
            }
        }
        server
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);
        Ok(server)
    }

    async fn load_repos(&self) -> Result<(), GitSyncError> {
        info!("Loading repos......");
        for name in self.repos_db.keys().await? {
            let repo = Repository::open(self.ctx.clone(), &name).await?;
            self.repos.insert(name, repo);
        }
        info!(count = self.repos.len(), "All repos loaded.");
        Ok(())
    }

    /// Network name of this node, recorded as custodian of branches created here.
    pub fn custodian(&self) -> &str {
        &self.ctx.config.node.cmd_prefix
    }

    pub fn context(&self) -> &RepoContext {
        &self.ctx
    }

    pub fn repo(&self, name: &str) -> Option<Arc<Repository>> {
        self.repos.get(name).map(|repo| repo.clone())
    }

    pub fn repo_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repos.iter().map(|repo| repo.key().clone()).collect();
        names.sort();
        names
    }

    /// Starts tracking `name`. Fails if it is already tracked.
    pub async fn track_repo(&self, name: &str) -> Result<Arc<Repository>, GitSyncError> {
        if !is_valid_name(name) {
            return Err(GitSyncError::Other(format!("invalid repository name {:?}", name)));
        }
        let _tracking = self.tracking.lock().await;
        if self.repos.contains_key(name) {
            return Err(GitSyncError::RepoExists(name.to_string()));
        }
        let repo = Repository::open(self.ctx.clone(), name).await?;
        if let Err(e) = self.repos_db.put(name, Bytes::new()).await {
            repo.close().await;
            return Err(e);
        }
        self.repos.insert(name.to_string(), repo.clone());
        info!(repo = name, "tracking repository");
        Ok(repo)
    }

    pub async fn create_branch(&self, repo: &str, branch: &str) -> PushOutcome {
        let Some(repository) = self.repo(repo) else {
            info!(repo, "create-branch for unknown repository");
            return PushOutcome::Failure;
        };
        match repository.create_branch(branch, self.custodian()).await {
            Ok(_) => PushOutcome::Success,
            Err(e) => {
                info!(repo, branch, error = %e, "create-branch refused");
                PushOutcome::Failure
            }
        }
    }

    pub async fn push(
        &self,
        repo: &str,
        branch: &str,
        commit: ObjectHash,
        deadline: Duration,
    ) -> PushOutcome {
        let Some(repository) = self.repo(repo) else {
            info!(repo, "push to unknown repository");
            return PushOutcome::Failure;
        };
        repository
            .push(branch, Bytes::from(commit.to_string()), deadline)
            .await
    }

    pub fn push_status(&self, repo: &str, branch: &str, commit: ObjectHash) -> PushOutcome {
        match self.repo(repo) {
            Some(repository) => repository.push_status(branch, commit),
            None => PushOutcome::Failure,
        }
    }

    /// Executes one decoded command and returns the reply code.
    pub async fn execute(&self, command: Command, lifetime: Duration) -> PushOutcome {
        match command {
            Command::Push { repo, branch, commit } => {
                self.push(&repo, &branch, commit, lifetime / 2).await
            }
            Command::CreateBranch { repo, branch } => self.create_branch(&repo, &branch).await,
            Command::TrackRepo { repo } => match self.track_repo(&repo).await {
                Ok(_) => PushOutcome::Success,
                Err(e) => {
                    info!(repo = %repo, error = %e, "track-repo refused");
                    PushOutcome::Failure
                }
            },
            Command::PushStatus { repo, branch, commit } => {
                self.push_status(&repo, &branch, commit)
            }
        }
    }

    /// Unregisters the command prefixes and closes every repository.
    pub async fn shutdown(&self) {
        let ids = std::mem::take(
            &mut *self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in ids {
            self.ctx.transport.unregister_prefix(id).await;
        }
        let repos: Vec<Arc<Repository>> = self.repos.iter().map(|repo| repo.clone()).collect();
        for repo in repos {
            repo.close().await;
        }
        let metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = metrics {
            task.abort();
        }
        info!("server stopped");
    }
}

struct CommandHandler {
    server: Weak<Server>,
    prefix: Name,
    kind: CommandKind,
}

#[async_trait]
impl RequestHandler for CommandHandler {
    async fn on_request(&self, interest: Interest) -> Option<Packet> {
        let server = self.server.upgrade()?;
        let args = interest.name.strip_prefix(&self.prefix)?;
        info!(name = %interest.name, command = self.kind.component(), "command");
        let command = match Command::parse(self.kind, args, &interest) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "rejected command");
                return None;
            }
        };
        let outcome = server.execute(command, interest.lifetime).await;
        let packet = Packet::new(interest.name, outcome.encode());
        Some(match self.kind {
            CommandKind::Push => packet,
            _ => packet.with_freshness(Duration::from_secs(1)),
        })
    }
}
