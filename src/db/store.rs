use std::collections::{BTreeMap, HashMap, VecDeque};
#[cfg(test)]
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::directory::{
    EventFactory, JobDirectory, PipelineDirectory, PipelineSubject, User, UserDirectory,
};
use crate::error::{CicdError, Result};
use crate::event::{Event, EventConfig, EventKind};
use crate::job::{Build, BuildId, JobId, JobRecord, PipelineId, RunningBuildRef, pr_job_prefix};

/// Most recent side effects kept in the operation log
const OPERATION_LOG_LIMIT: usize = 256;

/// Side effect recorded by the store, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    BuildAborted(BuildId),
    JobArchived(JobId),
    EventCreated(u64),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreCounts {
    pub pipelines: usize,
    pub jobs: usize,
    pub running_builds: usize,
    pub events: usize,
}

#[derive(Default)]
struct Inner {
    pipelines: BTreeMap<PipelineId, PipelineSubject>,
    jobs: BTreeMap<JobId, JobRecord>,
    builds: BTreeMap<BuildId, Build>,
    events: Vec<Event>,
    users: HashMap<(String, String), User>,
    #[cfg(test)]
    rejected_pipelines: HashSet<PipelineId>,
    ops: VecDeque<StoreOp>,
    next_job_id: JobId,
    next_build_id: BuildId,
    next_event_id: u64,
}

impl Inner {
    #[cfg(test)]
    fn rejects(&self, pipeline_id: PipelineId) -> bool {
        self.rejected_pipelines.contains(&pipeline_id)
    }

    #[cfg(not(test))]
    fn rejects(&self, _pipeline_id: PipelineId) -> bool {
        false
    }

    fn record(&mut self, op: StoreOp) {
        if self.ops.len() == OPERATION_LOG_LIMIT {
            self.ops.pop_front();
        }
        self.ops.push_back(op);
    }

    fn job_named(&self, pipeline_id: PipelineId, name: &str) -> Option<JobId> {
        self.jobs
            .values()
            .find(|j| j.pipeline_id == pipeline_id && j.name == name)
            .map(|j| j.id)
    }

    fn insert_job(&mut self, pipeline_id: PipelineId, name: &str) -> JobRecord {
        self.next_job_id += 1;
        let job = JobRecord::new(self.next_job_id, pipeline_id, name);
        self.jobs.insert(job.id, job.clone());
        job
    }

    fn ensure_job(&mut self, pipeline_id: PipelineId, name: &str) -> JobId {
        match self.job_named(pipeline_id, name) {
            Some(id) => id,
            None => self.insert_job(pipeline_id, name).id,
        }
    }

    fn insert_build(&mut self, job_id: JobId, sha: &str) -> Build {
        self.next_build_id += 1;
        let build = Build::new(self.next_build_id, job_id, sha);
        self.builds.insert(build.id, build.clone());
        build
    }
}

/// In-process pipeline, job, user and event store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds pipelines and users from the configuration. Pipelines whose
    /// workflow graph does not compile are logged and left out.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut inner = Inner::default();
        load_seeds(&mut inner, config);
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Replaces seeded pipelines and users; jobs, builds and events are kept.
    pub async fn reload(&self, config: &AppConfig) {
        let mut inner = self.inner.write().await;
        inner.pipelines.clear();
        inner.users.clear();
        load_seeds(&mut inner, config);
    }

    pub async fn add_pipeline(&self, pipeline: PipelineSubject) {
        let mut inner = self.inner.write().await;
        inner.pipelines.insert(pipeline.id, pipeline);
    }

    pub async fn add_user(&self, user: User) {
        let mut inner = self.inner.write().await;
        inner
            .users
            .insert((user.username.clone(), user.scm_context.clone()), user);
    }

    /// Starts a running build of `job_name`, creating the job when needed.
    pub async fn start_build(&self, pipeline_id: PipelineId, job_name: &str, sha: &str) -> Build {
        let mut inner = self.inner.write().await;
        let job_id = inner.ensure_job(pipeline_id, job_name);
        inner.insert_build(job_id, sha)
    }

    /// Makes the event factory reject events of `pipeline_id`.
    #[cfg(test)]
    pub async fn reject_events_for(&self, pipeline_id: PipelineId) {
        let mut inner = self.inner.write().await;
        inner.rejected_pipelines.insert(pipeline_id);
    }

    pub async fn events(&self) -> Vec<Event> {
        self.inner.read().await.events.clone()
    }

    pub async fn build(&self, id: BuildId) -> Option<Build> {
        self.inner.read().await.builds.get(&id).cloned()
    }

    pub async fn job_by_name(&self, pipeline_id: PipelineId, name: &str) -> Option<JobRecord> {
        let inner = self.inner.read().await;
        let id = inner.job_named(pipeline_id, name)?;
        inner.jobs.get(&id).cloned()
    }

    /// Recent aborts, archives and event creations, oldest first
    pub async fn operations(&self) -> Vec<StoreOp> {
        self.inner.read().await.ops.iter().cloned().collect()
    }

    pub async fn counts(&self) -> StoreCounts {
        let inner = self.inner.read().await;
        StoreCounts {
            pipelines: inner.pipelines.len(),
            jobs: inner.jobs.len(),
            running_builds: inner
                .builds
                .values()
                .filter(|b| !b.status.is_done())
                .count(),
            events: inner.events.len(),
        }
    }
}

fn load_seeds(inner: &mut Inner, config: &AppConfig) {
    for seed in &config.pipelines {
        match PipelineSubject::from_seed(seed) {
            Ok(subject) => {
                inner.pipelines.insert(subject.id, subject);
            }
            Err(e) => warn!(pipeline_id = seed.id, "pipeline not loaded: {}", e),
        }
    }
    for seed in &config.users {
        let user = User::new(&seed.username, &seed.scm_context, &seed.token);
        inner
            .users
            .insert((seed.username.clone(), seed.scm_context.clone()), user);
    }
}

/// `host:owner/repo` or `host:owner/repo:<anything>`, never `host:owner/repo2`
fn matches_repo_prefix(identity: &str, prefix: &str) -> bool {
    identity
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
}

#[async_trait]
impl PipelineDirectory for MemoryStore {
    async fn list(&self, repo_prefix: &str) -> Result<Vec<PipelineSubject>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pipelines
            .values()
            .filter(|p| matches_repo_prefix(&p.repo_identity, repo_prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, id: PipelineId) -> Result<Option<PipelineSubject>> {
        Ok(self.inner.read().await.pipelines.get(&id).cloned())
    }

    async fn update_admins(&self, id: PipelineId, username: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let pipeline = inner
            .pipelines
            .get_mut(&id)
            .ok_or_else(|| CicdError::NotFound(format!("pipeline {}", id)))?;
        if pipeline.promote_admin(username) {
            debug!(pipeline_id = id, username, "admins updated");
        }
        Ok(())
    }
}

#[async_trait]
impl JobDirectory for MemoryStore {
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn create(&self, pipeline_id: PipelineId, name: &str) -> Result<JobRecord> {
        let mut inner = self.inner.write().await;
        if !inner.pipelines.contains_key(&pipeline_id) {
            return Err(CicdError::NotFound(format!("pipeline {}", pipeline_id)));
        }
        if inner.job_named(pipeline_id, name).is_some() {
            return Err(CicdError::ConfigError(format!(
                "job {} already exists in pipeline {}",
                name, pipeline_id
            )));
        }
        Ok(inner.insert_job(pipeline_id, name))
    }

    async fn list_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<JobRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn running_builds(&self, job_id: JobId) -> Result<Vec<RunningBuildRef>> {
        let inner = self.inner.read().await;
        Ok(inner
            .builds
            .values()
            .filter(|b| b.job_id == job_id)
            .filter(|b| !b.status.is_done())
            .map(Build::as_ref)
            .collect())
    }

    async fn abort_build(&self, build_id: BuildId, message: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let build = inner
            .builds
            .get_mut(&build_id)
            .ok_or_else(|| CicdError::NotFound(format!("build {}", build_id)))?;
        build.mark_aborted(message);
        inner.record(StoreOp::BuildAborted(build_id));
        debug!(build_id, "build aborted");
        Ok(())
    }

    async fn archive(&self, job_id: JobId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| CicdError::NotFound(format!("job {}", job_id)))?;
        let changed = job.retire();
        if changed {
            inner.record(StoreOp::JobArchived(job_id));
        }
        Ok(changed)
    }
}

#[async_trait]
impl EventFactory for MemoryStore {
    /// Records the event and starts builds for the jobs its start node
    /// leads to. Pull-request events run `PR-<n>:<job>` copies of them.
    async fn create(&self, config: EventConfig) -> Result<Event> {
        let mut inner = self.inner.write().await;
        if inner.rejects(config.pipeline_id) {
            return Err(CicdError::EventCreationFailed {
                status: 500,
                message: format!("events of pipeline {} are rejected", config.pipeline_id),
            });
        }
        let pipeline = inner
            .pipelines
            .get(&config.pipeline_id)
            .cloned()
            .ok_or_else(|| CicdError::NotFound(format!("pipeline {}", config.pipeline_id)))?;

        if config.skip_message.is_none() {
            let prefix = match (config.kind, config.pr_num) {
                (EventKind::Pr, Some(n)) => Some(pr_job_prefix(n)),
                _ => None,
            };
            for job in pipeline.workflow_graph.next_jobs(&config.start_from) {
                let name = match &prefix {
                    Some(prefix) => format!("{}:{}", prefix, job),
                    None => job.to_string(),
                };
                let job_id = inner.ensure_job(pipeline.id, &name);
                inner.insert_build(job_id, &config.sha);
            }
        }

        inner.next_event_id += 1;
        let event = Event {
            id: inner.next_event_id,
            create_time: Utc::now(),
            config,
        };
        inner.record(StoreOp::EventCreated(event.id));
        inner.events.push(event.clone());
        Ok(event)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get(&self, username: &str, scm_context: &str) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .get(&(username.to_string(), scm_context.to_string()))
            .cloned())
    }
}
