//! Directories the engine reads pipelines, jobs and users from, and the
//! factory it submits events to

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::PipelineSeed;
use crate::error::Result;
use crate::event::{Event, EventConfig};
use crate::job::{BuildId, JobId, JobRecord, PipelineId, RunningBuildRef};
use crate::scm::ScmConfig;
use crate::trigger::{TriggerGraph, WorkflowGraph};
use crate::webhook::repo_identity_from_url;

/// Projection of a pipeline used while resolving one delivery
#[derive(Debug, Clone)]
pub struct PipelineSubject {
    pub id: PipelineId,
    pub repo_identity: String,
    pub checkout_url: String,
    pub root_dir: Option<String>,
    pub default_branch: String,
    pub annotations: BTreeMap<String, serde_json::Value>,
    pub admins: Vec<String>,
    pub workflow_graph: WorkflowGraph,
    /// Trigger nodes of `workflow_graph`, compiled when the pipeline is loaded
    pub triggers: TriggerGraph,
}

impl PipelineSubject {
    pub fn new(
        id: PipelineId,
        checkout_url: impl Into<String>,
        default_branch: impl Into<String>,
        workflow_graph: WorkflowGraph,
    ) -> Result<Self> {
        let checkout_url = checkout_url.into();
        let triggers = TriggerGraph::compile(&workflow_graph)?;
        Ok(Self {
            id,
            repo_identity: repo_identity_from_url(&checkout_url),
            checkout_url,
            root_dir: None,
            default_branch: default_branch.into(),
            annotations: BTreeMap::new(),
            admins: Vec::new(),
            workflow_graph,
            triggers,
        })
    }

    pub fn from_seed(seed: &PipelineSeed) -> Result<Self> {
        let mut subject = Self::new(
            seed.id,
            seed.checkout_url.clone(),
            seed.branch.clone(),
            seed.workflow_graph.clone(),
        )?;
        subject.root_dir = seed.root_dir.clone().filter(|d| !d.is_empty());
        subject.annotations = seed.annotations.clone();
        subject.admins = seed.admins.clone();
        Ok(subject)
    }

    /// Moves `username` to the head of the admin list, adding it when absent.
    /// Returns false when it already was the first admin.
    pub fn promote_admin(&mut self, username: &str) -> bool {
        if self.admins.first().is_some_and(|a| a == username) {
            return false;
        }
        self.admins.retain(|a| a != username);
        self.admins.insert(0, username.to_string());
        true
    }

    /// Adapter coordinates for lookups made on behalf of this pipeline
    pub fn scm_config(&self, token: &str, scm_context: &str, pr_number: Option<u64>) -> ScmConfig {
        ScmConfig {
            repo_identity: self.repo_identity.clone(),
            branch: self.default_branch.clone(),
            token: token.to_string(),
            scm_context: scm_context.to_string(),
            pr_number,
        }
    }
}

/// Platform account of a source-control user
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub scm_context: String,
    sealed_token: String,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        scm_context: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            scm_context: scm_context.into(),
            sealed_token: token.into(),
        }
    }

    pub fn unseal_token(&self) -> String {
        self.sealed_token.clone()
    }
}

#[async_trait]
pub trait PipelineDirectory: Send + Sync {
    /// Pipelines whose repository identity starts with `repo_prefix`.
    async fn list(&self, repo_prefix: &str) -> Result<Vec<PipelineSubject>>;

    async fn get(&self, id: PipelineId) -> Result<Option<PipelineSubject>>;

    /// Records `username` as the pipeline's most recent admin.
    async fn update_admins(&self, id: PipelineId, username: &str) -> Result<()>;
}

#[async_trait]
pub trait JobDirectory: Send + Sync {
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

    async fn create(&self, pipeline_id: PipelineId, name: &str) -> Result<JobRecord>;

    async fn list_for_pipeline(&self, pipeline_id: PipelineId) -> Result<Vec<JobRecord>>;

    async fn running_builds(&self, job_id: JobId) -> Result<Vec<RunningBuildRef>>;

    async fn abort_build(&self, build_id: BuildId, message: &str) -> Result<()>;

    /// Disables and archives a job. Returns false when it already was.
    async fn archive(&self, job_id: JobId) -> Result<bool>;
}

#[async_trait]
pub trait EventFactory: Send + Sync {
    async fn create(&self, config: EventConfig) -> Result<Event>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, username: &str, scm_context: &str) -> Result<Option<User>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::WorkflowNode;

    #[test]
    fn subject_compiles_triggers_once() {
        let graph = WorkflowGraph {
            nodes: vec![
                WorkflowNode {
                    name: "~commit".into(),
                    id: None,
                },
                WorkflowNode {
                    name: "main".into(),
                    id: Some(3),
                },
            ],
            edges: Vec::new(),
        };
        let subject =
            PipelineSubject::new(1, "git@github.com:Acme/App.git", "master", graph).unwrap();
        assert_eq!(subject.repo_identity, "github.com:acme/app");
        assert!(!subject.triggers.is_empty());
    }

    #[test]
    fn subject_with_bad_trigger_pattern_is_rejected() {
        let graph = WorkflowGraph {
            nodes: vec![WorkflowNode {
                name: "~pr:/([/".into(),
                id: None,
            }],
            edges: Vec::new(),
        };
        assert!(PipelineSubject::new(1, "git@github.com:a/b.git", "master", graph).is_err());
    }

    #[test]
    fn acting_user_becomes_first_admin() {
        let graph = WorkflowGraph::default();
        let mut subject =
            PipelineSubject::new(1, "git@github.com:a/b.git", "master", graph).unwrap();
        subject.admins = vec!["bob".into(), "alice".into()];

        assert!(subject.promote_admin("alice"));
        assert_eq!(subject.admins, vec!["alice".to_string(), "bob".to_string()]);
        assert!(!subject.promote_admin("alice"));

        assert!(subject.promote_admin("carol"));
        assert_eq!(subject.admins.len(), 3);
        assert_eq!(subject.admins[0], "carol");
    }
}
