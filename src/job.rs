use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PipelineId = u64;
pub type JobId = u64;
pub type BuildId = u64;

/// Represents the status of a build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Created,
    Queued,
    Blocked,
    Running,
    Success,
    Failure,
    Aborted,
}

impl BuildStatus {
    /// Finished builds are never aborted
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failure | BuildStatus::Aborted
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Enabled,
    Disabled,
}

/// `PR-<n>`, the name prefix of every job run for pull request `n`
pub fn pr_job_prefix(pr_number: u64) -> String {
    format!("PR-{}", pr_number)
}

/// A job of a pipeline, e.g. `main` or the pull-request job `PR-3:main`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub state: JobState,
    pub archived: bool,
}

impl JobRecord {
    pub fn new(id: JobId, pipeline_id: PipelineId, name: impl Into<String>) -> Self {
        Self {
            id,
            pipeline_id,
            name: name.into(),
            state: JobState::Enabled,
            archived: false,
        }
    }

    /// True for `PR-<n>` itself and its `PR-<n>:<job>` children, never for
    /// `PR-<n><digit>` jobs of another pull request.
    pub fn belongs_to_pr(&self, prefix: &str) -> bool {
        match self.name.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with(':'),
            None => false,
        }
    }

    /// Disable and archive. Returns false when the job already was.
    pub fn retire(&mut self) -> bool {
        if self.archived && self.state == JobState::Disabled {
            return false;
        }
        self.state = JobState::Disabled;
        self.archived = true;
        true
    }
}

/// One build of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub job_id: JobId,
    pub sha: String,
    pub status: BuildStatus,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Build {
    pub fn new(id: BuildId, job_id: JobId, sha: impl Into<String>) -> Self {
        Self {
            id,
            job_id,
            sha: sha.into(),
            status: BuildStatus::Running,
            status_message: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Mark build as aborted with a reason
    pub fn mark_aborted(&mut self, message: impl Into<String>) {
        self.status = BuildStatus::Aborted;
        self.status_message = Some(message.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn as_ref(&self) -> RunningBuildRef {
        RunningBuildRef {
            build_id: self.id,
            job_id: self.job_id,
            status: self.status,
        }
    }
}

/// Snapshot of a build handed out for supersession
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningBuildRef {
    pub build_id: BuildId,
    pub job_id: JobId,
    pub status: BuildStatus,
}

impl RunningBuildRef {
    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }
}
