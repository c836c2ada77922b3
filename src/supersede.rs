//! Build supersession for pull requests
//!
//! A synchronized pull request obsoletes the builds still running for its
//! previous head; a closed one obsoletes them all and retires its jobs.
//! [`supersede`] only returns once every abort has settled. The
//! [`Superseded`] it yields can only be obtained from this module, and the
//! emit phase takes one, so events are submitted after the aborts.

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::directory::{JobDirectory, PipelineSubject};
use crate::error::Result;
use crate::job::{JobRecord, RunningBuildRef, pr_job_prefix};
use crate::webhook::{HookAction, ParsedHook};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupersedeReason {
    NewCommit,
    Closed,
}

impl SupersedeReason {
    pub fn abort_message(&self, pr_number: u64) -> String {
        match self {
            SupersedeReason::NewCommit => {
                format!("Aborted because new commit was pushed to PR#{}", pr_number)
            }
            SupersedeReason::Closed => format!("Aborted because PR#{} was closed", pr_number),
        }
    }
}

/// Completed supersession of one pull request across pipelines
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Superseded {
    pub aborted: usize,
    pub archived: usize,
    pub failures: usize,
    _sealed: (),
}

impl Superseded {
    fn empty() -> Self {
        Self {
            aborted: 0,
            archived: 0,
            failures: 0,
            _sealed: (),
        }
    }

    fn failed() -> Self {
        Self {
            failures: 1,
            ..Self::empty()
        }
    }

    fn merge(mut self, other: Superseded) -> Self {
        self.aborted += other.aborted;
        self.archived += other.archived;
        self.failures += other.failures;
        self
    }
}

/// Supersession a delivery calls for before its events are emitted: a new
/// commit on a pull request obsoletes the builds of its previous head,
/// anything else obsoletes nothing.
pub async fn supersede_before_emit(
    jobs: &dyn JobDirectory,
    pipelines: &[PipelineSubject],
    hook: &ParsedHook,
) -> Superseded {
    match (hook.action, hook.pr_number) {
        (HookAction::Synchronized, Some(number)) => {
            supersede(jobs, pipelines, number, SupersedeReason::NewCommit).await
        }
        _ => Superseded::empty(),
    }
}

/// Aborts the unfinished builds of every `PR-<n>` job of `pipelines`, and
/// archives those jobs when the pull request was closed. Failures are logged
/// and counted, never propagated.
pub async fn supersede(
    jobs: &dyn JobDirectory,
    pipelines: &[PipelineSubject],
    pr_number: u64,
    reason: SupersedeReason,
) -> Superseded {
    let per_pipeline = pipelines
        .iter()
        .map(|p| supersede_pipeline(jobs, p, pr_number, reason));

    join_all(per_pipeline)
        .await
        .into_iter()
        .fold(Superseded::empty(), Superseded::merge)
}

async fn supersede_pipeline(
    jobs: &dyn JobDirectory,
    pipeline: &PipelineSubject,
    pr_number: u64,
    reason: SupersedeReason,
) -> Superseded {
    let prefix = pr_job_prefix(pr_number);
    let pr_jobs: Vec<JobRecord> = match jobs.list_for_pipeline(pipeline.id).await {
        Ok(all) => all.into_iter().filter(|j| j.belongs_to_pr(&prefix)).collect(),
        Err(e) => {
            warn!(pipeline_id = pipeline.id, "failed to list jobs: {}", e);
            return Superseded::failed();
        }
    };

    let message = reason.abort_message(pr_number);
    let results = join_all(
        pr_jobs
            .iter()
            .map(|job| supersede_job(jobs, job, &message, reason)),
    )
    .await;

    let total = results
        .into_iter()
        .fold(Superseded::empty(), Superseded::merge);
    if total.aborted > 0 || total.archived > 0 {
        info!(
            pipeline_id = pipeline.id,
            aborted = total.aborted,
            archived = total.archived,
            "superseded {}",
            prefix
        );
    }
    total
}

async fn supersede_job(
    jobs: &dyn JobDirectory,
    job: &JobRecord,
    message: &str,
    reason: SupersedeReason,
) -> Superseded {
    let mut outcome = Superseded::empty();

    match jobs.running_builds(job.id).await {
        Ok(builds) => {
            let unfinished: Vec<RunningBuildRef> =
                builds.into_iter().filter(|b| !b.is_done()).collect();
            let aborts = join_all(unfinished.iter().map(|b| abort(jobs, b, message))).await;
            for result in aborts {
                match result {
                    Ok(()) => outcome.aborted += 1,
                    Err(_) => outcome.failures += 1,
                }
            }
        }
        Err(e) => {
            warn!(job_id = job.id, "failed to fetch running builds: {}", e);
            outcome.failures += 1;
        }
    }

    if reason == SupersedeReason::Closed {
        match jobs.archive(job.id).await {
            Ok(true) => outcome.archived += 1,
            Ok(false) => debug!(job_id = job.id, "job {} already archived", job.name),
            Err(e) => {
                warn!(job_id = job.id, "failed to archive job {}: {}", job.name, e);
                outcome.failures += 1;
            }
        }
    }

    outcome
}

async fn abort(jobs: &dyn JobDirectory, build: &RunningBuildRef, message: &str) -> Result<()> {
    jobs.abort_build(build.build_id, message)
        .await
        .inspect_err(|e| {
            warn!(
                build_id = build.build_id,
                job_id = build.job_id,
                "failed to abort build: {}",
                e
            );
        })
}
