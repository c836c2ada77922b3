//! Request-scoped handling of one normalized delivery

use std::sync::Arc;

use axum::http::StatusCode;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{ScmContextConfig, WebhookSettings};
use crate::db::MemoryStore;
use crate::directory::{EventFactory, JobDirectory, PipelineDirectory, UserDirectory};
use crate::error::{CicdError, Result};
use crate::event::{
    Event, EventConfig, PipelineFailure, PipelineOutcome, cause_message, emit, summarize,
};
use crate::identity::{IdentitySource, ScmIdentity, resolve_identity};
use crate::restriction::{CommitPolicy, commit_policy, pr_policy};
use crate::scm::{RefType, ScmAdapter, ScmConfig};
use crate::subscribers::{Resolution, Subscription, list_subscribers, resolve_subscriber};
use crate::supersede::{SupersedeReason, Superseded, supersede, supersede_before_emit};
use crate::webhook::{HookAction, HookKind, ParsedHook, PrSource};

/// What a delivery amounted to, returned as the response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutcome {
    #[serde(skip)]
    pub status: StatusCode,
    pub hook_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub events: Vec<Event>,
    pub failures: Vec<PipelineFailure>,
    pub skipped: usize,
    pub aborted_builds: usize,
    pub archived_jobs: usize,
}

impl HookOutcome {
    fn new(status: StatusCode, hook: &ParsedHook) -> Self {
        Self {
            status,
            hook_id: hook.hook_id.clone(),
            message: None,
            events: Vec::new(),
            failures: Vec::new(),
            skipped: 0,
            aborted_builds: 0,
            archived_jobs: 0,
        }
    }

    fn no_action(hook: &ParsedHook, message: impl Into<String>) -> Self {
        let message = message.into();
        info!(hook_id = %hook.hook_id, "{}", message);
        Self {
            message: Some(message),
            ..Self::new(StatusCode::NO_CONTENT, hook)
        }
    }
}

/// Policy snapshot a delivery is processed under
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub settings: WebhookSettings,
    pub scm_context: Option<ScmContextConfig>,
}

/// Shared per-delivery facts handed to every pipeline's start
struct Delivery<'a> {
    hook: &'a ParsedHook,
    sha: &'a str,
    identity: &'a std::result::Result<ScmIdentity, String>,
    settings: &'a WebhookSettings,
    display_name: &'a str,
    skip_message: Option<&'a str>,
}

pub struct HookProcessor {
    pipelines: Arc<dyn PipelineDirectory>,
    jobs: Arc<dyn JobDirectory>,
    events: Arc<dyn EventFactory>,
    users: Arc<dyn UserDirectory>,
    scm: Arc<dyn ScmAdapter>,
}

impl HookProcessor {
    pub fn new(
        pipelines: Arc<dyn PipelineDirectory>,
        jobs: Arc<dyn JobDirectory>,
        events: Arc<dyn EventFactory>,
        users: Arc<dyn UserDirectory>,
        scm: Arc<dyn ScmAdapter>,
    ) -> Self {
        Self {
            pipelines,
            jobs,
            events,
            users,
            scm,
        }
    }

    /// Every directory backed by one in-memory store
    pub fn with_store(store: Arc<MemoryStore>, scm: Arc<dyn ScmAdapter>) -> Self {
        Self::new(store.clone(), store.clone(), store.clone(), store, scm)
    }

    #[instrument(skip_all, fields(hook_id = %hook.hook_id, action = %hook.action))]
    pub async fn process(&self, hook: ParsedHook, policy: &DeliveryPolicy) -> Result<HookOutcome> {
        let settings = &policy.settings;

        let skip_message = match commit_policy(&hook, settings) {
            CommitPolicy::Ignore { message } => return Ok(HookOutcome::no_action(&hook, message)),
            CommitPolicy::Proceed { skip_message } => skip_message,
        };

        let supported = match hook.kind {
            HookKind::Repo => matches!(
                hook.action,
                HookAction::Push | HookAction::Tag | HookAction::Release
            ),
            HookKind::Pr => matches!(
                hook.action,
                HookAction::Opened
                    | HookAction::Reopened
                    | HookAction::Synchronized
                    | HookAction::Closed
            ),
        };
        if !supported {
            return Ok(HookOutcome::no_action(
                &hook,
                format!("Action {} for {:?} hooks is not supported", hook.action, hook.kind),
            ));
        }
        let pr_number = match (hook.kind, hook.pr_number) {
            (HookKind::Pr, None) => {
                return Err(CicdError::InvalidPayload(
                    "pull request delivery without a number".to_string(),
                ));
            }
            (_, number) => number,
        };

        let subscribers = list_subscribers(self.pipelines.as_ref(), &hook).await?;
        if subscribers.is_empty() {
            return Ok(HookOutcome::no_action(
                &hook,
                format!("No pipelines subscribed to {}", hook.repo_identity()),
            ));
        }

        if let (HookAction::Closed, Some(number)) = (hook.action, pr_number) {
            let done = supersede(
                self.jobs.as_ref(),
                &subscribers,
                number,
                SupersedeReason::Closed,
            )
            .await;
            info!(aborted = done.aborted, archived = done.archived, "PR#{} closed", number);
            return Ok(HookOutcome {
                message: Some(format!("PR#{} closed", number)),
                aborted_builds: done.aborted,
                archived_jobs: done.archived,
                ..HookOutcome::new(StatusCode::OK, &hook)
            });
        }

        let identity = match resolve_identity(
            self.users.as_ref(),
            &hook,
            settings,
            policy.scm_context.as_ref(),
        )
        .await
        {
            Ok(identity) => Ok(identity),
            Err(CicdError::IdentityUnavailable(message)) => Err(message),
            Err(other) => Err(other.to_string()),
        };
        let lookup_config = |token: &str| ScmConfig {
            repo_identity: hook.repo_identity(),
            branch: hook.branch.clone(),
            token: token.to_string(),
            scm_context: hook.scm_context.clone(),
            pr_number,
        };

        let sha = if hook.action.is_tag_or_release() {
            let token = match &identity {
                Ok(identity) => identity.token.clone(),
                Err(message) => return Err(CicdError::IdentityUnavailable(message.clone())),
            };
            let tag = hook.tag_ref.clone().unwrap_or_default();
            match self
                .scm
                .get_commit_ref_sha(&lookup_config(&token), &tag, RefType::Tags)
                .await
            {
                Ok(sha) => sha,
                Err(e) => {
                    return Ok(HookOutcome::no_action(
                        &hook,
                        format!("Cannot resolve sha of {}: {}", tag, e),
                    ));
                }
            }
        } else {
            hook.sha.clone()
        };

        // None when the files are unknown: path-scoped pipelines are then
        // not filtered
        let changed_files = match (&identity, hook.action.is_tag_or_release()) {
            (Ok(identity), false) => {
                match self
                    .scm
                    .get_changed_files(&hook, &lookup_config(&identity.token))
                    .await
                {
                    Ok(files) => {
                        info!(count = files.len(), "changed files: {:?}", files);
                        Some(files)
                    }
                    Err(e) => {
                        warn!("changed files unknown: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let mut outcomes = Vec::new();
        let mut triggered = Vec::new();
        for pipeline in subscribers.iter().cloned() {
            match resolve_subscriber(pipeline, &hook, changed_files.as_deref()) {
                Resolution::Triggered(subscription) => triggered.push(subscription),
                Resolution::Skipped {
                    pipeline_id,
                    reason,
                } => outcomes.push(PipelineOutcome::skipped(pipeline_id, reason)),
                Resolution::Failed { pipeline_id, error } => {
                    outcomes.push(PipelineOutcome::Failed { pipeline_id, error })
                }
            }
        }

        let superseded = supersede_before_emit(self.jobs.as_ref(), &subscribers, &hook).await;

        let display_name = self.scm.get_display_name(&hook.scm_context);
        let delivery = Delivery {
            hook: &hook,
            sha: &sha,
            identity: &identity,
            settings,
            display_name: &display_name,
            skip_message: skip_message.as_deref(),
        };
        outcomes.extend(self.start_pipelines(&superseded, &delivery, triggered).await);

        let summary = summarize(outcomes);
        info!(
            status = summary.status.as_u16(),
            created = summary.events.len(),
            failed = summary.failures.len(),
            skipped = summary.skipped,
            "delivery processed"
        );
        Ok(HookOutcome {
            events: summary.events,
            failures: summary.failures,
            skipped: summary.skipped,
            aborted_builds: superseded.aborted,
            ..HookOutcome::new(summary.status, &hook)
        })
    }

    /// Emit phase, run concurrently across pipelines. Takes the completed
    /// supersession so it cannot start before the aborts settled.
    async fn start_pipelines(
        &self,
        _superseded: &Superseded,
        delivery: &Delivery<'_>,
        triggered: Vec<Subscription>,
    ) -> Vec<PipelineOutcome> {
        join_all(
            triggered
                .into_iter()
                .map(|subscription| self.start_pipeline(delivery, subscription)),
        )
        .await
    }

    async fn start_pipeline(
        &self,
        delivery: &Delivery<'_>,
        subscription: Subscription,
    ) -> PipelineOutcome {
        let hook = delivery.hook;
        let Subscription {
            pipeline,
            start_from,
            changed_files,
        } = subscription;

        let identity = match delivery.identity {
            Ok(identity) => identity,
            Err(message) => {
                return PipelineOutcome::Failed {
                    pipeline_id: pipeline.id,
                    error: CicdError::IdentityUnavailable(message.clone()),
                };
            }
        };
        if identity.source == IdentitySource::ActingUser {
            self.record_admin(pipeline.id, &identity.username).await;
        }
        let scm_config = pipeline.scm_config(&identity.token, &hook.scm_context, hook.pr_number);

        let config_pipeline_sha = match self.scm.get_commit_sha(&scm_config).await {
            Ok(sha) => sha,
            Err(e) => {
                if e.is_server_side() {
                    warn!(pipeline_id = pipeline.id, "failed to fetch config pipeline sha: {}", e);
                } else {
                    info!(
                        pipeline_id = pipeline.id,
                        "cannot create event for branch {}: {}", pipeline.default_branch, e
                    );
                }
                return PipelineOutcome::Failed {
                    pipeline_id: pipeline.id,
                    error: e,
                };
            }
        };

        let config = EventConfig::new(
            pipeline.id,
            hook,
            delivery.sha,
            config_pipeline_sha,
            start_from,
            cause_message(hook, delivery.display_name),
        )
        .with_changed_files(changed_files);

        let config = if hook.is_pull_request() {
            let source = hook.pr_source.unwrap_or(PrSource::Branch);
            let policy = pr_policy(delivery.settings, &pipeline.annotations, source);
            let pr_info = match self.scm.get_pr_info(hook, &scm_config).await {
                Ok(info) => info,
                Err(error) => {
                    warn!(pipeline_id = pipeline.id, "failed to fetch PR info: {}", error);
                    return PipelineOutcome::Failed {
                        pipeline_id: pipeline.id,
                        error,
                    };
                }
            };
            if let Some(reason) = &policy.decision.skip_reason {
                debug!(pipeline_id = pipeline.id, "{}", reason);
            }
            config
                .with_pull_request(hook, pr_info, policy.chain_pr)
                .with_skip_message(policy.decision.skip_reason)
        } else {
            config.with_skip_message(delivery.skip_message.map(String::from))
        };

        emit(self.events.as_ref(), config).await
    }

    /// The acting user of a triggered pipeline becomes its first admin.
    /// Failures are logged, never fatal.
    async fn record_admin(&self, pipeline_id: u64, username: &str) {
        if let Err(e) = self.pipelines.update_admins(pipeline_id, username).await {
            info!(pipeline_id, "admins not updated: {}", e);
        }
    }
}
