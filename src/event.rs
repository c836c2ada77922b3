//! Event configuration assembly and submission
//!
//! One [`EventConfig`] is built per triggered pipeline and handed to the
//! [`EventFactory`] exactly once. Each pipeline of a fan-out ends in a
//! [`PipelineOutcome`]; [`summarize`] folds them into the answer for the
//! whole delivery.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::directory::EventFactory;
use crate::error::CicdError;
use crate::job::PipelineId;
use crate::scm::PrInfo;
use crate::webhook::{HookAction, ParsedHook, PrSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pipeline,
    Pr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(default, skip_serializing_if = "SdMeta::is_empty")]
    pub sd: SdMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrMeta>,
}

impl SdMeta {
    fn is_empty(&self) -> bool {
        self.release.is_none() && self.tag.is_none() && self.pr.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMeta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMeta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrMeta {
    pub name: Option<String>,
    pub merged: bool,
    pub number: Option<u64>,
}

impl EventMeta {
    /// Structured data carried over from the delivery: release and tag
    /// names, or the state of a closed pull request.
    pub fn from_hook(hook: &ParsedHook) -> Self {
        let tag = || TagMeta {
            name: hook.tag_ref.clone(),
        };
        let sd = match hook.action {
            HookAction::Release => SdMeta {
                release: Some(ReleaseMeta {
                    id: hook.release_id.clone(),
                    name: hook.release_name.clone(),
                    author: hook.release_author.clone(),
                }),
                tag: Some(tag()),
                pr: None,
            },
            HookAction::Tag => SdMeta {
                tag: Some(tag()),
                ..SdMeta::default()
            },
            HookAction::Closed => SdMeta {
                pr: Some(PrMeta {
                    name: hook.pr_ref.clone(),
                    merged: hook.pr_merged.unwrap_or(false),
                    number: hook.pr_number,
                }),
                ..SdMeta::default()
            },
            _ => SdMeta::default(),
        };
        Self { sd }
    }
}

/// Human-readable reason an event was started
pub fn cause_message(hook: &ParsedHook, scm_display_name: &str) -> String {
    if hook.is_pull_request() {
        format!(
            "{} by {}:{}",
            hook.action.title(),
            scm_display_name,
            hook.username
        )
    } else {
        format!("Merged by {}", hook.username)
    }
}

/// Request submitted to the event factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventConfig {
    pub pipeline_id: PipelineId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "webhooks")]
    pub source_is_webhook: bool,
    pub username: String,
    pub scm_context: String,
    pub sha: String,
    pub config_pipeline_sha: String,
    pub start_from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_num: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_info: Option<PrInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_source: Option<PrSource>,
    #[serde(rename = "chainPR", skip_serializing_if = "Option::is_none")]
    pub chain_pr: Option<bool>,
    pub changed_files: Vec<String>,
    pub cause_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_message: Option<String>,
    pub meta: EventMeta,
}

impl EventConfig {
    /// Base configuration shared by every event started from `hook`.
    pub fn new(
        pipeline_id: PipelineId,
        hook: &ParsedHook,
        sha: impl Into<String>,
        config_pipeline_sha: impl Into<String>,
        start_from: impl Into<String>,
        cause_message: impl Into<String>,
    ) -> Self {
        let kind = if hook.is_pull_request() {
            EventKind::Pr
        } else {
            EventKind::Pipeline
        };
        Self {
            pipeline_id,
            kind,
            source_is_webhook: true,
            username: hook.username.clone(),
            scm_context: hook.scm_context.clone(),
            sha: sha.into(),
            config_pipeline_sha: config_pipeline_sha.into(),
            start_from: start_from.into(),
            commit_branch: (kind == EventKind::Pipeline).then(|| hook.branch.clone()),
            base_branch: None,
            pr_num: None,
            pr_ref: None,
            pr_title: None,
            pr_info: None,
            pr_source: None,
            chain_pr: None,
            changed_files: Vec::new(),
            cause_message: cause_message.into(),
            skip_message: None,
            meta: EventMeta::from_hook(hook),
        }
    }

    pub fn with_changed_files(mut self, changed_files: Vec<String>) -> Self {
        self.changed_files = changed_files;
        self
    }

    pub fn with_skip_message(mut self, skip_message: Option<String>) -> Self {
        self.skip_message = skip_message;
        self
    }

    /// Pull-request fields, taken from the delivery and the adapter's PR info
    pub fn with_pull_request(mut self, hook: &ParsedHook, pr_info: PrInfo, chain_pr: bool) -> Self {
        self.base_branch = Some(hook.branch.clone());
        self.pr_num = hook.pr_number;
        self.pr_ref = hook.pr_ref.clone();
        self.pr_title = hook.pr_title.clone();
        self.pr_source = hook.pr_source.or(Some(pr_info.pr_source));
        self.pr_info = Some(pr_info);
        self.chain_pr = Some(chain_pr);
        self
    }
}

/// Event created by the factory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: u64,
    pub create_time: DateTime<Utc>,
    #[serde(flatten)]
    pub config: EventConfig,
}

impl Event {
    pub fn pipeline_id(&self) -> PipelineId {
        self.config.pipeline_id
    }
}

/// Result of processing one subscribed pipeline
#[derive(Debug)]
pub enum PipelineOutcome {
    Created(Event),
    /// Not triggered: no matching node, out-of-scope changes, unknown branch
    Skipped { pipeline_id: PipelineId, reason: String },
    Failed { pipeline_id: PipelineId, error: CicdError },
}

impl PipelineOutcome {
    pub fn skipped(pipeline_id: PipelineId, reason: impl Into<String>) -> Self {
        PipelineOutcome::Skipped {
            pipeline_id,
            reason: reason.into(),
        }
    }
}

/// Submits one event, turning factory rejections into a per-pipeline failure
pub async fn emit(factory: &dyn EventFactory, config: EventConfig) -> PipelineOutcome {
    let pipeline_id = config.pipeline_id;
    match factory.create(config).await {
        Ok(event) => {
            info!(
                pipeline_id,
                event_id = event.id,
                start_from = %event.config.start_from,
                "event created"
            );
            PipelineOutcome::Created(event)
        }
        Err(e) => {
            error!(pipeline_id, "failed to create event: {}", e);
            let error = match e {
                err @ CicdError::EventCreationFailed { .. } => err,
                err @ CicdError::Scm { .. } => err,
                other => CicdError::EventCreationFailed {
                    status: 500,
                    message: other.to_string(),
                },
            };
            PipelineOutcome::Failed { pipeline_id, error }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFailure {
    pub pipeline_id: PipelineId,
    pub status: u16,
    pub message: String,
}

/// Answer for a whole delivery
#[derive(Debug)]
pub struct FanOutSummary {
    pub status: StatusCode,
    pub events: Vec<Event>,
    pub failures: Vec<PipelineFailure>,
    pub skipped: usize,
}

/// Best-effort fold of per-pipeline outcomes.
///
/// Any created event answers `201` (failures are reported alongside); with
/// nothing created a single failure keeps its own status, several failures
/// answer `500`, and no failure at all answers `204`.
pub fn summarize(outcomes: Vec<PipelineOutcome>) -> FanOutSummary {
    let mut events = Vec::new();
    let mut failures = Vec::new();
    let mut skipped = 0;

    for outcome in outcomes {
        match outcome {
            PipelineOutcome::Created(event) => events.push(event),
            PipelineOutcome::Skipped { .. } => skipped += 1,
            PipelineOutcome::Failed { pipeline_id, error } => failures.push(PipelineFailure {
                pipeline_id,
                status: error.status_code().as_u16(),
                message: error.to_string(),
            }),
        }
    }

    let status = if !events.is_empty() {
        StatusCode::CREATED
    } else {
        match failures.as_slice() {
            [] => StatusCode::NO_CONTENT,
            [only] => {
                StatusCode::from_u16(only.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    };

    FanOutSummary {
        status,
        events,
        failures,
        skipped,
    }
}
