//! Subscriber resolution: which pipelines a delivery concerns, and from
//! which workflow node each of them starts

use tracing::{debug, info, warn};

use crate::changes::{changed_files_for, has_changes_under_root_dir};
use crate::directory::{PipelineDirectory, PipelineSubject};
use crate::error::{CicdError, Result};
use crate::job::PipelineId;
use crate::trigger::TriggerTarget;
use crate::webhook::ParsedHook;

/// A pipeline the delivery triggers
#[derive(Debug, Clone)]
pub struct Subscription {
    pub pipeline: PipelineSubject,
    pub start_from: String,
    /// Changed files scoped to the pipeline's root directory
    pub changed_files: Vec<String>,
}

#[derive(Debug)]
pub enum Resolution {
    Triggered(Subscription),
    Skipped { pipeline_id: PipelineId, reason: String },
    Failed { pipeline_id: PipelineId, error: CicdError },
}

/// Every pipeline registered for the delivery's repository
pub async fn list_subscribers(
    pipelines: &dyn PipelineDirectory,
    hook: &ParsedHook,
) -> Result<Vec<PipelineSubject>> {
    let repo = hook.repo_identity();
    let subscribers = pipelines.list(&repo).await?;
    debug!(
        hook_id = %hook.hook_id,
        repo = %repo,
        count = subscribers.len(),
        "subscribers listed"
    );
    Ok(subscribers)
}

/// Decides whether `pipeline` is triggered by `hook`.
///
/// Path-scoped pipelines are dropped when none of `changed_files` lies under
/// their root directory. Unknown changed files (`None`) filter nothing, and
/// neither do tag and release deliveries.
pub fn resolve_subscriber(
    pipeline: PipelineSubject,
    hook: &ParsedHook,
    changed_files: Option<&[String]>,
) -> Resolution {
    let pipeline_id = pipeline.id;
    let root_dir = pipeline.root_dir.as_deref();

    let filtered = match changed_files {
        Some(files) if !hook.action.is_tag_or_release() => {
            !has_changes_under_root_dir(root_dir, files)
        }
        _ => false,
    };
    if filtered {
        info!(
            hook_id = %hook.hook_id,
            pipeline_id,
            "no changes under root directory {}",
            root_dir.unwrap_or_default()
        );
        return Resolution::Skipped {
            pipeline_id,
            reason: "no changes under root directory".to_string(),
        };
    }

    let Some(target) = TriggerTarget::classify(hook) else {
        return Resolution::Skipped {
            pipeline_id,
            reason: format!("{} deliveries start nothing", hook.action),
        };
    };

    match pipeline.triggers.resolve(&target, &pipeline.default_branch) {
        Ok(Some(start_from)) => {
            debug!(
                hook_id = %hook.hook_id,
                pipeline_id,
                start_from = %start_from,
                "trigger matched"
            );
            let changed_files = changed_files
                .map(|files| changed_files_for(root_dir, files))
                .unwrap_or_default();
            Resolution::Triggered(Subscription {
                pipeline,
                start_from,
                changed_files,
            })
        }
        Ok(None) => {
            let wanted = target.baseline_symbol(&pipeline.default_branch);
            debug!(hook_id = %hook.hook_id, pipeline_id, "no node matches {}", wanted);
            Resolution::Skipped {
                pipeline_id,
                reason: format!("no workflow node matches {}", wanted),
            }
        }
        Err(error) => {
            warn!(
                hook_id = %hook.hook_id,
                pipeline_id,
                "trigger resolution failed: {}",
                error
            );
            Resolution::Failed { pipeline_id, error }
        }
    }
}
