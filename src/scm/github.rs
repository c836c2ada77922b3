//! GitHub delivery normalizer

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CicdError, Result};
use crate::scm::HookParser;
use crate::utils::{truncate_message, verify_github_signature};
use crate::webhook::{HookAction, HookKind, ParsedHook, PrSource};

const EVENT_HEADER: &str = "x-github-event";
const DELIVERY_HEADER: &str = "x-github-delivery";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Parses GitHub `push`, `pull_request`, `create` (tag) and `release`
/// deliveries, verifying the HMAC signature when a secret is configured.
#[derive(Debug, Clone)]
pub struct GithubHookParser {
    scm_context: String,
    secret: Option<String>,
}

impl GithubHookParser {
    pub fn new(scm_context: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            scm_context: scm_context.into(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<()> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                CicdError::WebhookValidationFailed("no signature header supplied".to_string())
            })?;
        if !verify_github_signature(secret, body, signature) {
            return Err(CicdError::WebhookValidationFailed(
                "signature verification failed".to_string(),
            ));
        }
        Ok(())
    }

    fn base_hook(&self, hook_id: &str, payload: &Value, branch: &str) -> Result<ParsedHook> {
        let checkout_url = str_at(payload, "/repository/clone_url")
            .or_else(|| str_at(payload, "/repository/ssh_url"))
            .ok_or_else(|| CicdError::InvalidPayload("missing repository url".to_string()))?;
        let username = str_at(payload, "/sender/login")
            .or_else(|| str_at(payload, "/pusher/name"))
            .unwrap_or_default();

        Ok(ParsedHook::push(
            hook_id,
            checkout_url,
            branch,
            "",
            username,
            self.scm_context.clone(),
        ))
    }

    fn parse_push(&self, hook_id: &str, payload: &Value) -> Result<Option<ParsedHook>> {
        let git_ref = str_at(payload, "/ref")
            .ok_or_else(|| CicdError::InvalidPayload("no ref field in push payload".to_string()))?;
        let Some(branch) = git_ref.strip_prefix("refs/heads/") else {
            // tag pushes arrive separately as `create` deliveries
            debug!(hook_id, git_ref, "Ignoring push of non-branch ref");
            return Ok(None);
        };
        if payload.get("deleted").and_then(Value::as_bool) == Some(true) {
            info!(hook_id, branch, "Ignoring branch deletion");
            return Ok(None);
        }

        let mut hook = self.base_hook(hook_id, payload, branch)?;
        hook.sha = str_at(payload, "/after").unwrap_or_default().to_string();
        hook.last_commit_message = str_at(payload, "/head_commit/message").map(truncate_message);

        let commits = payload
            .get("commits")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for commit in commits {
            if let Some(author) = str_at(commit, "/author/username") {
                if !hook.commit_authors.iter().any(|a| a == author) {
                    hook.commit_authors.push(author.to_string());
                }
            }
            for field in ["added", "modified", "removed"] {
                let files = commit.get(field).and_then(Value::as_array);
                for file in files.into_iter().flatten().filter_map(Value::as_str) {
                    if !hook.payload_changed_files.iter().any(|f| f == file) {
                        hook.payload_changed_files.push(file.to_string());
                    }
                }
            }
        }

        Ok(Some(hook))
    }

    fn parse_pull_request(&self, hook_id: &str, payload: &Value) -> Result<Option<ParsedHook>> {
        let action = match str_at(payload, "/action") {
            Some("opened") => HookAction::Opened,
            Some("reopened") => HookAction::Reopened,
            Some("synchronize") => HookAction::Synchronized,
            Some("closed") => HookAction::Closed,
            other => {
                debug!(hook_id, action = ?other, "Ignoring pull request action");
                return Ok(None);
            }
        };
        let number = payload
            .get("number")
            .and_then(Value::as_u64)
            .ok_or_else(|| CicdError::InvalidPayload("missing pull request number".to_string()))?;
        let branch = str_at(payload, "/pull_request/base/ref")
            .ok_or_else(|| CicdError::InvalidPayload("missing pull request base".to_string()))?;

        let head_repo = str_at(payload, "/pull_request/head/repo/full_name");
        let base_repo = str_at(payload, "/pull_request/base/repo/full_name");
        let source = if head_repo.is_some() && head_repo == base_repo {
            PrSource::Branch
        } else {
            PrSource::Fork
        };

        let mut hook = self.base_hook(hook_id, payload, branch)?;
        hook.kind = HookKind::Pr;
        hook.action = action;
        hook.sha = str_at(payload, "/pull_request/head/sha")
            .unwrap_or_default()
            .to_string();
        hook.pr_number = Some(number);
        hook.pr_source = Some(source);
        hook.pr_ref = Some(format!("pull/{}/merge", number));
        hook.pr_title = str_at(payload, "/pull_request/title").map(str::to_string);
        hook.pr_merged = payload
            .pointer("/pull_request/merged")
            .and_then(Value::as_bool);

        Ok(Some(hook))
    }

    fn parse_tag(&self, hook_id: &str, payload: &Value) -> Result<Option<ParsedHook>> {
        if str_at(payload, "/ref_type") != Some("tag") {
            return Ok(None);
        }
        let branch = str_at(payload, "/repository/default_branch").unwrap_or("master");
        let mut hook = self.base_hook(hook_id, payload, branch)?;
        hook.action = HookAction::Tag;
        hook.tag_ref = str_at(payload, "/ref").map(str::to_string);
        Ok(Some(hook))
    }

    fn parse_release(&self, hook_id: &str, payload: &Value) -> Result<Option<ParsedHook>> {
        if !matches!(str_at(payload, "/action"), Some("published" | "released")) {
            return Ok(None);
        }
        let branch = str_at(payload, "/repository/default_branch").unwrap_or("master");
        let mut hook = self.base_hook(hook_id, payload, branch)?;
        hook.action = HookAction::Release;
        hook.tag_ref = str_at(payload, "/release/tag_name").map(str::to_string);
        hook.release_id = payload.pointer("/release/id").map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        hook.release_name = str_at(payload, "/release/name").map(str::to_string);
        hook.release_author = str_at(payload, "/release/author/login").map(str::to_string);
        Ok(Some(hook))
    }
}

impl HookParser for GithubHookParser {
    fn parse_hook(&self, headers: &HeaderMap, body: &[u8]) -> Result<Option<ParsedHook>> {
        let event = headers
            .get(EVENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CicdError::InvalidPayload(format!("missing {} header", EVENT_HEADER)))?;

        self.verify(headers, body)?;

        let hook_id = headers
            .get(DELIVERY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| CicdError::InvalidPayload(format!("could not parse JSON body: {}", e)))?;

        match event {
            "push" => self.parse_push(&hook_id, &payload),
            "pull_request" => self.parse_pull_request(&hook_id, &payload),
            "create" => self.parse_tag(&hook_id, &payload),
            "release" => self.parse_release(&hook_id, &payload),
            other => {
                info!(hook_id = %hook_id, "Not a supported event; Received {:?} event", other);
                Ok(None)
            }
        }
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}
