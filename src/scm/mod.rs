//! Source-control collaborators
//!
//! The engine talks to the source-control provider through two seams:
//! [`HookParser`] turns a raw delivery into a [`ParsedHook`], and
//! [`ScmAdapter`] answers the supplementary lookups made while resolving
//! triggers (commit heads, changed files, pull-request metadata).

pub mod github;
pub mod local;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::webhook::{ParsedHook, PrSource};

pub use github::GithubHookParser;
pub use local::LocalScm;

/// Credentials and coordinates for one adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmConfig {
    pub repo_identity: String,
    pub branch: String,
    pub token: String,
    pub scm_context: String,
    pub pr_number: Option<u64>,
}

/// Kind of git reference resolved by [`ScmAdapter::get_commit_ref_sha`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    Tags,
    Heads,
}

/// Pull-request metadata attached to PR events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrInfo {
    pub sha: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub pr_source: PrSource,
    pub url: String,
    pub username: String,
}

/// Normalizes provider deliveries.
///
/// `Ok(None)` means the delivery is well-formed but carries nothing the
/// engine acts on (e.g. a `ping` or a label change).
pub trait HookParser: Send + Sync {
    fn parse_hook(&self, headers: &HeaderMap, body: &[u8]) -> Result<Option<ParsedHook>>;
}

#[async_trait]
pub trait ScmAdapter: Send + Sync {
    async fn get_pr_info(&self, hook: &ParsedHook, config: &ScmConfig) -> Result<PrInfo>;

    async fn get_changed_files(&self, hook: &ParsedHook, config: &ScmConfig) -> Result<Vec<String>>;

    /// Head sha of `config.branch`.
    async fn get_commit_sha(&self, config: &ScmConfig) -> Result<String>;

    async fn get_commit_ref_sha(
        &self,
        config: &ScmConfig,
        git_ref: &str,
        ref_type: RefType,
    ) -> Result<String>;

    fn get_display_name(&self, scm_context: &str) -> String;
}
