//! Server configuration, read from a TOML file

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CicdError, Result};
use crate::restriction::RestrictPolicy;
use crate::trigger::WorkflowGraph;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
pub const DEFAULT_CONFIG_PATH: &str = "cicd_config.toml";
const DEFAULT_SERVICE_ACCOUNT: &str = "sd-buildbot";
const DEFAULT_SCM_CONTEXT: &str = "github:github.com";
const DEFAULT_MAX_BYTES: usize = 1024 * 1024; // 1MB
const DEFAULT_RATE_LIMIT: usize = 60;
const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub webhooks: WebhookSettings,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default, rename = "scm_context")]
    pub scm_contexts: Vec<ScmContextConfig>,
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<PipelineSeed>,
    #[serde(default, rename = "user")]
    pub users: Vec<UserSeed>,
    #[serde(default, rename = "branch_head")]
    pub branch_heads: Vec<RefSeed>,
    #[serde(default, rename = "tag")]
    pub tags: Vec<RefSeed>,
}

/// Cluster-wide webhook policy. Cloned per delivery, so a reload never
/// changes the rules in the middle of one hook's processing.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebhookSettings {
    /// Service account used when the acting user has no platform account
    #[serde(default = "default_service_account")]
    pub username: String,
    #[serde(default)]
    pub ignore_commits_by: Vec<String>,
    #[serde(default)]
    pub restrict_pr: RestrictPolicy,
    #[serde(default)]
    pub chain_pr: bool,
    /// Scm context deliveries to `/webhooks` are attributed to
    #[serde(default = "default_scm_context")]
    pub scm_context: String,
    pub secret: Option<String>,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            username: default_service_account(),
            ignore_commits_by: Vec::new(),
            restrict_pr: RestrictPolicy::default(),
            chain_pr: false,
            scm_context: default_scm_context(),
            secret: None,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub max_requests: usize,
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT,
            window_secs: DEFAULT_RATE_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LoggingConfig {
    /// When set, logs are also written to rolling files in this directory
    pub directory: Option<String>,
    /// daily, hourly or never
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScmContextConfig {
    pub name: String,
    pub display_name: String,
    /// Token used for every lookup in a read-only context
    pub read_only_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineSeed {
    pub id: u64,
    pub checkout_url: String,
    pub branch: String,
    pub root_dir: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub workflow_graph: WorkflowGraph,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UserSeed {
    pub username: String,
    pub scm_context: String,
    pub token: String,
}

/// A branch head or tag known to the local SCM adapter
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RefSeed {
    pub checkout_url: String,
    pub name: String,
    pub sha: String,
}

fn default_service_account() -> String {
    DEFAULT_SERVICE_ACCOUNT.to_string()
}

fn default_scm_context() -> String {
    DEFAULT_SCM_CONTEXT.to_string()
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES
}

fn default_rate_limit() -> usize {
    DEFAULT_RATE_LIMIT
}

fn default_rate_window() -> u64 {
    DEFAULT_RATE_WINDOW_SECS
}

impl AppConfig {
    /// Parses and validates a configuration document
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for pipeline in &self.pipelines {
            if !ids.insert(pipeline.id) {
                return Err(CicdError::ConfigError(format!(
                    "pipeline id {} is declared more than once",
                    pipeline.id
                )));
            }
            if pipeline.branch.is_empty() {
                return Err(CicdError::ConfigError(format!(
                    "pipeline {} has an empty branch",
                    pipeline.id
                )));
            }
        }
        if self.rate_limit.window_secs == 0 {
            return Err(CicdError::ConfigError(
                "rate_limit.window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scm_context(&self, name: &str) -> Option<&ScmContextConfig> {
        self.scm_contexts.iter().find(|c| c.name == name)
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        CicdError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;

    AppConfig::from_toml(&config_str).map_err(|e| {
        CicdError::ConfigError(format!("Failed to parse config file '{}': {}", path.display(), e))
    })
}

/// Async variant used by the reload endpoint
pub async fn reload_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        CicdError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    AppConfig::from_toml(&config_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restriction::RestrictPr;

    const SAMPLE: &str = r#"
[webhooks]
username = "buildbot"
ignore_commits_by = ["renovate"]
restrict_pr = "fork"
chain_pr = true

[[scm_context]]
name = "github:github.com"
display_name = "github"

[[pipeline]]
id = 1
checkout_url = "git@github.com:acme/app.git"
branch = "master"
root_dir = "services/api"
annotations = { "screwdriver.cd/restrictPR" = "none" }

[pipeline.workflow_graph]
nodes = [{ name = "~commit" }, { name = "main" }]
edges = [{ src = "~commit", dest = "main" }]

[[user]]
username = "alice"
scm_context = "github:github.com"
token = "t0k3n"
"#;

    #[test]
    fn parses_full_document() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.webhooks.username, "buildbot");
        assert_eq!(config.webhooks.restrict_pr.scope, RestrictPr::Fork);
        assert!(config.webhooks.chain_pr);
        assert_eq!(config.webhooks.max_bytes, DEFAULT_MAX_BYTES);
        assert_eq!(config.pipelines.len(), 1);
        assert_eq!(config.pipelines[0].workflow_graph.nodes.len(), 2);
        assert_eq!(config.pipelines[0].root_dir.as_deref(), Some("services/api"));
        assert_eq!(config.users[0].token, "t0k3n");
        assert!(config.scm_context("github:github.com").is_some());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.webhooks.username, DEFAULT_SERVICE_ACCOUNT);
        assert_eq!(config.webhooks.restrict_pr.scope, RestrictPr::None);
        assert_eq!(config.rate_limit.max_requests, DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn rejects_duplicate_pipeline_ids() {
        let doc = r#"
[[pipeline]]
id = 3
checkout_url = "git@github.com:a/b.git"
branch = "master"

[[pipeline]]
id = 3
checkout_url = "git@github.com:a/c.git"
branch = "master"
"#;
        let err = AppConfig::from_toml(doc).unwrap_err();
        assert!(matches!(err, CicdError::ConfigError(_)));
    }
}
