//! Config-backed SCM adapter for the standalone server
//!
//! Branch heads and tags come from the `[[branch_head]]` and `[[tag]]`
//! tables; pull-request metadata and changed files come from the delivery
//! itself. Unknown refs answer with a 404-equivalent error, like a provider
//! would for a missing branch.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{AppConfig, RefSeed};
use crate::error::{CicdError, Result};
use crate::scm::{PrInfo, RefType, ScmAdapter, ScmConfig};
use crate::webhook::{ParsedHook, PrSource, repo_identity_from_url};

type RefKey = (String, String);

#[derive(Debug, Default)]
struct LocalRefs {
    heads: HashMap<RefKey, String>,
    tags: HashMap<RefKey, String>,
    display_names: HashMap<String, String>,
}

impl LocalRefs {
    fn from_config(config: &AppConfig) -> Self {
        fn index(seeds: &[RefSeed]) -> HashMap<RefKey, String> {
            seeds
                .iter()
                .map(|r| {
                    (
                        (repo_identity_from_url(&r.checkout_url), r.name.clone()),
                        r.sha.clone(),
                    )
                })
                .collect()
        }

        Self {
            heads: index(&config.branch_heads),
            tags: index(&config.tags),
            display_names: config
                .scm_contexts
                .iter()
                .map(|c| (c.name.clone(), c.display_name.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct LocalScm {
    refs: RwLock<LocalRefs>,
}

impl LocalScm {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            refs: RwLock::new(LocalRefs::from_config(config)),
        }
    }

    /// Replaces the known refs after a configuration reload
    pub fn reload(&self, config: &AppConfig) {
        let mut refs = self.refs.write().unwrap();
        *refs = LocalRefs::from_config(config);
    }

    fn lookup(&self, ref_type: RefType, repo: &str, name: &str) -> Option<String> {
        let refs = self.refs.read().unwrap();
        let table = match ref_type {
            RefType::Heads => &refs.heads,
            RefType::Tags => &refs.tags,
        };
        table.get(&(repo.to_string(), name.to_string())).cloned()
    }
}

/// `https://<host>/<owner>/<repo>/pull/<n>` from a `host:owner/repo` identity
fn pull_request_url(repo_identity: &str, number: u64) -> String {
    match repo_identity.split_once(':') {
        Some((host, path)) => format!("https://{}/{}/pull/{}", host, path, number),
        None => format!("{}/pull/{}", repo_identity, number),
    }
}

#[async_trait]
impl ScmAdapter for LocalScm {
    async fn get_pr_info(&self, hook: &ParsedHook, config: &ScmConfig) -> Result<PrInfo> {
        let number = config
            .pr_number
            .or(hook.pr_number)
            .ok_or_else(|| CicdError::scm(404, "no pull request number"))?;

        Ok(PrInfo {
            sha: hook.sha.clone(),
            git_ref: hook
                .pr_ref
                .clone()
                .unwrap_or_else(|| format!("pull/{}/merge", number)),
            pr_source: hook.pr_source.unwrap_or(PrSource::Branch),
            url: pull_request_url(&config.repo_identity, number),
            username: hook.username.clone(),
        })
    }

    /// Push deliveries list their files; pull-request file lists are not
    /// known locally.
    async fn get_changed_files(
        &self,
        hook: &ParsedHook,
        _config: &ScmConfig,
    ) -> Result<Vec<String>> {
        if hook.is_pull_request() {
            return Err(CicdError::scm(
                404,
                format!(
                    "Files changed by PR#{} are not tracked locally",
                    hook.pr_number.unwrap_or_default()
                ),
            ));
        }
        Ok(hook.payload_changed_files.clone())
    }

    async fn get_commit_sha(&self, config: &ScmConfig) -> Result<String> {
        self.lookup(RefType::Heads, &config.repo_identity, &config.branch)
            .ok_or_else(|| {
                debug!(
                    repo = %config.repo_identity,
                    branch = %config.branch,
                    "unknown branch head"
                );
                CicdError::scm(
                    404,
                    format!("Branch {} not found in {}", config.branch, config.repo_identity),
                )
            })
    }

    async fn get_commit_ref_sha(
        &self,
        config: &ScmConfig,
        git_ref: &str,
        ref_type: RefType,
    ) -> Result<String> {
        self.lookup(ref_type, &config.repo_identity, git_ref)
            .ok_or_else(|| {
                CicdError::scm(
                    404,
                    format!("Ref {} not found in {}", git_ref, config.repo_identity),
                )
            })
    }

    fn get_display_name(&self, scm_context: &str) -> String {
        let refs = self.refs.read().unwrap();
        refs.display_names
            .get(scm_context)
            .cloned()
            .unwrap_or_else(|| {
                scm_context
                    .split_once(':')
                    .map(|(kind, _)| kind.to_string())
                    .unwrap_or_else(|| scm_context.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::{HookAction, HookKind};

    fn scm() -> LocalScm {
        let config = AppConfig::from_toml(
            r#"
[[scm_context]]
name = "github:github.com"
display_name = "github"

[[branch_head]]
checkout_url = "git@github.com:acme/app.git"
name = "master"
sha = "1111"

[[tag]]
checkout_url = "https://github.com/acme/app.git"
name = "v1.0.0"
sha = "2222"
"#,
        )
        .unwrap();
        LocalScm::from_config(&config)
    }

    fn scm_config(branch: &str) -> ScmConfig {
        ScmConfig {
            repo_identity: "github.com:acme/app".to_string(),
            branch: branch.to_string(),
            token: "t".to_string(),
            scm_context: "github:github.com".to_string(),
            pr_number: None,
        }
    }

    #[tokio::test]
    async fn resolves_known_heads_and_tags() {
        let scm = scm();
        assert_eq!(scm.get_commit_sha(&scm_config("master")).await.unwrap(), "1111");
        assert_eq!(
            scm.get_commit_ref_sha(&scm_config("master"), "v1.0.0", RefType::Tags)
                .await
                .unwrap(),
            "2222"
        );
    }

    #[tokio::test]
    async fn unknown_branch_is_a_client_side_error() {
        let err = scm().get_commit_sha(&scm_config("gone")).await.unwrap_err();
        assert!(!err.is_server_side());
    }

    fn pr_hook(number: u64) -> ParsedHook {
        let mut hook = ParsedHook::push(
            "h",
            "git@github.com:acme/app.git",
            "master",
            "abc",
            "alice",
            "github:github.com",
        );
        hook.kind = HookKind::Pr;
        hook.action = HookAction::Opened;
        hook.pr_number = Some(number);
        hook.pr_source = Some(PrSource::Fork);
        hook
    }

    #[tokio::test]
    async fn pr_info_comes_from_the_delivery() {
        let hook = pr_hook(4);

        let info = scm().get_pr_info(&hook, &scm_config("master")).await.unwrap();
        assert_eq!(info.sha, "abc");
        assert_eq!(info.git_ref, "pull/4/merge");
        assert_eq!(info.pr_source, PrSource::Fork);
        assert_eq!(info.url, "https://github.com/acme/app/pull/4");
    }

    #[tokio::test]
    async fn changed_files_of_pull_requests_are_unknown() {
        let scm = scm();
        assert!(scm.get_changed_files(&pr_hook(4), &scm_config("master")).await.is_err());

        let mut push = ParsedHook::push(
            "h",
            "git@github.com:acme/app.git",
            "master",
            "abc",
            "alice",
            "github:github.com",
        );
        push.payload_changed_files = vec!["api/main.rs".to_string()];
        assert_eq!(
            scm.get_changed_files(&push, &scm_config("master")).await.unwrap(),
            vec!["api/main.rs".to_string()]
        );
    }

    #[test]
    fn display_name_falls_back_to_context_kind() {
        let scm = scm();
        assert_eq!(scm.get_display_name("github:github.com"), "github");
        assert_eq!(scm.get_display_name("gitlab:gitlab.com"), "gitlab");
    }
}
