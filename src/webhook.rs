//! Webhook related structures

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `git@host:owner/repo.git`, `https://host/owner/repo.git#branch`, ...
static CHECKOUT_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:(?:https?|git)://)?(?:[^@/]+@)?",
        r"([^/:]+)[/:]([^/]+)/([^/#]+?)(?:\.git)?(?:#.*)?$"
    ))
    .expect("checkout url pattern is valid")
});

/// Whether the delivery concerns the repository itself or a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    Repo,
    Pr,
}

/// Normalized action carried by a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookAction {
    Push,
    Tag,
    Release,
    Opened,
    Reopened,
    Synchronized,
    Closed,
    #[serde(other)]
    Other,
}

impl HookAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookAction::Push => "push",
            HookAction::Tag => "tag",
            HookAction::Release => "release",
            HookAction::Opened => "opened",
            HookAction::Reopened => "reopened",
            HookAction::Synchronized => "synchronized",
            HookAction::Closed => "closed",
            HookAction::Other => "other",
        }
    }

    /// Capitalized form used in cause messages ("Opened by ...").
    pub fn title(&self) -> String {
        let s = self.as_str();
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn is_tag_or_release(&self) -> bool {
        matches!(self, HookAction::Tag | HookAction::Release)
    }
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrSource {
    Branch,
    Fork,
}

impl PrSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrSource::Branch => "branch",
            PrSource::Fork => "fork",
        }
    }
}

impl fmt::Display for PrSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form of one webhook delivery, produced once by a hook parser
/// and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedHook {
    pub kind: HookKind,
    pub action: HookAction,
    pub hook_id: String,
    pub username: String,
    pub scm_context: String,
    pub checkout_url: String,
    /// Pushed branch, or the base branch of a pull request.
    pub branch: String,
    /// Empty for tag and release deliveries until resolved.
    pub sha: String,
    pub pr_number: Option<u64>,
    pub pr_source: Option<PrSource>,
    pub pr_ref: Option<String>,
    pub pr_title: Option<String>,
    pub pr_merged: Option<bool>,
    /// Tag name for tag and release deliveries.
    pub tag_ref: Option<String>,
    pub release_id: Option<String>,
    pub release_name: Option<String>,
    pub release_author: Option<String>,
    pub last_commit_message: Option<String>,
    #[serde(default)]
    pub commit_authors: Vec<String>,
    /// Files the provider listed in the payload itself (push deliveries).
    #[serde(default)]
    pub payload_changed_files: Vec<String>,
}

impl ParsedHook {
    /// Minimal push delivery, used as a starting point by parsers and tests
    pub fn push(
        hook_id: impl Into<String>,
        checkout_url: impl Into<String>,
        branch: impl Into<String>,
        sha: impl Into<String>,
        username: impl Into<String>,
        scm_context: impl Into<String>,
    ) -> Self {
        Self {
            kind: HookKind::Repo,
            action: HookAction::Push,
            hook_id: hook_id.into(),
            username: username.into(),
            scm_context: scm_context.into(),
            checkout_url: checkout_url.into(),
            branch: branch.into(),
            sha: sha.into(),
            pr_number: None,
            pr_source: None,
            pr_ref: None,
            pr_title: None,
            pr_merged: None,
            tag_ref: None,
            release_id: None,
            release_name: None,
            release_author: None,
            last_commit_message: None,
            commit_authors: Vec::new(),
            payload_changed_files: Vec::new(),
        }
    }

    pub fn is_pull_request(&self) -> bool {
        self.kind == HookKind::Pr
    }

    /// Repository identity (`host:owner/repo`, lowercased) derived from the
    /// checkout URL. Falls back to the trimmed URL when it does not parse.
    pub fn repo_identity(&self) -> String {
        repo_identity_from_url(&self.checkout_url)
    }
}

/// Normalizes a checkout URL into the identity pipelines are registered under.
pub fn repo_identity_from_url(checkout_url: &str) -> String {
    match CHECKOUT_URL.captures(checkout_url.trim()) {
        Some(caps) => format!("{}:{}/{}", &caps[1], &caps[2], &caps[3]).to_lowercase(),
        None => checkout_url.trim().trim_end_matches(".git").to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_identity_ignores_url_flavour() {
        let expected = "github.com:screwdriver-cd/ui";
        assert_eq!(
            repo_identity_from_url("git@github.com:screwdriver-cd/ui.git"),
            expected
        );
        assert_eq!(
            repo_identity_from_url("https://github.com/screwdriver-cd/ui.git"),
            expected
        );
        assert_eq!(
            repo_identity_from_url("https://GitHub.com/Screwdriver-cd/UI#master"),
            expected
        );
    }

    #[test]
    fn action_title_for_cause_message() {
        assert_eq!(HookAction::Opened.title(), "Opened");
        assert_eq!(HookAction::Synchronized.title(), "Synchronized");
    }

    #[test]
    fn unknown_action_deserializes_as_other() {
        let action: HookAction = serde_json::from_str("\"labeled\"").unwrap();
        assert_eq!(action, HookAction::Other);
    }
}
