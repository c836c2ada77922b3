//! Pull-request restriction policy and commit-level skip rules

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::WebhookSettings;
use crate::error::CicdError;
use crate::webhook::{ParsedHook, PrSource};

pub const ANNOT_CHAIN_PR: &str = "screwdriver.cd/chainPR";
pub const ANNOT_RESTRICT_PR: &str = "screwdriver.cd/restrictPR";

pub const SKIP_CI_MESSAGE: &str = "Skipping due to the commit message: [skip ci]";

static SKIP_CI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(skip ci|ci skip)\]").expect("skip marker pattern is valid"));

/// Which pull-request sources are kept from building
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestrictPr {
    #[default]
    None,
    Fork,
    Branch,
    All,
}

impl RestrictPr {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestrictPr::None => "none",
            RestrictPr::Fork => "fork",
            RestrictPr::Branch => "branch",
            RestrictPr::All => "all",
        }
    }

    pub fn restricts(&self, source: PrSource) -> bool {
        match self {
            RestrictPr::None => false,
            RestrictPr::Fork => source == PrSource::Fork,
            RestrictPr::Branch => source == PrSource::Branch,
            RestrictPr::All => true,
        }
    }
}

impl FromStr for RestrictPr {
    type Err = CicdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RestrictPr::None),
            "fork" => Ok(RestrictPr::Fork),
            "branch" => Ok(RestrictPr::Branch),
            "all" => Ok(RestrictPr::All),
            other => Err(CicdError::ConfigError(format!(
                "unknown restrictPR value '{}'",
                other
            ))),
        }
    }
}

/// Cluster-level restriction. An `-admin` suffix locks the value so pipeline
/// annotations cannot override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RestrictPolicy {
    pub scope: RestrictPr,
    pub locked: bool,
}

impl FromStr for RestrictPolicy {
    type Err = CicdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_suffix("-admin") {
            Some(base) => Ok(Self {
                scope: base.parse()?,
                locked: true,
            }),
            None => Ok(Self {
                scope: s.parse()?,
                locked: false,
            }),
        }
    }
}

impl TryFrom<String> for RestrictPolicy {
    type Error = CicdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RestrictPolicy> for String {
    fn from(policy: RestrictPolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for RestrictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.locked {
            write!(f, "{}-admin", self.scope.as_str())
        } else {
            f.write_str(self.scope.as_str())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionDecision {
    pub allowed: bool,
    pub skip_reason: Option<String>,
}

/// Restriction outcome for one PR source
pub fn evaluate(restriction: RestrictPr, source: PrSource) -> RestrictionDecision {
    if restriction.restricts(source) {
        RestrictionDecision {
            allowed: false,
            skip_reason: Some(format!(
                "Skipping build since pipeline is configured to restrict {} and PR is {}",
                restriction.as_str(),
                source
            )),
        }
    } else {
        RestrictionDecision {
            allowed: true,
            skip_reason: None,
        }
    }
}

/// Annotation value wins over the cluster default unless the cluster value
/// is locked. Unparseable annotations fall through to the default.
pub fn resolve_restrict_pr(
    cluster: RestrictPolicy,
    annotations: &BTreeMap<String, serde_json::Value>,
) -> RestrictPr {
    if cluster.locked {
        return cluster.scope;
    }
    annotations
        .get(ANNOT_RESTRICT_PR)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(cluster.scope)
}

/// Pipeline annotation (`true`/`false`, or the strings of those) overrides
/// the cluster default; absent means the default.
pub fn resolve_chain_pr(cluster: bool, annotations: &BTreeMap<String, serde_json::Value>) -> bool {
    match annotations.get(ANNOT_CHAIN_PR) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => match s.as_str() {
            "true" => true,
            "false" => false,
            _ => cluster,
        },
        _ => cluster,
    }
}

/// Resolved PR policy for one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrPolicy {
    pub chain_pr: bool,
    pub restriction: RestrictPr,
    pub decision: RestrictionDecision,
}

pub fn pr_policy(
    settings: &WebhookSettings,
    annotations: &BTreeMap<String, serde_json::Value>,
    source: PrSource,
) -> PrPolicy {
    let restriction = resolve_restrict_pr(settings.restrict_pr, annotations);
    PrPolicy {
        chain_pr: resolve_chain_pr(settings.chain_pr, annotations),
        restriction,
        decision: evaluate(restriction, source),
    }
}

/// Delivery-level verdict for push-family hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitPolicy {
    Proceed { skip_message: Option<String> },
    Ignore { message: String },
}

pub fn has_skip_marker(message: Option<&str>) -> bool {
    message.is_some_and(|m| SKIP_CI.is_match(m))
}

/// Applies the `[skip ci]` marker and the ignored-committer list.
///
/// Pull requests always proceed without a skip message: neither rule
/// applies to them.
pub fn commit_policy(hook: &ParsedHook, settings: &WebhookSettings) -> CommitPolicy {
    if hook.is_pull_request() {
        return CommitPolicy::Proceed { skip_message: None };
    }

    if has_skip_marker(hook.last_commit_message.as_deref()) {
        return CommitPolicy::Proceed {
            skip_message: Some(SKIP_CI_MESSAGE.to_string()),
        };
    }

    let ignored = &settings.ignore_commits_by;
    if !ignored.is_empty() {
        let authors: Vec<&str> = if hook.commit_authors.is_empty() {
            vec![hook.username.as_str()]
        } else {
            hook.commit_authors.iter().map(String::as_str).collect()
        };
        if authors.iter().all(|a| ignored.iter().any(|i| i == a)) {
            return CommitPolicy::Ignore {
                message: format!("Skipping because user {} is ignored", hook.username),
            };
        }
    }

    CommitPolicy::Proceed { skip_message: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn annotations(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn push(message: &str, username: &str) -> ParsedHook {
        let mut hook = ParsedHook::push(
            "h",
            "git@github.com:a/b.git",
            "master",
            "sha",
            username,
            "github:github.com",
        );
        hook.last_commit_message = Some(message.to_string());
        hook
    }

    #[test]
    fn decision_table() {
        use PrSource::{Branch, Fork};
        let cases = [
            (RestrictPr::None, Branch, true),
            (RestrictPr::None, Fork, true),
            (RestrictPr::Fork, Branch, true),
            (RestrictPr::Fork, Fork, false),
            (RestrictPr::Branch, Branch, false),
            (RestrictPr::Branch, Fork, true),
            (RestrictPr::All, Branch, false),
            (RestrictPr::All, Fork, false),
        ];
        for (restriction, source, allowed) in cases {
            let decision = evaluate(restriction, source);
            assert_eq!(decision.allowed, allowed, "{:?}/{:?}", restriction, source);
            assert_eq!(decision.skip_reason.is_some(), !allowed);
        }
    }

    #[test]
    fn skip_reason_names_restriction_and_source() {
        let decision = evaluate(RestrictPr::Fork, PrSource::Fork);
        assert!(decision.skip_reason.unwrap().contains("restrict fork and PR is fork"));
    }

    #[test]
    fn annotation_overrides_cluster_restriction() {
        let cluster: RestrictPolicy = "fork".parse().unwrap();
        let annots = annotations(&[(ANNOT_RESTRICT_PR, json!("none"))]);
        assert_eq!(resolve_restrict_pr(cluster, &annots), RestrictPr::None);
        assert_eq!(resolve_restrict_pr(cluster, &BTreeMap::new()), RestrictPr::Fork);
    }

    #[test]
    fn locked_cluster_restriction_ignores_annotation() {
        let cluster: RestrictPolicy = "all-admin".parse().unwrap();
        assert!(cluster.locked);
        let annots = annotations(&[(ANNOT_RESTRICT_PR, json!("none"))]);
        assert_eq!(resolve_restrict_pr(cluster, &annots), RestrictPr::All);
        assert_eq!(cluster.to_string(), "all-admin");
    }

    #[test]
    fn unknown_restriction_is_rejected() {
        assert!("sometimes".parse::<RestrictPolicy>().is_err());
    }

    #[test]
    fn chain_pr_is_tri_state() {
        assert!(resolve_chain_pr(true, &BTreeMap::new()));
        assert!(!resolve_chain_pr(false, &BTreeMap::new()));
        assert!(!resolve_chain_pr(true, &annotations(&[(ANNOT_CHAIN_PR, json!(false))])));
        assert!(resolve_chain_pr(false, &annotations(&[(ANNOT_CHAIN_PR, json!(true))])));
        assert!(resolve_chain_pr(false, &annotations(&[(ANNOT_CHAIN_PR, json!("true"))])));
    }

    #[test]
    fn fork_pr_on_fork_restricted_cluster() {
        let settings = WebhookSettings {
            restrict_pr: "fork".parse().unwrap(),
            ..WebhookSettings::default()
        };
        let policy = pr_policy(&settings, &BTreeMap::new(), PrSource::Fork);
        assert!(!policy.decision.allowed);
        assert!(!policy.chain_pr);
    }

    #[test]
    fn skip_marker_anywhere_in_message() {
        assert!(has_skip_marker(Some("foo[skip ci]bar")));
        assert!(has_skip_marker(Some("[ci skip] docs")));
        assert!(!has_skip_marker(Some("skip ci")));
        assert!(!has_skip_marker(None));
    }

    #[test]
    fn ignored_committer_without_marker_is_ignored() {
        let settings = WebhookSettings {
            ignore_commits_by: vec!["batman".to_string()],
            ..WebhookSettings::default()
        };
        assert_eq!(
            commit_policy(&push("update deps", "batman"), &settings),
            CommitPolicy::Ignore {
                message: "Skipping because user batman is ignored".to_string()
            }
        );
    }

    #[test]
    fn ignored_committer_with_marker_proceeds_with_skip_message() {
        let settings = WebhookSettings {
            ignore_commits_by: vec!["batman".to_string()],
            ..WebhookSettings::default()
        };
        assert_eq!(
            commit_policy(&push("foo[skip ci]bar", "batman"), &settings),
            CommitPolicy::Proceed {
                skip_message: Some(SKIP_CI_MESSAGE.to_string())
            }
        );
    }

    #[test]
    fn mixed_commit_authors_are_not_ignored() {
        let settings = WebhookSettings {
            ignore_commits_by: vec!["batman".to_string()],
            ..WebhookSettings::default()
        };
        let mut hook = push("merge", "batman");
        hook.commit_authors = vec!["batman".to_string(), "robin".to_string()];
        assert_eq!(
            commit_policy(&hook, &settings),
            CommitPolicy::Proceed { skip_message: None }
        );
    }

    #[test]
    fn pull_requests_bypass_commit_rules() {
        let settings = WebhookSettings {
            ignore_commits_by: vec!["batman".to_string()],
            ..WebhookSettings::default()
        };
        let mut hook = push("[skip ci]", "batman");
        hook.kind = crate::webhook::HookKind::Pr;
        assert_eq!(
            commit_policy(&hook, &settings),
            CommitPolicy::Proceed { skip_message: None }
        );
    }
}
