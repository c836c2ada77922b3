//! Workflow graph and trigger node resolution
//!
//! A pipeline's workflow graph names its entry points with trigger symbols
//! (`~commit`, `~pr:main`, `~tag:/^v\d+/`, ...). The graph is compiled once,
//! when the pipeline is loaded, into a [`TriggerGraph`] of typed
//! [`TriggerSymbol`]s; each delivery is then resolved against it without
//! re-parsing node names.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CicdError, Result};
use crate::webhook::{HookAction, HookKind, ParsedHook};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub src: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<bool>,
}

impl WorkflowGraph {
    /// Jobs started directly by `trigger`
    pub fn next_jobs(&self, trigger: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.src == trigger && !e.dest.starts_with('~'))
            .map(|e| e.dest.as_str())
            .collect()
    }
}

/// Category of external event a trigger symbol stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerFamily {
    Commit,
    Pr,
    Tag,
    Release,
}

impl TriggerFamily {
    pub fn symbol(&self) -> &'static str {
        match self {
            TriggerFamily::Commit => "~commit",
            TriggerFamily::Pr => "~pr",
            TriggerFamily::Tag => "~tag",
            TriggerFamily::Release => "~release",
        }
    }

    fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "~commit" => Some(TriggerFamily::Commit),
            "~pr" => Some(TriggerFamily::Pr),
            "~tag" => Some(TriggerFamily::Tag),
            "~release" => Some(TriggerFamily::Release),
            _ => None,
        }
    }

    /// Commit and PR triggers are qualified by branch; tag and release
    /// triggers by tag or release name.
    pub fn is_branch_scoped(&self) -> bool {
        matches!(self, TriggerFamily::Commit | TriggerFamily::Pr)
    }
}

impl fmt::Display for TriggerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone)]
pub enum TriggerSymbol {
    /// `~commit`
    Bare(TriggerFamily),
    /// `~commit:<name>`
    Exact(TriggerFamily, String),
    /// `~commit:/<pattern>/`
    Pattern(TriggerFamily, Regex),
}

impl TriggerSymbol {
    /// Parses a node name. `Ok(None)` for job names and for trigger symbols
    /// outside the four families (`~sd@...`, `~subscribe`, `~pr-closed`).
    pub fn parse(name: &str) -> Result<Option<Self>> {
        if !name.starts_with('~') {
            return Ok(None);
        }
        let (head, qualifier) = match name.split_once(':') {
            Some((head, qualifier)) => (head, qualifier),
            None => (name, ""),
        };
        let Some(family) = TriggerFamily::from_symbol(head) else {
            return Ok(None);
        };

        if qualifier.is_empty() {
            return Ok(Some(TriggerSymbol::Bare(family)));
        }
        if qualifier.len() >= 2 && qualifier.starts_with('/') && qualifier.ends_with('/') {
            let pattern = &qualifier[1..qualifier.len() - 1];
            let regex = Regex::new(pattern).map_err(|e| {
                CicdError::InvalidTrigger(format!("'{}' is not a valid pattern: {}", name, e))
            })?;
            return Ok(Some(TriggerSymbol::Pattern(family, regex)));
        }
        Ok(Some(TriggerSymbol::Exact(family, qualifier.to_string())))
    }

    pub fn family(&self) -> TriggerFamily {
        match self {
            TriggerSymbol::Bare(f) | TriggerSymbol::Exact(f, _) | TriggerSymbol::Pattern(f, _) => {
                *f
            }
        }
    }

    fn is_qualified(&self) -> bool {
        !matches!(self, TriggerSymbol::Bare(_))
    }
}

/// What a delivery asks for: a family plus the branch (or tag/release name)
/// the symbol must be qualified with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerTarget {
    pub family: TriggerFamily,
    pub qualifier: String,
}

impl TriggerTarget {
    /// Classifies a delivery. `None` when it maps to no trigger family, or
    /// a tag delivery lacks its ref.
    pub fn classify(hook: &ParsedHook) -> Option<Self> {
        let (family, qualifier) = match (hook.action, hook.kind) {
            (HookAction::Tag, _) => (TriggerFamily::Tag, hook.tag_ref.clone()?),
            (HookAction::Release, _) => (
                TriggerFamily::Release,
                hook.release_name
                    .clone()
                    .or_else(|| hook.tag_ref.clone())
                    .unwrap_or_default(),
            ),
            (_, HookKind::Pr) => (TriggerFamily::Pr, hook.branch.clone()),
            (HookAction::Push, HookKind::Repo) => (TriggerFamily::Commit, hook.branch.clone()),
            _ => return None,
        };
        Some(Self { family, qualifier })
    }

    /// Bare symbol on the pipeline's own branch, branch-qualified otherwise.
    pub fn baseline_symbol(&self, tracked_branch: &str) -> String {
        if !self.family.is_branch_scoped() || self.qualifier == tracked_branch {
            self.family.symbol().to_string()
        } else {
            format!("{}:{}", self.family.symbol(), self.qualifier)
        }
    }
}

/// Trigger nodes of one workflow graph, compiled once per pipeline load
#[derive(Debug, Clone, Default)]
pub struct TriggerGraph {
    triggers: Vec<(String, TriggerSymbol)>,
}

impl TriggerGraph {
    pub fn compile(graph: &WorkflowGraph) -> Result<Self> {
        let mut triggers = Vec::new();
        for node in &graph.nodes {
            if let Some(symbol) = TriggerSymbol::parse(&node.name)? {
                triggers.push((node.name.clone(), symbol));
            }
        }
        Ok(Self { triggers })
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    fn of_family(&self, family: TriggerFamily) -> impl Iterator<Item = &(String, TriggerSymbol)> {
        self.triggers.iter().filter(move |(_, s)| s.family() == family)
    }

    /// Picks the node a build should start from, most specific first:
    /// exact qualifier, then pattern, then the bare family symbol.
    ///
    /// A bare branch-scoped symbol only matches on the pipeline's tracked
    /// branch, or when the graph has no qualified node of that family.
    /// Two patterns matching the same qualifier is a configuration error.
    pub fn resolve(&self, target: &TriggerTarget, tracked_branch: &str) -> Result<Option<String>> {
        let family = target.family;

        let exact = self.of_family(family).find(|(_, s)| match s {
            TriggerSymbol::Exact(_, name) => *name == target.qualifier,
            _ => false,
        });
        if let Some((name, _)) = exact {
            return Ok(Some(name.clone()));
        }

        let patterns: Vec<&String> = self
            .of_family(family)
            .filter(|(_, s)| match s {
                TriggerSymbol::Pattern(_, re) => re.is_match(&target.qualifier),
                _ => false,
            })
            .map(|(name, _)| name)
            .collect();
        match patterns.as_slice() {
            [] => {}
            [name] => return Ok(Some((*name).clone())),
            names => {
                return Err(CicdError::InvalidTrigger(format!(
                    "'{}' matches more than one trigger: {}",
                    target.qualifier,
                    names.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(", ")
                )));
            }
        }

        let bare = self
            .of_family(family)
            .find(|(_, s)| matches!(s, TriggerSymbol::Bare(_)));
        let Some((name, _)) = bare else {
            return Ok(None);
        };
        let bare_allowed = !family.is_branch_scoped()
            || target.qualifier == tracked_branch
            || !self.of_family(family).any(|(_, s)| s.is_qualified());

        Ok(bare_allowed.then(|| name.clone()))
    }
}

/// Resolves the start node for `hook` on a pipeline tracking `tracked_branch`.
pub fn resolve_start_from(
    hook: &ParsedHook,
    graph: &TriggerGraph,
    tracked_branch: &str,
) -> Result<Option<String>> {
    match TriggerTarget::classify(hook) {
        Some(target) => graph.resolve(&target, tracked_branch),
        None => Ok(None),
    }
}
