//! Resource addressing: how org/repo/ref ids map onto minted IRIs and
//! named graphs, and the scope chain used for permission inheritance.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::permissions::ScopeType;

/// Kind of a named, mutable commit pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefKind {
    Branch,
    Lock,
}

impl RefKind {
    /// Path segment used in IRIs and URLs.
    pub fn segment(self) -> &'static str {
        match self {
            RefKind::Branch => "branches",
            RefKind::Lock => "locks",
        }
    }

    pub fn scope(self) -> ScopeType {
        match self {
            RefKind::Branch => ScopeType::Branch,
            RefKind::Lock => ScopeType::Lock,
        }
    }
}

/// Org + repo pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoAddress {
    pub org: String,
    pub repo: String,
}

impl RepoAddress {
    pub fn new(org: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            repo: repo.into(),
        }
    }

    pub fn branch(&self, id: impl Into<String>) -> RefAddress {
        RefAddress {
            repo: self.clone(),
            kind: RefKind::Branch,
            id: id.into(),
        }
    }

    pub fn lock(&self, id: impl Into<String>) -> RefAddress {
        RefAddress {
            repo: self.clone(),
            kind: RefKind::Lock,
            id: id.into(),
        }
    }
}

impl fmt::Display for RepoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/orgs/{}/repos/{}", self.org, self.repo)
    }
}

/// Address of a branch or lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefAddress {
    pub repo: RepoAddress,
    pub kind: RefKind,
    pub id: String,
}

impl fmt::Display for RefAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.repo, self.kind.segment(), self.id)
    }
}

/// Mints every IRI the layer writes, rooted at a configured context.
///
/// Resource IRIs mirror the HTTP paths (`{root}/orgs/{org}/repos/{repo}/...`),
/// so a resource's IRI doubles as its canonical location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IriFactory {
    root: Arc<str>,
}

impl IriFactory {
    pub fn new(root: &str) -> Self {
        Self {
            root: Arc::from(root.trim_end_matches('/')),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    // ── cluster-level ──────────────────────────────────────────────────────

    pub fn cluster(&self) -> String {
        format!("{}/", self.root)
    }

    pub fn cluster_graph(&self) -> String {
        format!("{}/graphs/Cluster", self.root)
    }

    pub fn policies_graph(&self) -> String {
        format!("{}/graphs/AccessControl.Policies", self.root)
    }

    pub fn transactions_graph(&self) -> String {
        format!("{}/graphs/Transactions", self.root)
    }

    pub fn transaction(&self, transaction_id: &str) -> String {
        format!("{}/transactions/{}", self.root, transaction_id)
    }

    pub fn policy(&self, policy_id: &str) -> String {
        format!("{}/policies/{}", self.root, policy_id)
    }

    pub fn user(&self, user_id: &str) -> String {
        format!("{}/users/{}", self.root, user_id)
    }

    pub fn group(&self, group_id: &str) -> String {
        format!("{}/groups/{}", self.root, group_id)
    }

    pub fn org(&self, org: &str) -> String {
        format!("{}/orgs/{}", self.root, org)
    }

    // ── repo-level ─────────────────────────────────────────────────────────

    pub fn repo(&self, repo: &RepoAddress) -> String {
        format!("{}{}", self.root, repo)
    }

    pub fn repo_metadata_graph(&self, repo: &RepoAddress) -> String {
        format!("{}/graphs/Metadata", self.repo(repo))
    }

    pub fn reference(&self, r: &RefAddress) -> String {
        format!("{}{}", self.root, r)
    }

    pub fn commit(&self, repo: &RepoAddress, commit_id: &str) -> String {
        format!("{}/commits/{}", self.repo(repo), commit_id)
    }

    pub fn snapshot(&self, repo: &RepoAddress, snapshot_id: &str) -> String {
        format!("{}/snapshots/{}", self.repo(repo), snapshot_id)
    }

    pub fn model_graph(&self, repo: &RepoAddress, snapshot_id: &str) -> String {
        format!("{}/graphs/Model.{}", self.repo(repo), snapshot_id)
    }

    pub fn staging_graph(&self, repo: &RepoAddress, snapshot_id: &str) -> String {
        format!("{}/graphs/Staging.{}", self.repo(repo), snapshot_id)
    }

    pub fn scratch_graph(&self, repo: &RepoAddress, transaction_id: &str) -> String {
        format!("{}/graphs/Load.{}", self.repo(repo), transaction_id)
    }

    pub fn diff(&self, repo: &RepoAddress, diff_id: &str) -> String {
        format!("{}/diffs/{}", self.repo(repo), diff_id)
    }

    pub fn diff_insertions_graph(&self, repo: &RepoAddress, diff_id: &str) -> String {
        format!("{}/graphs/Diff.{}.Ins", self.repo(repo), diff_id)
    }

    pub fn diff_deletions_graph(&self, repo: &RepoAddress, diff_id: &str) -> String {
        format!("{}/graphs/Diff.{}.Del", self.repo(repo), diff_id)
    }

    // ── scope chains ───────────────────────────────────────────────────────

    /// Scope chain of an org: cluster, org.
    pub fn org_chain(&self, org: &str) -> Vec<String> {
        vec![self.cluster(), self.org(org)]
    }

    /// Scope chain of a repo: cluster, org, repo.
    pub fn repo_chain(&self, repo: &RepoAddress) -> Vec<String> {
        let mut chain = self.org_chain(&repo.org);
        chain.push(self.repo(repo));
        chain
    }

    /// Scope chain of a branch or lock: cluster, org, repo, ref.
    pub fn ref_chain(&self, r: &RefAddress) -> Vec<String> {
        let mut chain = self.repo_chain(&r.repo);
        chain.push(self.reference(r));
        chain
    }

    /// Strip the root context from a resource IRI, yielding its HTTP path.
    pub fn path_of<'a>(&self, iri: &'a str) -> Option<&'a str> {
        iri.strip_prefix(self.root.as_ref())
    }
}
