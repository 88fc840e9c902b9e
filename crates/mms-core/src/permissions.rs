//! Static permission model: scopes, permissions, roles and their closure.
//!
//! Permissions are (action, scope type) pairs joined by directed "implies"
//! edges. A role permits exactly one permission; what a role grants is the
//! transitive closure of that permission. Policies grant a role to a subject
//! over one concrete scope instance, and apply to every resource whose scope
//! chain contains that instance.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vocab::MMS_OBJECT;

/// Position in the resource hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeType {
    Cluster,
    Org,
    Repo,
    Collection,
    Branch,
    Lock,
    Diff,
}

impl ScopeType {
    pub const ALL: [ScopeType; 7] = [
        ScopeType::Cluster,
        ScopeType::Org,
        ScopeType::Repo,
        ScopeType::Collection,
        ScopeType::Branch,
        ScopeType::Lock,
        ScopeType::Diff,
    ];

    /// Scope types nested directly under this one.
    pub fn children(self) -> &'static [ScopeType] {
        match self {
            ScopeType::Cluster => &[ScopeType::Org],
            ScopeType::Org => &[ScopeType::Repo, ScopeType::Collection],
            ScopeType::Repo => &[ScopeType::Branch, ScopeType::Lock],
            ScopeType::Branch | ScopeType::Lock => &[ScopeType::Diff],
            ScopeType::Collection | ScopeType::Diff => &[],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScopeType::Cluster => "Cluster",
            ScopeType::Org => "Org",
            ScopeType::Repo => "Repo",
            ScopeType::Collection => "Collection",
            ScopeType::Branch => "Branch",
            ScopeType::Lock => "Lock",
            ScopeType::Diff => "Diff",
        }
    }
}

/// Operation kind of a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Create => "Create",
            Action::Read => "Read",
            Action::Update => "Update",
            Action::Delete => "Delete",
        }
    }
}

/// A node of the permission DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub action: Action,
    pub scope: ScopeType,
}

impl Permission {
    pub const fn new(action: Action, scope: ScopeType) -> Self {
        Self { action, scope }
    }

    pub const CREATE_ORG: Permission = Permission::new(Action::Create, ScopeType::Org);
    pub const READ_ORG: Permission = Permission::new(Action::Read, ScopeType::Org);
    pub const UPDATE_ORG: Permission = Permission::new(Action::Update, ScopeType::Org);
    pub const DELETE_ORG: Permission = Permission::new(Action::Delete, ScopeType::Org);
    pub const CREATE_REPO: Permission = Permission::new(Action::Create, ScopeType::Repo);
    pub const READ_REPO: Permission = Permission::new(Action::Read, ScopeType::Repo);
    pub const UPDATE_REPO: Permission = Permission::new(Action::Update, ScopeType::Repo);
    pub const DELETE_REPO: Permission = Permission::new(Action::Delete, ScopeType::Repo);
    pub const CREATE_BRANCH: Permission = Permission::new(Action::Create, ScopeType::Branch);
    pub const READ_BRANCH: Permission = Permission::new(Action::Read, ScopeType::Branch);
    pub const UPDATE_BRANCH: Permission = Permission::new(Action::Update, ScopeType::Branch);
    pub const DELETE_BRANCH: Permission = Permission::new(Action::Delete, ScopeType::Branch);
    pub const CREATE_LOCK: Permission = Permission::new(Action::Create, ScopeType::Lock);
    pub const READ_LOCK: Permission = Permission::new(Action::Read, ScopeType::Lock);
    pub const DELETE_LOCK: Permission = Permission::new(Action::Delete, ScopeType::Lock);
    pub const CREATE_DIFF: Permission = Permission::new(Action::Create, ScopeType::Diff);
    pub const READ_DIFF: Permission = Permission::new(Action::Read, ScopeType::Diff);

    /// Direct "implies" edges out of this permission.
    ///
    /// - Read T implies Read of every child type
    /// - Update T implies Read T, and Create/Update of every child type
    /// - Delete T implies Update T, and Delete of every child type
    /// - Create T implies nothing
    pub fn implies(self) -> Vec<Permission> {
        let children = self.scope.children();
        match self.action {
            Action::Create => Vec::new(),
            Action::Read => children
                .iter()
                .map(|c| Permission::new(Action::Read, *c))
                .collect(),
            Action::Update => {
                let mut out = vec![Permission::new(Action::Read, self.scope)];
                for c in children {
                    out.push(Permission::new(Action::Create, *c));
                    out.push(Permission::new(Action::Update, *c));
                }
                out
            }
            Action::Delete => {
                let mut out = vec![Permission::new(Action::Update, self.scope)];
                out.extend(
                    children
                        .iter()
                        .map(|c| Permission::new(Action::Delete, *c)),
                );
                out
            }
        }
    }

    /// Transitive closure of [`Permission::implies`], including `self`.
    pub fn closure(self) -> BTreeSet<Permission> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self]);
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(next.implies());
            }
        }
        seen
    }

    /// Every permission in the model.
    pub fn all() -> Vec<Permission> {
        let mut out = Vec::new();
        for scope in ScopeType::ALL {
            for action in [Action::Create, Action::Read, Action::Update, Action::Delete] {
                out.push(Permission::new(action, scope));
            }
        }
        out
    }

    pub fn iri(self) -> String {
        format!("{}Permission.{}", MMS_OBJECT, self)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.action.name(), self.scope.name())
    }
}

/// Strength of a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoleLevel {
    Admin,
    Write,
    Read,
}

/// A named bundle of permissions, one per (level, scope type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Role {
    pub level: RoleLevel,
    pub scope: ScopeType,
}

impl Role {
    pub const fn new(level: RoleLevel, scope: ScopeType) -> Self {
        Self { level, scope }
    }

    /// The single permission this role directly permits.
    pub fn permits(self) -> Permission {
        let action = match self.level {
            RoleLevel::Admin => Action::Delete,
            RoleLevel::Write => Action::Update,
            RoleLevel::Read => Action::Read,
        };
        Permission::new(action, self.scope)
    }

    /// Everything this role grants.
    pub fn grants(self) -> BTreeSet<Permission> {
        self.permits().closure()
    }

    pub fn all() -> Vec<Role> {
        let mut out = Vec::new();
        for scope in ScopeType::ALL {
            for level in [RoleLevel::Admin, RoleLevel::Write, RoleLevel::Read] {
                out.push(Role::new(level, scope));
            }
        }
        out
    }

    /// Roles whose closure contains `required`; these are the roles a policy
    /// must carry for a permission check to pass.
    pub fn granting(required: Permission) -> Vec<Role> {
        Role::all()
            .into_iter()
            .filter(|role| role.grants().contains(&required))
            .collect()
    }

    /// The Admin-equivalent role auto-granted to the creator of a resource.
    pub fn owner_of(scope: ScopeType) -> Role {
        Role::new(RoleLevel::Admin, scope)
    }

    pub fn iri(self) -> String {
        format!("{}Role.{}", MMS_OBJECT, self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            RoleLevel::Admin => "Admin",
            RoleLevel::Write => "Write",
            RoleLevel::Read => "Read",
        };
        write!(f, "{}{}", level, self.scope.name())
    }
}

/// Grant of a role to a subject over one scope instance (all IRIs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub subject: String,
    pub scope: String,
    pub role: Role,
}

/// Resolved identity of a caller: the user IRI and the IRIs of its groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub user: String,
    pub groups: Vec<String>,
}

impl Subject {
    /// The user followed by its groups; any of these may hold a policy.
    pub fn identities(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.groups.len() + 1);
        out.push(self.user.clone());
        out.extend(self.groups.iter().cloned());
        out
    }
}

/// True iff some policy held by the subject (directly or through a group)
/// sits on a scope in `scope_chain` and grants `required`.
pub fn check_permission(
    subject: &Subject,
    policies: &[Policy],
    required: Permission,
    scope_chain: &[String],
) -> bool {
    let identities = subject.identities();
    policies.iter().any(|policy| {
        identities.contains(&policy.subject)
            && scope_chain.contains(&policy.scope)
            && policy.role.grants().contains(&required)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> Subject {
        Subject {
            user: "u:alice".into(),
            groups: vec!["g:eng".into()],
        }
    }

    #[test]
    fn test_delete_repo_implies_update_and_children() {
        let closure = Permission::DELETE_REPO.closure();
        assert!(closure.contains(&Permission::UPDATE_REPO));
        assert!(closure.contains(&Permission::CREATE_BRANCH));
        assert!(closure.contains(&Permission::DELETE_LOCK));
        assert!(closure.contains(&Permission::READ_BRANCH));
        assert!(closure.contains(&Permission::READ_DIFF));
        assert!(!closure.contains(&Permission::READ_ORG));
    }

    #[test]
    fn test_closure_is_transitive() {
        // DeleteOrg -> DeleteRepo -> DeleteBranch -> UpdateBranch -> ReadBranch
        let closure = Permission::DELETE_ORG.closure();
        assert!(closure.contains(&Permission::READ_BRANCH));
        assert!(closure.contains(&Permission::CREATE_DIFF));
    }

    #[test]
    fn test_create_implies_nothing() {
        assert_eq!(Permission::CREATE_ORG.closure().len(), 1);
    }

    #[test]
    fn test_admin_grants_read_update_delete_of_everything_below() {
        let grants = Role::owner_of(ScopeType::Org).grants();
        for scope in [
            ScopeType::Org,
            ScopeType::Repo,
            ScopeType::Collection,
            ScopeType::Branch,
            ScopeType::Lock,
            ScopeType::Diff,
        ] {
            for action in [Action::Read, Action::Update, Action::Delete] {
                assert!(
                    grants.contains(&Permission::new(action, scope)),
                    "AdminOrg should grant {:?} {:?}",
                    action,
                    scope
                );
            }
        }
        assert!(!grants.contains(&Permission::new(Action::Read, ScopeType::Cluster)));
    }

    #[test]
    fn test_read_role_does_not_grant_update() {
        let grants = Role::new(RoleLevel::Read, ScopeType::Repo).grants();
        assert!(grants.contains(&Permission::READ_BRANCH));
        assert!(!grants.contains(&Permission::UPDATE_BRANCH));
    }

    #[test]
    fn test_write_cluster_can_create_orgs() {
        assert!(Role::new(RoleLevel::Write, ScopeType::Cluster)
            .grants()
            .contains(&Permission::CREATE_ORG));
    }

    #[test]
    fn test_granting_roles() {
        let roles = Role::granting(Permission::UPDATE_BRANCH);
        assert!(roles.contains(&Role::new(RoleLevel::Admin, ScopeType::Cluster)));
        assert!(roles.contains(&Role::new(RoleLevel::Write, ScopeType::Repo)));
        assert!(roles.contains(&Role::new(RoleLevel::Write, ScopeType::Branch)));
        assert!(!roles.contains(&Role::new(RoleLevel::Read, ScopeType::Repo)));
        assert!(!roles.contains(&Role::new(RoleLevel::Admin, ScopeType::Lock)));
    }

    #[test]
    fn test_check_permission_inherits_down_scope_chain() {
        let policies = vec![Policy {
            subject: "u:alice".into(),
            scope: "org:acme".into(),
            role: Role::new(RoleLevel::Write, ScopeType::Org),
        }];
        let chain = vec!["cluster".to_string(), "org:acme".into(), "repo:r".into()];
        assert!(check_permission(
            &subject(),
            &policies,
            Permission::UPDATE_REPO,
            &chain
        ));
        assert!(!check_permission(
            &subject(),
            &policies,
            Permission::DELETE_REPO,
            &chain
        ));
    }

    #[test]
    fn test_check_permission_via_group() {
        let policies = vec![Policy {
            subject: "g:eng".into(),
            scope: "cluster".into(),
            role: Role::new(RoleLevel::Read, ScopeType::Cluster),
        }];
        let chain = vec!["cluster".to_string(), "org:acme".into()];
        assert!(check_permission(
            &subject(),
            &policies,
            Permission::READ_ORG,
            &chain
        ));
    }

    #[test]
    fn test_check_permission_without_policy_on_chain() {
        let policies = vec![Policy {
            subject: "u:alice".into(),
            scope: "org:other".into(),
            role: Role::owner_of(ScopeType::Org),
        }];
        let chain = vec!["cluster".to_string(), "org:acme".into()];
        assert!(!check_permission(
            &subject(),
            &policies,
            Permission::READ_ORG,
            &chain
        ));
    }

    #[test]
    fn test_iris() {
        assert!(Permission::READ_ORG.iri().ends_with("Permission.ReadOrg"));
        assert!(Role::owner_of(ScopeType::Repo).iri().ends_with("Role.AdminRepo"));
    }
}
