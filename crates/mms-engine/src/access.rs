//! Inline permission checks.
//!
//! The static model in `mms_core::permissions` is resolved in Rust to the set
//! of roles that grant a required permission; the store only has to find a
//! policy binding one of the caller's identities to one of those roles on a
//! scope in the resource's chain.

use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{new_resource_id, IriFactory, Permission, Role, ScopeType, Subject};
use mms_sparql::{tp, Expr, GraphPattern, Term, TriplePattern};

const POLICY: &str = "__mms_policy";
const POLICY_SUBJECT: &str = "__mms_policy_subject";
const POLICY_SCOPE: &str = "__mms_policy_scope";
const POLICY_ROLE: &str = "__mms_policy_role";

/// Pattern that matches (without binding anything) iff `subject` holds
/// `required` on some scope in `scopes`.
///
/// `scopes` may contain variables bound by the enclosing pattern, which is
/// how list queries check each row against its own scope.
pub fn permission_pattern(
    iris: &IriFactory,
    subject: &Subject,
    required: Permission,
    scopes: Vec<Term>,
) -> GraphPattern {
    let identities = subject.identities().into_iter().map(Term::Iri).collect();
    let roles = Role::granting(required)
        .into_iter()
        .map(|r| Term::Iri(r.iri()))
        .collect();

    let policy = Term::var(POLICY);
    let inner = GraphPattern::graph(
        iris.policies_graph(),
        GraphPattern::triples([
            tp(policy.clone(), prop::SUBJECT, Term::var(POLICY_SUBJECT)),
            tp(policy.clone(), prop::SCOPE, Term::var(POLICY_SCOPE)),
            tp(policy, prop::ROLE, Term::var(POLICY_ROLE)),
        ]),
    )
    .and(GraphPattern::Filter(
        Expr::In(Term::var(POLICY_SUBJECT), identities)
            .and(Expr::In(Term::var(POLICY_SCOPE), scopes))
            .and(Expr::In(Term::var(POLICY_ROLE), roles)),
    ));

    GraphPattern::exists(inner)
}

/// Scope chain as IRI terms.
pub fn chain_terms(chain: Vec<String>) -> Vec<Term> {
    chain.into_iter().map(Term::Iri).collect()
}

/// Triples of the policy auto-granted to the creator of a resource.
///
/// Inserted in the same update that creates the resource.
pub fn auto_policy(iris: &IriFactory, owner: &str, scope_iri: &str, scope: ScopeType) -> Vec<TriplePattern> {
    policy_triples(&iris.policy(&new_resource_id()), owner, scope_iri, Role::owner_of(scope))
}

pub fn policy_triples(policy_iri: &str, subject: &str, scope_iri: &str, role: Role) -> Vec<TriplePattern> {
    vec![
        tp(policy_iri, RDF_TYPE, Term::iri(class::POLICY)),
        tp(policy_iri, prop::SUBJECT, Term::iri(subject)),
        tp(policy_iri, prop::SCOPE, Term::iri(scope_iri)),
        tp(policy_iri, prop::ROLE, Term::Iri(role.iri())),
    ]
}
