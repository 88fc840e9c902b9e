//! Cluster bootstrap: AdminCluster policies for the configured root groups.

use tracing::info;

use mms_core::{Result, Role, RoleLevel, ScopeType};
use mms_sparql::{tp, GraphPattern, GraphTemplate, Term, UpdateOperation, UpdateRequest};

use crate::access::policy_triples;
use crate::engine::Engine;

impl Engine {
    /// Grant AdminCluster to every group in `root_groups`.
    ///
    /// Policy IRIs are derived from the group name and each insert only
    /// fires when that policy is absent, so running this on every start is
    /// harmless.
    pub async fn bootstrap(&self) -> Result<usize> {
        let iris = self.iris();
        let policies = iris.policies_graph();
        let mut request = UpdateRequest::new();
        for group in &self.config().root_groups {
            let policy = iris.policy(&format!("root.{}", group));
            let triples = policy_triples(
                &policy,
                &iris.group(group),
                &iris.cluster(),
                Role::new(RoleLevel::Admin, ScopeType::Cluster),
            );
            let absent = GraphPattern::not_exists(GraphPattern::graph(
                policies.as_str(),
                GraphPattern::triples([tp(policy.as_str(), Term::var("p"), Term::var("o"))]),
            ));
            request = request.push(UpdateOperation::modify(
                Vec::new(),
                vec![GraphTemplate::new(policies.as_str(), triples)],
                absent,
            ));
        }
        let count = self.config().root_groups.len();
        self.update_bulk(&request).await?;
        info!(subsystem = "engine", op = "bootstrap", groups = count, "Root policies ensured");
        Ok(count)
    }
}
