//! Model snapshot resolution.
//!
//! Not every commit has a Model snapshot. To read a commit, walk `parent*`
//! to the nearest ancestor that has one. When the commit itself lacks one,
//! copy that ancestor's graph (or start empty), replay every intermediate
//! commit's change oldest first, and register the result as the commit's
//! own Model snapshot so the rebuild happens once.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, info, instrument};

use mms_core::vocab::{class, prop, RDF_TYPE};
use mms_core::{new_resource_id, Error, RepoAddress, Result};
use mms_sparql::{
    tp, GraphPattern, GraphTemplate, Patch, PropertyPath, SelectQuery, Term, TriplePattern, UpdateOperation,
    UpdateRequest,
};

use crate::engine::Engine;

/// What one commit contributes to its descendants' content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CommitRow {
    parent: Option<String>,
    model: Option<String>,
    patch: Option<String>,
    insertions: Option<String>,
    deletions: Option<String>,
}

/// Ancestry of a commit up to (excluding) the nearest materialized one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Lineage {
    /// Model graph of the nearest materialized ancestor, if any.
    base: Option<String>,
    /// Commits to replay on top of `base`, newest first.
    pending: Vec<String>,
}

/// Walk from `commit` towards the root until a Model graph is found.
fn lineage(commit: &str, rows: &HashMap<String, CommitRow>) -> Result<Lineage> {
    let mut pending = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(commit.to_string());

    while let Some(current) = cursor {
        if !seen.insert(current.clone()) {
            return Err(Error::ServerBug(format!("Commit history of <{}> contains a cycle at <{}>", commit, current)));
        }
        let row = rows
            .get(&current)
            .ok_or_else(|| Error::ServerBug(format!("Commit <{}> is missing from history", current)))?;
        if let Some(model) = &row.model {
            return Ok(Lineage {
                base: Some(model.clone()),
                pending,
            });
        }
        pending.push(current);
        cursor = row.parent.clone();
    }
    Ok(Lineage { base: None, pending })
}

impl Engine {
    /// Model graph holding the content of `commit`, rebuilding one if the
    /// commit has never been materialized.
    #[instrument(skip(self), fields(subsystem = "engine", component = "snapshots", op = "resolve_commit_graph"))]
    pub async fn resolve_commit_graph(&self, repo: &RepoAddress, commit: &str) -> Result<String> {
        let rows = self.commit_history(repo, commit).await?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("Commit <{}>", commit)));
        }
        let lineage = lineage(commit, &rows)?;
        if lineage.pending.is_empty() {
            if let Some(base) = lineage.base {
                debug!(graph = %base, "Commit already materialized");
                return Ok(base);
            }
        }
        self.rebuild(repo, commit, &lineage, &rows).await
    }

    async fn commit_history(&self, repo: &RepoAddress, commit: &str) -> Result<HashMap<String, CommitRow>> {
        let c = Term::var("c");
        let optional = |triples: Vec<TriplePattern>| GraphPattern::optional(GraphPattern::triples(triples));
        let query = SelectQuery::new(
            ["c", "parent", "model", "patch", "ins", "del"],
            GraphPattern::graph(
                self.iris().repo_metadata_graph(repo),
                GraphPattern::Path {
                    subject: Term::iri(commit),
                    path: PropertyPath::ZeroOrMore(prop::PARENT.to_string()),
                    object: c.clone(),
                }
                .and(GraphPattern::triples([tp(c.clone(), RDF_TYPE, Term::iri(class::COMMIT))]))
                .and(optional(vec![tp(c.clone(), prop::PARENT, Term::var("parent"))]))
                .and(optional(vec![
                    tp(Term::var("snap"), RDF_TYPE, Term::iri(class::MODEL)),
                    tp(Term::var("snap"), prop::MATERIALIZES, c.clone()),
                    tp(Term::var("snap"), prop::GRAPH, Term::var("model")),
                ]))
                .and(optional(vec![tp(c.clone(), prop::PATCH, Term::var("patch"))]))
                .and(optional(vec![
                    tp(c, prop::DIFF, Term::var("diff")),
                    tp(Term::var("diff"), prop::INS_GRAPH, Term::var("ins")),
                    tp(Term::var("diff"), prop::DEL_GRAPH, Term::var("del")),
                ])),
            ),
        );

        let mut rows: HashMap<String, CommitRow> = HashMap::new();
        for row in self.select(&query).await?.rows {
            let Some(c) = row.iri("c") else { continue };
            let entry = rows.entry(c.to_string()).or_default();
            // several Model snapshots may exist for one commit; any will do
            entry.parent = entry.parent.take().or_else(|| row.iri("parent").map(String::from));
            entry.model = entry.model.take().or_else(|| row.iri("model").map(String::from));
            entry.patch = entry.patch.take().or_else(|| row.value("patch").map(String::from));
            entry.insertions = entry.insertions.take().or_else(|| row.iri("ins").map(String::from));
            entry.deletions = entry.deletions.take().or_else(|| row.iri("del").map(String::from));
        }
        Ok(rows)
    }

    async fn rebuild(
        &self,
        repo: &RepoAddress,
        commit: &str,
        lineage: &Lineage,
        rows: &HashMap<String, CommitRow>,
    ) -> Result<String> {
        let started = Instant::now();
        let snapshot_id = new_resource_id();
        let snapshot = self.iris().snapshot(repo, &snapshot_id);
        let graph = self.iris().model_graph(repo, &snapshot_id);
        let always = GraphPattern::empty();

        let mut request = UpdateRequest::new();
        if let Some(base) = &lineage.base {
            request = request.push(UpdateOperation::copy_graph_when(base.as_str(), graph.as_str(), always.clone()));
        }
        for id in lineage.pending.iter().rev() {
            let Some(row) = rows.get(id) else { continue };
            if let Some(text) = &row.patch {
                request = request.extend(Patch::parse(text)?.apply_to(&graph, &always));
            }
            if let (Some(ins), Some(del)) = (&row.insertions, &row.deletions) {
                request = request.extend(apply_diff(del, ins, &graph, &always));
            }
        }
        request = request.push(UpdateOperation::InsertData(vec![GraphTemplate::new(
            self.iris().repo_metadata_graph(repo),
            vec![
                tp(snapshot.as_str(), RDF_TYPE, Term::iri(class::MODEL)),
                tp(snapshot.as_str(), prop::MATERIALIZES, Term::iri(commit)),
                tp(snapshot.as_str(), prop::GRAPH, Term::Iri(graph.clone())),
            ],
        )]));

        self.update_bulk(&request).await?;
        info!(
            commit,
            graph = %graph,
            replayed = lineage.pending.len(),
            from_empty = lineage.base.is_none(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Model snapshot rebuilt"
        );
        Ok(graph)
    }
}

/// Remove `deletions` from `graph`, then add `insertions`, when `gate` matches.
pub(crate) fn apply_diff(deletions: &str, insertions: &str, graph: &str, gate: &GraphPattern) -> Vec<UpdateOperation> {
    let spo = tp(Term::var("__s"), Term::var("__p"), Term::var("__o"));
    vec![
        UpdateOperation::modify(
            vec![GraphTemplate::new(graph, vec![spo.clone()])],
            Vec::new(),
            gate.clone().and(GraphPattern::graph(deletions, GraphPattern::triples([spo]))),
        ),
        UpdateOperation::copy_graph_when(insertions, graph, gate.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::testing::{RecordingScheduler, ScriptedStore};

    fn row(parent: Option<&str>, model: Option<&str>) -> CommitRow {
        CommitRow {
            parent: parent.map(String::from),
            model: model.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_lineage_stops_at_nearest_model() {
        let rows = HashMap::from([
            ("c3".to_string(), row(Some("c2"), None)),
            ("c2".to_string(), row(Some("c1"), None)),
            ("c1".to_string(), row(None, Some("g1"))),
        ]);
        let l = lineage("c3", &rows).unwrap();
        assert_eq!(l.base.as_deref(), Some("g1"));
        assert_eq!(l.pending, vec!["c3", "c2"]);
    }

    #[test]
    fn test_lineage_from_empty_root() {
        let rows = HashMap::from([("c1".to_string(), row(None, None))]);
        let l = lineage("c1", &rows).unwrap();
        assert_eq!(l.base, None);
        assert_eq!(l.pending, vec!["c1"]);
    }

    #[test]
    fn test_lineage_detects_cycles_and_gaps() {
        let cyclic = HashMap::from([
            ("a".to_string(), row(Some("b"), None)),
            ("b".to_string(), row(Some("a"), None)),
        ]);
        assert!(matches!(lineage("a", &cyclic), Err(Error::ServerBug(_))));

        let gap = HashMap::from([("a".to_string(), row(Some("missing"), None))]);
        assert!(matches!(lineage("a", &gap), Err(Error::ServerBug(_))));
    }

    #[tokio::test]
    async fn test_rebuild_replays_patches_oldest_first() {
        let history = r#"{"head":{"vars":["c","parent","model","patch"]},"results":{"bindings":[
            {"c":{"type":"uri","value":"urn:c3"},"parent":{"type":"uri","value":"urn:c2"},
             "patch":{"type":"literal","value":"INSERT DATA { <urn:s> <urn:p> \"third\" }"}},
            {"c":{"type":"uri","value":"urn:c2"},"parent":{"type":"uri","value":"urn:c1"},
             "patch":{"type":"literal","value":"INSERT DATA { <urn:s> <urn:p> \"second\" }"}},
            {"c":{"type":"uri","value":"urn:c1"},"model":{"type":"uri","value":"urn:g1"}}
        ]}}"#;
        let store = Arc::new(ScriptedStore::new().on_select(move |_| history.to_string()));
        let engine = Engine::new(
            store.clone(),
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default().with_root_context("http://mms.test"),
        );
        let graph = engine
            .resolve_commit_graph(&RepoAddress::new("acme", "models"), "urn:c3")
            .await
            .unwrap();
        assert!(graph.starts_with("http://mms.test/orgs/acme/repos/models/graphs/Model."));

        let update = &store.updates()[0];
        let copy = update.find("GRAPH <urn:g1>").unwrap();
        let second = update.find("second").unwrap();
        let third = update.find("third").unwrap();
        assert!(copy < second && second < third);
        assert!(update.contains(&format!("<{}> <urn:c3>", prop::MATERIALIZES)));
    }

    #[tokio::test]
    async fn test_materialized_commit_resolves_without_writes() {
        let store = Arc::new(ScriptedStore::new().on_select(|_| {
            r#"{"head":{"vars":["c","model"]},"results":{"bindings":[
                {"c":{"type":"uri","value":"urn:c1"},"model":{"type":"uri","value":"urn:g1"}}
            ]}}"#
                .to_string()
        }));
        let engine = Engine::new(
            store.clone(),
            Arc::new(RecordingScheduler::default()),
            EngineConfig::default(),
        );
        let graph = engine
            .resolve_commit_graph(&RepoAddress::new("acme", "models"), "urn:c1")
            .await
            .unwrap();
        assert_eq!(graph, "urn:g1");
        assert!(store.updates().is_empty());
    }
}
