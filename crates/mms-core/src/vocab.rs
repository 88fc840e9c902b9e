//! RDF vocabulary used by the version-control layer.
//!
//! Constants are full IRIs; query builders wrap them in typed terms before
//! rendering, so nothing here is spliced into SPARQL text directly.

/// Ontology namespace for mms classes and properties.
pub const MMS: &str = "https://mms.openmbee.org/rdf/ontology/";

/// Namespace for permission and role individuals.
pub const MMS_OBJECT: &str = "https://mms.openmbee.org/rdf/objects/";

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const DCT_TITLE: &str = "http://purl.org/dc/terms/title";

/// Classes.
pub mod class {
    pub const ORG: &str = "https://mms.openmbee.org/rdf/ontology/Org";
    pub const REPO: &str = "https://mms.openmbee.org/rdf/ontology/Repo";
    pub const BRANCH: &str = "https://mms.openmbee.org/rdf/ontology/Branch";
    pub const LOCK: &str = "https://mms.openmbee.org/rdf/ontology/Lock";
    pub const INTERIM_LOCK: &str = "https://mms.openmbee.org/rdf/ontology/InterimLock";
    pub const COMMIT: &str = "https://mms.openmbee.org/rdf/ontology/Commit";
    pub const MODEL: &str = "https://mms.openmbee.org/rdf/ontology/Model";
    pub const STAGING: &str = "https://mms.openmbee.org/rdf/ontology/Staging";
    pub const DIFF: &str = "https://mms.openmbee.org/rdf/ontology/Diff";
    pub const TRANSACTION: &str = "https://mms.openmbee.org/rdf/ontology/Transaction";
    pub const POLICY: &str = "https://mms.openmbee.org/rdf/ontology/Policy";
}

/// Properties.
pub mod prop {
    pub const ID: &str = "https://mms.openmbee.org/rdf/ontology/id";
    pub const ETAG: &str = "https://mms.openmbee.org/rdf/ontology/etag";
    pub const CREATED: &str = "https://mms.openmbee.org/rdf/ontology/created";
    pub const CREATED_BY: &str = "https://mms.openmbee.org/rdf/ontology/createdBy";
    pub const ORG: &str = "https://mms.openmbee.org/rdf/ontology/org";
    pub const REPO: &str = "https://mms.openmbee.org/rdf/ontology/repo";
    pub const REF: &str = "https://mms.openmbee.org/rdf/ontology/ref";
    pub const COMMIT: &str = "https://mms.openmbee.org/rdf/ontology/commit";
    pub const PARENT: &str = "https://mms.openmbee.org/rdf/ontology/parent";
    pub const SNAPSHOT: &str = "https://mms.openmbee.org/rdf/ontology/snapshot";
    pub const GRAPH: &str = "https://mms.openmbee.org/rdf/ontology/graph";
    pub const MATERIALIZES: &str = "https://mms.openmbee.org/rdf/ontology/materializes";
    pub const PATCH: &str = "https://mms.openmbee.org/rdf/ontology/patch";
    pub const DIFF: &str = "https://mms.openmbee.org/rdf/ontology/diff";
    pub const MESSAGE: &str = "https://mms.openmbee.org/rdf/ontology/message";
    pub const SUBJECT: &str = "https://mms.openmbee.org/rdf/ontology/subject";
    pub const SCOPE: &str = "https://mms.openmbee.org/rdf/ontology/scope";
    pub const ROLE: &str = "https://mms.openmbee.org/rdf/ontology/role";
    pub const SRC_REF: &str = "https://mms.openmbee.org/rdf/ontology/srcRef";
    pub const SRC_COMMIT: &str = "https://mms.openmbee.org/rdf/ontology/srcCommit";
    pub const DST_COMMIT: &str = "https://mms.openmbee.org/rdf/ontology/dstCommit";
    pub const SRC_GRAPH: &str = "https://mms.openmbee.org/rdf/ontology/srcGraph";
    pub const DST_GRAPH: &str = "https://mms.openmbee.org/rdf/ontology/dstGraph";
    pub const INS_GRAPH: &str = "https://mms.openmbee.org/rdf/ontology/insGraph";
    pub const DEL_GRAPH: &str = "https://mms.openmbee.org/rdf/ontology/delGraph";
    pub const REQUEST_PATH: &str = "https://mms.openmbee.org/rdf/ontology/requestPath";
    pub const REQUEST_METHOD: &str = "https://mms.openmbee.org/rdf/ontology/requestMethod";
    pub const USER: &str = "https://mms.openmbee.org/rdf/ontology/user";
    pub const RESOURCE: &str = "https://mms.openmbee.org/rdf/ontology/resource";
}

/// Marker IRIs bound by guard inspection and authorization patterns.
///
/// Markers never live in the store; they only appear in CONSTRUCT/SELECT
/// responses and are stripped before anything reaches a client.
pub mod marker {
    /// Subject of every diagnostic triple in a validation CONSTRUCT.
    pub const INSPECT: &str = "urn:mms:inspect";
    /// Predicate linking [`INSPECT`] to a failed condition marker.
    pub const FAILURE: &str = "urn:mms:failure";
    /// Prefix for per-condition failure marker IRIs.
    pub const FAILURE_PREFIX: &str = "urn:mms:failure:";
    /// Subject of the authorization marker triple.
    pub const AUTH: &str = "urn:mms:auth";
    /// Predicate linking [`AUTH`] to [`PERMITTED`].
    pub const AUTH_STATUS: &str = "urn:mms:authStatus";
    /// Object bound only when the permission pattern matched.
    pub const PERMITTED: &str = "urn:mms:permitted";
    /// Predicate linking [`AUTH`] to the addressed resource when it exists.
    pub const EXISTS: &str = "urn:mms:exists";
}

/// Build the IRI of a vocabulary term from its local name.
pub fn mms(local: &str) -> String {
    format!("{}{}", MMS, local)
}

/// Whether a predicate IRI belongs to the server-managed vocabulary.
///
/// Clients may not write these predicates in resource bodies, with the
/// exception of the ones listed in `allowed`.
pub fn is_managed(predicate: &str, allowed: &[&str]) -> bool {
    predicate.starts_with(MMS) && !allowed.contains(&predicate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mms_local_name() {
        assert_eq!(mms("Org"), class::ORG);
        assert_eq!(mms("etag"), prop::ETAG);
    }

    #[test]
    fn test_is_managed() {
        assert!(is_managed(prop::ETAG, &[]));
        assert!(!is_managed(DCT_TITLE, &[]));
        assert!(!is_managed(prop::REF, &[prop::REF, prop::COMMIT]));
    }

    #[test]
    fn test_failure_marker_prefix() {
        assert!(marker::FAILURE_PREFIX.starts_with(marker::FAILURE));
    }
}
