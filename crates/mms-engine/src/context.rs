//! Per-request caller context.

use mms_core::{IriFactory, Subject};

/// Who is making a request, resolved to IRIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: String,
    pub subject: Subject,
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Resolve an authenticated (user, groups) tuple against the IRI root.
    pub fn new(iris: &IriFactory, user_id: &str, groups: &[String]) -> Self {
        Self {
            user_id: user_id.to_string(),
            subject: Subject {
                user: iris.user(user_id),
                groups: groups.iter().map(|g| iris.group(g)).collect(),
            },
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn user_iri(&self) -> &str {
        &self.subject.user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_user_and_groups() {
        let iris = IriFactory::new("http://mms.test");
        let ctx = RequestContext::new(&iris, "alice", &["eng".to_string()]);
        assert_eq!(ctx.user_iri(), "http://mms.test/users/alice");
        assert_eq!(ctx.subject.groups, vec!["http://mms.test/groups/eng"]);
        assert_eq!(ctx.subject.identities().len(), 2);
    }
}
