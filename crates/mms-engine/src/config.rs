//! Engine configuration.

use mms_core::defaults;

/// Behavioral switches of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root IRI under which resources, graphs and policies are minted.
    pub root_context: String,
    /// Report authorization failures as 404 to hide resource existence.
    pub glomar: bool,
    /// Materialize a Model snapshot for each new commit during FINALIZE.
    pub materialize_commits: bool,
    /// Group ids granted AdminCluster at bootstrap.
    pub root_groups: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_context: defaults::ROOT_CONTEXT.to_string(),
            glomar: defaults::GLOMAR,
            materialize_commits: defaults::MATERIALIZE_COMMITS,
            root_groups: split_list(defaults::ROOT_GROUPS),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off"))
        .unwrap_or(default)
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `MMS_ROOT_CONTEXT` | `http://layer1.mms.local` | IRI root |
    /// | `MMS_GLOMAR` | `true` | Hide existence from unauthorized callers |
    /// | `MMS_MATERIALIZE_COMMITS` | `true` | Materialize commit models at FINALIZE |
    /// | `MMS_ROOT_GROUPS` | `super_admins` | Comma list of AdminCluster groups |
    pub fn from_env() -> Self {
        Self {
            root_context: std::env::var("MMS_ROOT_CONTEXT")
                .unwrap_or_else(|_| defaults::ROOT_CONTEXT.to_string()),
            glomar: env_flag("MMS_GLOMAR", defaults::GLOMAR),
            materialize_commits: env_flag("MMS_MATERIALIZE_COMMITS", defaults::MATERIALIZE_COMMITS),
            root_groups: split_list(
                &std::env::var("MMS_ROOT_GROUPS").unwrap_or_else(|_| defaults::ROOT_GROUPS.to_string()),
            ),
        }
    }

    pub fn with_root_context(mut self, root: impl Into<String>) -> Self {
        self.root_context = root.into();
        self
    }

    pub fn with_glomar(mut self, glomar: bool) -> Self {
        self.glomar = glomar;
        self
    }

    pub fn with_materialize_commits(mut self, enabled: bool) -> Self {
        self.materialize_commits = enabled;
        self
    }

    pub fn with_root_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root_groups = groups.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.glomar);
        assert!(config.materialize_commits);
        assert_eq!(config.root_groups, vec!["super_admins"]);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .with_root_context("http://mms.test")
            .with_glomar(false)
            .with_root_groups(["admins", "ops"]);
        assert_eq!(config.root_context, "http://mms.test");
        assert!(!config.glomar);
        assert_eq!(config.root_groups.len(), 2);
    }
}
