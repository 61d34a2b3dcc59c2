use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Binds a message to a project alias and an optional branch. Derived per
/// message, discarded after the run; persisted only as part of a topic
/// binding (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub project: Option<String>,
    pub branch: Option<String>,
}

impl RunContext {
    pub fn is_empty(&self) -> bool {
        self.project.is_none() && self.branch.is_none()
    }

    /// Single-line summary for a progress/final message footer, e.g.
    /// `myapp @ feature/x`. `None` when there's nothing to show.
    pub fn context_line(&self) -> Option<String> {
        match (&self.project, &self.branch) {
            (None, None) => None,
            (Some(p), None) => Some(p.clone()),
            (None, Some(b)) => Some(format!("@ {b}")),
            (Some(p), Some(b)) => Some(format!("{p} @ {b}")),
        }
    }
}

/// Maps project aliases to filesystem roots. Together with [`RunContext`]
/// this determines the subprocess working directory (spec.md §3).
#[derive(Debug, Clone, Default)]
pub struct ProjectsConfig {
    roots: HashMap<String, PathBuf>,
    default_alias: Option<String>,
}

impl ProjectsConfig {
    pub fn new(roots: HashMap<String, PathBuf>, default_alias: Option<String>) -> Self {
        Self {
            roots,
            default_alias,
        }
    }

    pub fn alias_root(&self, alias: &str) -> Option<&Path> {
        self.roots.get(alias).map(|p| p.as_path())
    }

    /// Resolves a `RunContext` to a working directory. Falls back to the
    /// configured default project, then to `None` (caller should use the
    /// process's own cwd). Returns an error if an explicit alias doesn't
    /// exist, rather than silently falling back — a typo'd `/project`
    /// override should not land the agent in the wrong tree.
    pub fn resolve(&self, ctx: &RunContext) -> Result<Option<PathBuf>> {
        let alias = ctx
            .project
            .as_deref()
            .or(self.default_alias.as_deref());
        let Some(alias) = alias else {
            return Ok(None);
        };
        match self.roots.get(alias) {
            Some(root) => Ok(Some(root.clone())),
            None if ctx.project.is_none() => Ok(None),
            None => Err(RelayError::Config(format!(
                "unknown project alias {alias:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_line_formats() {
        let ctx = RunContext {
            project: Some("myapp".into()),
            branch: Some("feature/x".into()),
        };
        assert_eq!(ctx.context_line().as_deref(), Some("myapp @ feature/x"));

        let branch_only = RunContext {
            project: None,
            branch: Some("main".into()),
        };
        assert_eq!(branch_only.context_line().as_deref(), Some("@ main"));

        assert_eq!(RunContext::default().context_line(), None);
    }

    #[test]
    fn resolve_falls_back_to_default_alias() {
        let mut roots = HashMap::new();
        roots.insert("myapp".to_string(), PathBuf::from("/srv/myapp"));
        let cfg = ProjectsConfig::new(roots, Some("myapp".to_string()));

        let resolved = cfg.resolve(&RunContext::default()).unwrap();
        assert_eq!(resolved, Some(PathBuf::from("/srv/myapp")));
    }

    #[test]
    fn resolve_unknown_alias_errors() {
        let cfg = ProjectsConfig::new(HashMap::new(), None);
        let ctx = RunContext {
            project: Some("nope".into()),
            branch: None,
        };
        assert!(cfg.resolve(&ctx).is_err());
    }
}
