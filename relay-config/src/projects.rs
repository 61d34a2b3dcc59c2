//! Loads the project alias → filesystem root mapping consumed by
//! `relay_core::ProjectsConfig` (spec.md §3, §2.3).
//!
//! `RELAY_PROJECTS` is a comma-separated list of `alias=path` pairs, e.g.
//! `myapp=/srv/myapp,docs=/srv/docs`. `RELAY_DEFAULT_PROJECT` names the
//! alias used when a message carries no explicit `/project` override.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use relay_core::{ProjectsConfig, RelayError, Result};

pub fn load_projects_config() -> Result<ProjectsConfig> {
    let mut roots = HashMap::new();
    if let Ok(raw) = env::var("RELAY_PROJECTS") {
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (alias, path) = entry.split_once('=').ok_or_else(|| {
                RelayError::Config(format!(
                    "RELAY_PROJECTS entry {entry:?} is not of the form alias=path"
                ))
            })?;
            let alias = alias.trim();
            let path = path.trim();
            if alias.is_empty() || path.is_empty() {
                return Err(RelayError::Config(format!(
                    "RELAY_PROJECTS entry {entry:?} is not of the form alias=path"
                )));
            }
            roots.insert(alias.to_string(), PathBuf::from(path));
        }
    }

    let default_alias = env::var("RELAY_DEFAULT_PROJECT").ok().filter(|s| !s.trim().is_empty());
    if let Some(alias) = &default_alias {
        if !roots.contains_key(alias) {
            return Err(RelayError::Config(format!(
                "RELAY_DEFAULT_PROJECT {alias:?} is not one of RELAY_PROJECTS' aliases"
            )));
        }
    }

    Ok(ProjectsConfig::new(roots, default_alias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        env::remove_var("RELAY_PROJECTS");
        env::remove_var("RELAY_DEFAULT_PROJECT");
    }

    #[test]
    #[serial]
    fn empty_when_unset() {
        clear();
        let cfg = load_projects_config().unwrap();
        assert!(cfg.alias_root("anything").is_none());
    }

    #[test]
    #[serial]
    fn parses_comma_separated_pairs() {
        clear();
        env::set_var("RELAY_PROJECTS", "myapp=/srv/myapp, docs=/srv/docs");

        let cfg = load_projects_config().unwrap();
        assert_eq!(cfg.alias_root("myapp"), Some(PathBuf::from("/srv/myapp")).as_deref());
        assert_eq!(cfg.alias_root("docs"), Some(PathBuf::from("/srv/docs")).as_deref());

        clear();
    }

    #[test]
    #[serial]
    fn rejects_default_alias_not_in_projects() {
        clear();
        env::set_var("RELAY_PROJECTS", "myapp=/srv/myapp");
        env::set_var("RELAY_DEFAULT_PROJECT", "nope");

        assert!(load_projects_config().is_err());

        clear();
    }

    #[test]
    #[serial]
    fn rejects_malformed_entry() {
        clear();
        env::set_var("RELAY_PROJECTS", "myapp-without-equals");

        assert!(load_projects_config().is_err());

        clear();
    }
}
