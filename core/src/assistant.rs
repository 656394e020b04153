//! Assistant registry: the closed set of command templates a Session can run
//! (spec.md §3 "AssistantConfig", §6). Loaded once at boot from
//! `config.assistants_file`; a bare `shell` assistant is always present so a
//! minimal deployment (or a test) works without a registry file on disk.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::ConfigError;

/// A named command template. `start_cmd` launches the assistant fresh;
/// `restart_cmd`/`permissive_restart_cmd` are used on session restart
/// depending on `Session.permissive_mode` (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssistantConfig {
    pub name: String,
    pub binary: String,
    pub start_cmd: Vec<String>,
    pub restart_cmd: Vec<String>,
    #[serde(default)]
    pub permissive_restart_cmd: Option<Vec<String>>,
    #[serde(default)]
    pub supports_permissive: bool,
}

impl AssistantConfig {
    fn bare_shell() -> Self {
        #[cfg(unix)]
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        #[cfg(not(unix))]
        let shell = "cmd.exe".to_string();
        AssistantConfig {
            name: "shell".to_string(),
            binary: shell.clone(),
            start_cmd: vec![shell.clone(), "-l".to_string()],
            restart_cmd: vec![shell.clone(), "-l".to_string()],
            permissive_restart_cmd: None,
            supports_permissive: false,
        }
    }

    /// The command for the *next* restart, honoring permissive mode
    /// (spec.md §4.2 Creation, rule (iii)).
    pub fn restart_argv(&self, permissive: bool) -> &[String] {
        if permissive {
            self.permissive_restart_cmd.as_deref().unwrap_or(&self.restart_cmd)
        } else {
            &self.restart_cmd
        }
    }
}

#[derive(Debug, Deserialize)]
struct AssistantsFile {
    assistants: Vec<AssistantConfig>,
}

pub struct AssistantRegistry {
    by_name: HashMap<String, AssistantConfig>,
}

impl AssistantRegistry {
    pub fn get(&self, name: &str) -> Option<&AssistantConfig> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(|s| s.as_str())
    }

    fn from_list(mut list: Vec<AssistantConfig>) -> Self {
        if !list.iter().any(|a| a.name == "shell") {
            list.push(AssistantConfig::bare_shell());
        }
        let by_name = list.into_iter().map(|a| (a.name.clone(), a)).collect();
        AssistantRegistry { by_name }
    }

    fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(data) => {
                let parsed: AssistantsFile =
                    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                        path: path.display().to_string(),
                        source,
                    })?;
                Ok(Self::from_list(parsed.assistants))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::from_list(Vec::new())),
            Err(source) => Err(ConfigError::Read { path: path.display().to_string(), source }),
        }
    }
}

static REGISTRY: OnceLock<AssistantRegistry> = OnceLock::new();

/// Load the assistant registry once from `config.assistants_file`. Falls back
/// to a bare-shell-only registry if the file is missing or invalid; a
/// malformed file is logged and treated as absent rather than aborting boot.
pub fn ensure_loaded() -> &'static AssistantRegistry {
    REGISTRY.get_or_init(|| {
        let cfg = crate::config::ensure_loaded();
        match AssistantRegistry::load(&cfg.assistants_file) {
            Ok(reg) => reg,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load assistants file, using bare shell only");
                AssistantRegistry::from_list(Vec::new())
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_shell_always_present() {
        let reg = AssistantRegistry::from_list(Vec::new());
        assert!(reg.get("shell").is_some());
    }

    #[test]
    fn restart_argv_picks_permissive_variant() {
        let a = AssistantConfig {
            name: "claude".into(),
            binary: "claude".into(),
            start_cmd: vec!["claude".into()],
            restart_cmd: vec!["claude".into()],
            permissive_restart_cmd: Some(vec!["claude".into(), "--yes".into()]),
            supports_permissive: true,
        };
        assert_eq!(a.restart_argv(false), &a.restart_cmd[..]);
        assert_eq!(a.restart_argv(true), &["claude".to_string(), "--yes".to_string()][..]);
    }

    #[test]
    fn restart_argv_falls_back_without_permissive_variant() {
        let a = AssistantConfig {
            name: "shell".into(),
            binary: "bash".into(),
            start_cmd: vec!["bash".into()],
            restart_cmd: vec!["bash".into()],
            permissive_restart_cmd: None,
            supports_permissive: false,
        };
        assert_eq!(a.restart_argv(true), &a.restart_cmd[..]);
    }
}
