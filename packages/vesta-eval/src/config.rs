//! Typed evaluator configuration, loaded from a TOML file per spec §6's
//! `[Evaluator]`/`[CacheServer]`/`[Repository]`/`[Run_Tool]`/
//! `[UserInterface]` sections.
//!
//! Grounded on `hurry`'s `toml`+`serde` config idiom (its `DaemonContext`
//! reads a typed struct the same way) rather than hand-parsed key/value
//! pairs the way the original C++ evaluator's `.vesta` files are read.

use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::Deserialize;

fn default_cache_server_host() -> String {
    "localhost".to_string()
}

fn default_cache_server_port() -> u16 {
    21000
}

fn default_repository_host() -> String {
    "localhost".to_string()
}

fn default_repository_port() -> u16 {
    21100
}

fn default_run_tool_hosts() -> Vec<String> {
    vec!["localhost".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
pub struct EvaluatorSection {
    #[serde(default)]
    pub default_platform: Option<String>,
    #[serde(default = "default_true")]
    pub record_stack: bool,
    #[serde(default)]
    pub dependency_check: bool,
}

impl Default for EvaluatorSection {
    fn default() -> Self {
        EvaluatorSection {
            default_platform: None,
            record_stack: true,
            dependency_check: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheServerSection {
    #[serde(default = "default_cache_server_host")]
    pub host: String,
    #[serde(default = "default_cache_server_port")]
    pub port: u16,
}

impl Default for CacheServerSection {
    fn default() -> Self {
        CacheServerSection {
            host: default_cache_server_host(),
            port: default_cache_server_port(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RepositorySection {
    #[serde(default = "default_repository_host")]
    pub host: String,
    #[serde(default = "default_repository_port")]
    pub port: u16,
}

impl Default for RepositorySection {
    fn default() -> Self {
        RepositorySection {
            host: default_repository_host(),
            port: default_repository_port(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RunToolSection {
    #[serde(default = "default_run_tool_hosts")]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub platform_overrides: std::collections::BTreeMap<String, Vec<String>>,
}

impl Default for RunToolSection {
    fn default() -> Self {
        RunToolSection {
            hosts: default_run_tool_hosts(),
            platform_overrides: Default::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserInterfaceSection {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub cstats: bool,
    #[serde(default)]
    pub mstats: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(rename = "Evaluator", default)]
    pub evaluator: EvaluatorSection,
    #[serde(rename = "CacheServer", default)]
    pub cache_server: CacheServerSection,
    #[serde(rename = "Repository", default)]
    pub repository: RepositorySection,
    #[serde(rename = "Run_Tool", default)]
    pub run_tool: RunToolSection,
    #[serde(rename = "UserInterface", default)]
    pub user_interface: UserInterfaceSection,
}

impl EvaluatorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: EvaluatorConfig = toml::from_str("").unwrap();
        assert_eq!(config.cache_server.port, 21000);
        assert_eq!(config.run_tool.hosts, vec!["localhost".to_string()]);
        assert!(config.evaluator.record_stack);
    }

    #[test]
    fn partial_section_overrides_only_given_fields() {
        let toml_text = r#"
            [CacheServer]
            host = "cache.example"
        "#;
        let config: EvaluatorConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.cache_server.host, "cache.example");
        assert_eq!(config.cache_server.port, 21000);
    }
}
