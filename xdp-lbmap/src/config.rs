//! YAML configuration parsing and validation.
//!
//! Everything the control surface needs is resolved here, from an optional
//! YAML file with command-line overrides layered on top.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde::Deserialize;
use xdp_lbmap_common::DEFAULT_FORWARD_PARAMS_PIN;

// ---------------------------------------------------------------------------
// Top-Level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Pin path of the forward table.
    #[serde(default = "default_map")]
    pub map: PathBuf,

    /// What to do once the table is loaded.
    #[serde(default)]
    pub action: Action,

    #[serde(default)]
    pub server: ServerConfig,

    /// Rule used by the `insert` and `delete` actions.
    #[serde(default)]
    pub rule: RuleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            map: default_map(),
            action: Action::default(),
            server: ServerConfig::default(),
            rule: RuleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Print every entry in the table.
    List,
    /// Fill the table with placeholder entries.
    #[value(name = "batchinsert")]
    BatchInsert,
    /// Insert the configured rule.
    Insert,
    /// Delete the configured token.
    Delete,
    /// Serve the rule update API until terminated.
    #[default]
    Serve,
}

// ---------------------------------------------------------------------------
// Server Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Listen address of the rule API.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_map() -> PathBuf {
    PathBuf::from(DEFAULT_FORWARD_PARAMS_PIN)
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9091))
}

// ---------------------------------------------------------------------------
// Rule Config
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct RuleConfig {
    /// Fingerprint token, 16 hex characters.
    #[serde(default)]
    pub token: Option<String>,

    /// Destination IPv4 address.
    #[serde(default)]
    pub gsaddress: Option<String>,

    /// Destination port.
    #[serde(default)]
    pub gsport: Option<String>,
}

// ---------------------------------------------------------------------------
// Command-Line Overrides
// ---------------------------------------------------------------------------

/// Flags that take precedence over the config file.
#[derive(Debug, Default, Args)]
pub struct Overrides {
    /// Pin path of the forward table.
    #[arg(short, long)]
    pub map: Option<PathBuf>,

    /// Listen address of the rule API.
    #[arg(short, long)]
    pub address: Option<SocketAddr>,

    /// Action to run after loading the table.
    #[arg(long, value_enum)]
    pub action: Option<Action>,

    /// Fingerprint token for insert and delete.
    #[arg(long)]
    pub token: Option<String>,

    /// Destination address for insert.
    #[arg(long)]
    pub gsaddress: Option<String>,

    /// Destination port for insert.
    #[arg(long)]
    pub gsport: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading & Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load config from an optional YAML file, then apply overrides.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_yaml::from_str(&contents).with_context(|| "parsing YAML config")?
            }
            None => Config::default(),
        };

        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(map) = overrides.map {
            self.map = map;
        }
        if let Some(bind) = overrides.address {
            self.server.bind = bind;
        }
        if let Some(action) = overrides.action {
            self.action = action;
        }
        if overrides.token.is_some() {
            self.rule.token = overrides.token;
        }
        if overrides.gsaddress.is_some() {
            self.rule.gsaddress = overrides.gsaddress;
        }
        if overrides.gsport.is_some() {
            self.rule.gsport = overrides.gsport;
        }
    }

    /// Validate configuration consistency.
    fn validate(&self) -> Result<()> {
        if self.map.as_os_str().is_empty() {
            bail!("map path must not be empty");
        }

        match self.action {
            Action::Insert => {
                if self.rule.token.is_none()
                    || self.rule.gsaddress.is_none()
                    || self.rule.gsport.is_none()
                {
                    bail!("action 'insert' requires token, gsaddress and gsport");
                }
            }
            Action::Delete => {
                if self.rule.token.is_none() {
                    bail!("action 'delete' requires token");
                }
            }
            Action::List | Action::BatchInsert | Action::Serve => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::load(None, Overrides::default()).unwrap();
        assert_eq!(config.map, PathBuf::from("/sys/fs/bpf/ens5/forward_params"));
        assert_eq!(config.server.bind, "0.0.0.0:9091".parse().unwrap());
        assert_eq!(config.action, Action::Serve);
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
map: /sys/fs/bpf/eth0/forward_params
action: batchinsert
server:
  bind: "127.0.0.1:8000"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.map, PathBuf::from("/sys/fs/bpf/eth0/forward_params"));
        assert_eq!(config.action, Action::BatchInsert);
        assert_eq!(config.server.bind.port(), 8000);
    }

    #[test]
    fn test_example_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../xdp-lbmap.example.yaml");
        let config = Config::load(Some(&path), Overrides::default()).unwrap();
        assert_eq!(config.action, Action::Serve);
        assert_eq!(config.rule.gsport.as_deref(), Some("8080"));
    }

    #[test]
    fn test_missing_file() {
        let path = Path::new("/nonexistent/xdp-lbmap.yaml");
        assert!(Config::load(Some(path), Overrides::default()).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let yaml = r#"
action: list
rule:
  token: "0102030405060708"
"#;
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.apply(Overrides {
            action: Some(Action::Delete),
            token: Some("aaaaaaaaaaaaaaaa".into()),
            ..Default::default()
        });
        config.validate().unwrap();
        assert_eq!(config.action, Action::Delete);
        assert_eq!(config.rule.token.as_deref(), Some("aaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn test_insert_requires_rule() {
        let yaml = r#"
action: insert
rule:
  token: "0102030405060708"
  gsaddress: "10.0.0.1"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delete_requires_token() {
        let mut config = Config::default();
        config.action = Action::Delete;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let yaml = "action: purge\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }
}
