// Node Configuration
// CLI args merged over a JSON config file

use clap::Parser;
use kolibri_core::NodeId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Kolibri swarm node", long_about = None)]
pub struct Cli {
    /// JSON config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Data directory for WAL and snapshots
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// 16-digit node id (overrides the config file)
    #[arg(long)]
    pub node_id: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmSection {
    pub max_steps: u32,
    pub max_stack: u32,
    pub trace_depth: u32,
}

impl Default for VmSection {
    fn default() -> Self {
        VmSection {
            max_steps: 1024,
            max_stack: 128,
            trace_depth: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FkvSection {
    pub top_k: usize,
}

impl Default for FkvSection {
    fn default() -> Self {
        FkvSection { top_k: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceSection {
    pub wal_path: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_interval: usize,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        PersistenceSection {
            wal_path: None,
            snapshot_dir: None,
            snapshot_interval: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainSection {
    pub min_pou_threshold: f64,
    pub max_mdl_delta: Option<f64>,
}

impl Default for ChainSection {
    fn default() -> Self {
        ChainSection {
            min_pou_threshold: 0.8,
            max_mdl_delta: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwarmSection {
    pub node_id: String,
    pub version: u16,
    pub services: u16,
    pub ed25519_public_key_path: Option<PathBuf>,
    pub hmac_key_path: Option<PathBuf>,
}

impl Default for SwarmSection {
    fn default() -> Self {
        SwarmSection {
            node_id: "0000000000000001".to_string(),
            version: 1,
            services: 0,
            ed25519_public_key_path: None,
            hmac_key_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub vm: VmSection,
    pub fkv: FkvSection,
    pub persistence: PersistenceSection,
    pub chain: ChainSection,
    pub swarm: SwarmSection,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved runtime configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub node_id: NodeId,
    pub vm: VmSection,
    pub fkv: FkvSection,
    pub persistence: PersistenceSection,
    pub chain: ChainSection,
    pub swarm: SwarmSection,
}

impl NodeConfig {
    /// Merge CLI args over the file config and validate the result.
    pub fn resolve(cli: &Cli) -> Result<NodeConfig, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let node_id_str = cli.node_id.clone().unwrap_or_else(|| file.swarm.node_id.clone());
        let node_id = NodeId::parse(&node_id_str).map_err(|error| {
            ConfigError::Invalid(format!("swarm.node_id {node_id_str:?}: {error}"))
        })?;

        let config = NodeConfig {
            data_dir: cli.data_dir.clone(),
            node_id,
            vm: file.vm,
            fkv: file.fkv,
            persistence: file.persistence,
            chain: file.chain,
            swarm: file.swarm,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vm.max_steps == 0 || self.vm.max_stack == 0 || self.vm.trace_depth == 0 {
            return Err(ConfigError::Invalid(
                "vm.max_steps, vm.max_stack and vm.trace_depth must be non-zero".into(),
            ));
        }
        if self.fkv.top_k == 0 {
            return Err(ConfigError::Invalid("fkv.top_k must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.chain.min_pou_threshold) {
            return Err(ConfigError::Invalid(
                "chain.min_pou_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn wal_path(&self) -> PathBuf {
        self.persistence
            .wal_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("fkv").join("wal.log"))
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.persistence
            .snapshot_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("fkv").join("snapshots"))
    }
}
