use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "nfldap")]
#[command(about = "A no-frills LDAP server backed by a document store")]
#[command(version)]
pub struct CliArgs {
    /// Path to YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Set log level: debug, info, warn, error
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// The recognized configuration-file keys; anything else is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub port: u16,
    #[serde(rename = "aclRefreshPeriod")]
    pub acl_refresh_period: i64,
    #[serde(rename = "noAuthentication")]
    pub no_authentication: bool,
    pub storage: StorageConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            port: 3890,
            acl_refresh_period: -1,
            no_authentication: false,
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageChoice,
    pub mongodb: MongoConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageChoice::Mongodb,
            mongodb: MongoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageChoice {
    Mongodb,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    #[serde(rename = "aceCollection")]
    pub ace_collection: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost".to_string(),
            database: "directory".to_string(),
            collection: "rootdn".to_string(),
            ace_collection: "accessControl".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub acl_refresh_period: i64,
    pub no_authentication: bool,
    pub storage: StorageConfig,
    pub log_level: tracing::Level,
}

impl Config {
    pub fn from_cli_args(args: CliArgs) -> crate::Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    crate::Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                serde_yaml::from_str::<ConfigFile>(&text).map_err(|e| {
                    crate::Error::Config(format!("cannot parse {}: {e}", path.display()))
                })?
            }
            None => ConfigFile::default(),
        };

        let log_level = if args.verbose {
            tracing::Level::DEBUG
        } else {
            match args.log_level.to_lowercase().as_str() {
                "debug" => tracing::Level::DEBUG,
                "info" => tracing::Level::INFO,
                "warn" => tracing::Level::WARN,
                "error" => tracing::Level::ERROR,
                _ => tracing::Level::INFO,
            }
        };

        Ok(Config {
            bind_address: args.bind_address,
            port: args.port.unwrap_or(file.port),
            acl_refresh_period: file.acl_refresh_period,
            no_authentication: file.no_authentication,
            storage: file.storage,
            log_level,
        })
    }
}
