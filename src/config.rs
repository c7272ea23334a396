//! Site configuration management for `site.toml`.
//!
//! The server only needs to know how to invoke the site's build command,
//! where the generated output lands, and which directories feed the build.
//! Everything else in the site's configuration belongs to the generator
//! itself and is passed through untouched.
//!
//! # Example
//!
//! ```toml
//! [build]
//! command = ["nikola", "build"]
//! output = "output"
//! index = "index.html"
//!
//! [watch]
//! sources = ["content", "templates"]
//! themes = ["themes/default"]
//!
//! [serve]
//! port = 8000
//! address = "127.0.0.1"
//! ```

use crate::{cli::Cli, log};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    path::PathBuf,
};
use thiserror::Error;

/// Configuration failures that have a precise cause worth naming.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("[build] command is empty; set it to the site's build argv")]
    EmptyBuildCommand,
}

/// Top-level configuration, merged from `site.toml` and CLI options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub build: BuildConfig,
    pub watch: WatchConfig,
    pub serve: ServeConfig,

    /// Absolute path of the loaded config file.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Whether the default config file name was used (no `--config`
    /// override is forwarded to the build command in that case).
    #[serde(skip)]
    default_config: bool,
}

/// `[build]` section: how to rebuild the site and where output lands.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Build command argv, e.g. `["nikola", "build"]`.
    pub command: Vec<String>,

    /// Directory the generator writes the site into.
    pub output: PathBuf,

    /// Index file substituted for directory requests.
    pub index: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            output: PathBuf::from("output"),
            index: "index.html".to_string(),
        }
    }
}

/// `[watch]` section: source trees whose changes trigger rebuilds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Content, template and asset directories.
    pub sources: Vec<PathBuf>,

    /// Theme directories (may live outside the site root).
    pub themes: Vec<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                PathBuf::from("content"),
                PathBuf::from("templates"),
                PathBuf::from("assets"),
            ],
            themes: Vec::new(),
        }
    }
}

/// `[serve]` section: where the development server listens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// HTTP port number.
    pub port: u16,

    /// Address to bind.
    /// - `127.0.0.1` (default): localhost only
    /// - `0.0.0.0`: all interfaces (LAN accessible)
    pub address: IpAddr,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

impl SiteConfig {
    /// Load configuration from the CLI-selected file and apply CLI
    /// overrides. Relative paths are made absolute so they can be
    /// compared against watcher event paths.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = std::path::absolute(&cli.config)
            .with_context(|| format!("cannot resolve config path {}", cli.config.display()))?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let mut config = Self::parse(&content)?;
        config.config_path = path;
        config.default_config = cli.uses_default_config();

        if let Some(port) = cli.port {
            config.serve.port = port;
        }
        if cli.ipv6 {
            config.serve.address = IpAddr::V6(Ipv6Addr::UNSPECIFIED);
        } else if let Some(address) = &cli.address {
            let bare = address.trim_start_matches('[').trim_end_matches(']');
            config.serve.address = bare
                .parse()
                .with_context(|| format!("invalid bind address {address:?}"))?;
        }

        config.build.output = std::path::absolute(&config.build.output)?;
        for dir in config
            .watch
            .sources
            .iter_mut()
            .chain(config.watch.themes.iter_mut())
        {
            *dir = std::path::absolute(&*dir)?;
        }

        Ok(config)
    }

    /// Parse TOML content, warning about unknown fields.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        for field in &ignored {
            log!("config"; "ignoring unknown field: {field}");
        }
        Ok(config)
    }

    /// Child-process argv for one rebuild. When a non-default config path
    /// is in use it is forwarded to the build command as `--config=...`.
    pub fn build_argv(&self) -> Result<Vec<String>, ConfigError> {
        if self.build.command.is_empty() {
            return Err(ConfigError::EmptyBuildCommand);
        }
        let mut argv = self.build.command.clone();
        if !self.default_config {
            argv.push(format!("--config={}", self.config_path.display()));
        }
        Ok(argv)
    }
}
