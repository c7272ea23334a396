//! Command-line interface definitions.

use clap::{ColorChoice, Parser};
use std::path::PathBuf;

/// Config file name looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "site.toml";

/// Development server with automatic rebuilds and browser reload
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Port number to listen on (default: 8000)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Network interface to bind (e.g., 127.0.0.1, 0.0.0.0)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Open the site in the default web browser after startup
    #[arg(short, long)]
    pub browser: bool,

    /// Bind to all IPv6 interfaces ([::]); overrides --address
    #[arg(short = '6', long)]
    pub ipv6: bool,

    /// Config file path (default: site.toml)
    #[arg(short = 'C', long, default_value = DEFAULT_CONFIG_FILE, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Control colored output (auto, always, never)
    #[arg(long, default_value = "auto")]
    pub color: ColorChoice,

    /// Enable verbose output for debugging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// True when no explicit config path was given. The build command
    /// only gets a `--config=` argument for non-default paths.
    pub fn uses_default_config(&self) -> bool {
        self.config == PathBuf::from(DEFAULT_CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["liveserve"]);
        assert_eq!(cli.port, None);
        assert_eq!(cli.address, None);
        assert!(!cli.browser);
        assert!(!cli.ipv6);
        assert!(cli.uses_default_config());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "liveserve",
            "-p",
            "8080",
            "-a",
            "0.0.0.0",
            "-b",
            "-6",
            "-C",
            "other.toml",
        ]);
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.address.as_deref(), Some("0.0.0.0"));
        assert!(cli.browser);
        assert!(cli.ipv6);
        assert!(!cli.uses_default_config());
    }
}
