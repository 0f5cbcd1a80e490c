//! Engine configuration loading
//!
//! Loads configuration from `<root>/.tickets/config.toml` (or the
//! `TICKETS_CONFIG` env path). Every field has a default, so a repository
//! without a config file behaves exactly like one with an empty file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, TicketsError};
use crate::report::ReportFormat;

/// Root configuration for the ticket engine
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TicketsConfig {
    /// Directory (relative to the repository root) holding ticket dirs
    #[serde(default = "default_tickets_dir")]
    pub tickets_dir: String,

    /// Text inserted under a section heading added by repair
    #[serde(default = "default_section_placeholder")]
    pub section_placeholder: String,

    /// Serialisation used for issues reports
    #[serde(default)]
    pub report_format: ReportFormat,

    /// Hold unmarked log entries to the strict schema too
    #[serde(default)]
    pub strict_logs: bool,

    /// Append a machine-marked entry to each ticket a repair changed
    #[serde(default = "default_log_repairs")]
    pub log_repairs: bool,

    /// `actor_id` of repair log entries
    #[serde(default = "default_repair_actor_id")]
    pub repair_actor_id: String,
}

fn default_tickets_dir() -> String {
    ".tickets".to_string()
}

fn default_section_placeholder() -> String {
    "(fill in)".to_string()
}

fn default_log_repairs() -> bool {
    true
}

fn default_repair_actor_id() -> String {
    "tickets-repair".to_string()
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            tickets_dir: default_tickets_dir(),
            section_placeholder: default_section_placeholder(),
            report_format: ReportFormat::default(),
            strict_logs: false,
            log_repairs: default_log_repairs(),
            repair_actor_id: default_repair_actor_id(),
        }
    }
}

impl TicketsConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "TICKETS_CONFIG";

    /// Default config filename inside the tickets directory
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "config.toml";

    /// Load configuration for the repository at `root`
    ///
    /// Resolution order:
    /// 1. `TICKETS_CONFIG` environment variable
    /// 2. `<root>/.tickets/config.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::resolve_config_path(root);

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "tickets config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TicketsError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: TicketsConfig = toml::from_str(contents)
            .map_err(|e| TicketsError::Config(format!("failed to parse config: {e}")))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path(root: &Path) -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }
        root.join(default_tickets_dir())
            .join(Self::DEFAULT_CONFIG_FILENAME)
    }

    fn validate(&self) -> Result<()> {
        let dir = self.tickets_dir.trim_matches('/');
        if dir.is_empty() || dir.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(TicketsError::Config(format!(
                "tickets_dir '{}' must be a relative path inside the repository",
                self.tickets_dir
            )));
        }
        if self.tickets_dir.starts_with('/') {
            return Err(TicketsError::Config(format!(
                "tickets_dir '{}' must not be absolute",
                self.tickets_dir
            )));
        }
        if self.section_placeholder.contains('\n') {
            return Err(TicketsError::Config(
                "section_placeholder must be a single line".to_string(),
            ));
        }
        if self.section_placeholder.trim().is_empty() {
            tracing::warn!("section_placeholder is empty; added sections will have no body text");
        }
        if self.repair_actor_id.trim().is_empty() {
            return Err(TicketsError::Config(
                "repair_actor_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// `tickets_dir` without surrounding slashes.
    pub fn tickets_root(&self) -> &str {
        self.tickets_dir.trim_matches('/')
    }
}
