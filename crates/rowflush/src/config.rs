//! Flush tuning, loadable from YAML.

use crate::error::ConfigError;
use rowflush_graph::{AnalysisOptions, DEFAULT_FORWARD_SEARCH_LIMIT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default number of analyze-and-break rounds per graph.
pub const DEFAULT_MAX_RESOLUTION_PASSES: usize = 16;

/// Settings for [`FlushOrchestrator`](crate::FlushOrchestrator).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct FlushConfig {
    /// Maximum edge visits when searching for a cycle through a forward edge.
    pub forward_search_limit: usize,

    /// Maximum analyze-and-break rounds for one graph.
    pub max_resolution_passes: usize,

    /// Break a NOT NULL link when a cycle has no nullable one. The database
    /// will then reject the NULL unless the column is not really NOT NULL.
    pub break_non_nullable: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            forward_search_limit: DEFAULT_FORWARD_SEARCH_LIMIT,
            max_resolution_passes: DEFAULT_MAX_RESOLUTION_PASSES,
            break_non_nullable: false,
        }
    }
}

impl FlushConfig {
    /// Parse and validate YAML. Missing keys take their defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Yaml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Yaml(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would make every cyclic flush fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resolution_passes == 0 {
            return Err(ConfigError::Invalid(
                "max-resolution-passes must be at least 1".to_string(),
            ));
        }
        if self.forward_search_limit == 0 {
            return Err(ConfigError::Invalid(
                "forward-search-limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Options for the depth-first analysis.
    #[must_use]
    pub fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            forward_search_limit: self.forward_search_limit,
        }
    }
}
