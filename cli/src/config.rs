//! TOML configuration for step limits and citation settings.
//!
//! Every field is optional; absent fields keep the built-in defaults, so a
//! config file only needs to name what it changes.

use std::path::Path;

use anyhow::Context;
use rlm_cite::CitationConfig;
use rlm_types::StepLimits;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    limits: LimitsSection,
    #[serde(default)]
    citation: CitationSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LimitsSection {
    wall_clock_ms: Option<u64>,
    max_stdout_bytes: Option<usize>,
    max_stderr_bytes: Option<usize>,
    max_state_bytes: Option<usize>,
    max_span_entries: Option<usize>,
    max_tool_requests: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CitationSection {
    preview_bytes: Option<usize>,
}

impl FileConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn step_limits(&self) -> anyhow::Result<StepLimits> {
        let defaults = StepLimits::default();
        StepLimits::new(
            self.limits.wall_clock_ms.unwrap_or(defaults.wall_clock_ms),
            self.limits
                .max_stdout_bytes
                .unwrap_or(defaults.max_stdout_bytes),
            self.limits
                .max_stderr_bytes
                .unwrap_or(defaults.max_stderr_bytes),
            self.limits
                .max_state_bytes
                .unwrap_or(defaults.max_state_bytes),
            self.limits
                .max_span_entries
                .unwrap_or(defaults.max_span_entries),
            self.limits
                .max_tool_requests
                .unwrap_or(defaults.max_tool_requests),
        )
        .context("invalid [limits] in config")
    }

    pub fn citation_config(&self) -> CitationConfig {
        let mut config = CitationConfig::default();
        if let Some(preview_bytes) = self.citation.preview_bytes {
            config.preview_bytes = preview_bytes;
        }
        config
    }
}
