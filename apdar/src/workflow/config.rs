use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracecore::processing::RangeConfig;
use tracecore::FileFormat;

use crate::generator::profile::GeneratorConfig;

/// Defaults for a batch run; command-line flags override individual fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub range: RangeConfig,
    /// Worker threads processing inputs concurrently.
    pub jobs: usize,
    pub format: FileFormat,
    pub synth: GeneratorConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            range: RangeConfig::default(),
            jobs: 1,
            format: FileFormat::Container,
            synth: GeneratorConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn workers(&self) -> usize {
        self.jobs.max(1)
    }
}
