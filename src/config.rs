// SPDX-License-Identifier: Apache-2.0

//! Campaign configuration, read from a TOML file.
//!
//! ```toml
//! seed = 7
//! output_dir = "out"
//! chain_length = 2
//!
//! [budget]
//! iterations = 100
//!
//! [executor]
//! interpreter = "python3"
//! timeout_secs = 60
//!
//! [relations.ChangeQubitOrder]
//! weight = 2.0
//!
//! [relations.InjectNullEffect]
//! ```
//!
//! Every table is optional except `output_dir` and `budget`. Leaving out
//! `[relations]` enables every relation with its defaults; naming any
//! relation enables exactly the named ones.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::detectors::{self, Detector};
use crate::executor::ExecutorConfig;
use crate::generator::GeneratorConfig;
use crate::morph_error::{MorphError, Result};
use crate::relations::{build_relation, get_all_relations, MetamorphicRelation};
use crate::retest::RetestConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Budget {
    pub iterations: Option<u64>,
    pub seconds: Option<u64>,
}

impl Budget {
    pub fn wall_clock(&self) -> Option<Duration> {
        self.seconds.map(Duration::from_secs)
    }
}

fn default_detector_name() -> String {
    "ks".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_name")]
    pub name: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            name: default_detector_name(),
        }
    }
}

impl DetectorConfig {
    pub fn build(&self) -> Result<Box<dyn Detector>> {
        detectors::build_detector(&self.name)
    }
}

fn default_chain_length() -> usize {
    1
}

fn default_alpha() -> f64 {
    0.05
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuzzConfig {
    #[serde(default)]
    pub seed: u64,
    pub output_dir: PathBuf,
    pub budget: Budget,
    /// Most relations applied to one baseline.
    #[serde(default = "default_chain_length")]
    pub chain_length: usize,
    /// p-values below this are reported as divergent.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Executor for follow-up programs; the baseline executor when absent.
    #[serde(default)]
    pub followup_executor: Option<ExecutorConfig>,
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Relation name to its config table.
    #[serde(default)]
    pub relations: Option<toml::Table>,
    #[serde(default)]
    pub retest: RetestConfig,
}

impl FuzzConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: FuzzConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MorphError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        debug!("config: loading {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Checks every registry name and numeric bound; builds the relations
    /// once so bad relation tables fail here rather than mid-campaign.
    pub fn validate(&self) -> Result<()> {
        if self.budget.iterations.is_none() && self.budget.seconds.is_none() {
            return Err(MorphError::Config(
                "budget needs iterations and/or seconds".to_string(),
            ));
        }
        if self.chain_length == 0 {
            return Err(MorphError::Config("chain_length must be >= 1".to_string()));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(MorphError::Config(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        self.generator.validate()?;
        self.executor.validate()?;
        if let Some(followup) = &self.followup_executor {
            followup.validate()?;
        }
        self.detector.build()?;
        self.retest.validate()?;
        let relations = self.build_relations()?;
        if relations.is_empty() {
            return Err(MorphError::Config("no relations enabled".to_string()));
        }
        if relations.iter().all(|r| r.weight() == 0.0) {
            return Err(MorphError::Config(
                "every enabled relation has weight 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build_relations(&self) -> Result<Vec<Box<dyn MetamorphicRelation>>> {
        match &self.relations {
            None => Ok(get_all_relations()),
            Some(table) => table
                .iter()
                .map(|(name, value)| build_relation(name, Some(value)))
                .collect(),
        }
    }

    pub fn followup_executor(&self) -> &ExecutorConfig {
        self.followup_executor.as_ref().unwrap_or(&self.executor)
    }
}
