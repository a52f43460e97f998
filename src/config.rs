//! Engine configuration
//!
//! Every tolerance and threshold the engine uses is carried here and handed
//! to the components at construction time. All fields are optional in JSON.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub layout: LayoutConfig,
    pub thresholds: MatchThresholds,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Initial state of the layout cache toggle when nothing is persisted yet.
    pub cache_enabled: bool,
    /// Per-axis pixel tolerance for region similarity (dedup and validation).
    pub tolerance: i32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            tolerance: 25,
        }
    }
}

/// Match-rate cutoffs for layout validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    /// match_rate >= this => MATCH
    pub match_rate: f32,
    /// match_rate >= this (and below `match_rate`) => PARTIAL_MATCH
    pub partial_rate: f32,
    /// Treat any difference in region count as MISMATCH before comparing.
    pub require_equal_count: bool,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            match_rate: 0.8,
            partial_rate: 0.5,
            require_equal_count: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Observed regions within this tolerance of a tracked region are folded
    /// onto it. 0 keeps exact coordinate keys.
    pub snap_tolerance: i32,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.layout.tolerance < 0 {
            return Err(EngineError::Config(format!(
                "layout.tolerance must be >= 0, got {}",
                self.layout.tolerance
            )));
        }
        if self.memory.snap_tolerance < 0 {
            return Err(EngineError::Config(format!(
                "memory.snap_tolerance must be >= 0, got {}",
                self.memory.snap_tolerance
            )));
        }

        let t = &self.thresholds;
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(t.match_rate) || !in_unit(t.partial_rate) {
            return Err(EngineError::Config(format!(
                "thresholds must lie in [0, 1], got match={} partial={}",
                t.match_rate, t.partial_rate
            )));
        }
        if t.partial_rate > t.match_rate {
            return Err(EngineError::Config(format!(
                "partial_rate ({}) must not exceed match_rate ({})",
                t.partial_rate, t.match_rate
            )));
        }
        Ok(())
    }
}
