//! Engine configuration

use plancalc_core::DEFAULT_SCALE;
use plancalc_formula::DEFAULT_MAX_EXPANSION_DEPTH;

use crate::error::{Error, Result};

/// Largest scale a decimal can carry
const MAX_SCALE: u32 = 28;

/// Options for formula runs and planning functions
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct EngineOptions {
    /// Decimal places results are rounded to (default: 4)
    pub scale: u32,
    /// Maximum sub-formula nesting (default: 32)
    pub max_expansion_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            max_expansion_depth: DEFAULT_MAX_EXPANSION_DEPTH,
        }
    }
}

impl EngineOptions {
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_max_expansion_depth(mut self, depth: usize) -> Self {
        self.max_expansion_depth = depth;
        self
    }

    /// Reject settings no run could honor
    pub fn validate(&self) -> Result<()> {
        if self.scale > MAX_SCALE {
            return Err(Error::invalid_request(format!(
                "scale {} exceeds the maximum of {}",
                self.scale, MAX_SCALE
            )));
        }
        if self.max_expansion_depth == 0 {
            return Err(Error::invalid_request("max_expansion_depth must be at least 1"));
        }
        Ok(())
    }
}
