//! Credit cost calculation for transition jobs.
//!
//! The cost of a job is computed once at submission and stored on the job
//! record, so later price changes never affect debits or refunds of jobs
//! already accepted.
//!
//! # Example
//!
//! ```ignore
//! use continuity_models::{JobInputs, TransitionCostCalculator};
//!
//! let cost = TransitionCostCalculator::new(&inputs).calculate();
//! assert_eq!(cost.total, 5);
//! ```

use serde::Serialize;

use crate::inputs::JobInputs;

/// Credits for one generated transition.
pub const TRANSITION_BASE_COST: u64 = 5;

/// Extra credits when a soundtrack prompt is requested.
pub const AUDIO_ADDON_COST: u64 = 1;

// =============================================================================
// Cost Breakdown
// =============================================================================

/// Itemized credit cost of a transition job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostBreakdown {
    /// Credits for generating the transition
    pub base: u64,
    /// Credits for the audio add-on (0 if not requested)
    pub audio: u64,
    /// Grand total
    pub total: u64,
}

impl CostBreakdown {
    /// Human-readable description for the debit transaction.
    pub fn to_description(&self) -> String {
        if self.audio > 0 {
            "Transition generation + audio".to_string()
        } else {
            "Transition generation".to_string()
        }
    }
}

// =============================================================================
// Cost Calculator
// =============================================================================

/// Builder for calculating transition costs.
#[derive(Debug, Clone)]
pub struct TransitionCostCalculator {
    base: u64,
    with_audio: bool,
}

impl TransitionCostCalculator {
    /// Create a calculator for the given inputs.
    pub fn new(inputs: &JobInputs) -> Self {
        Self {
            base: TRANSITION_BASE_COST,
            with_audio: inputs
                .audio_prompt
                .as_deref()
                .map(|p| !p.trim().is_empty())
                .unwrap_or(false),
        }
    }

    /// Override the base price (configured per deployment).
    pub fn with_base_cost(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    pub fn calculate(&self) -> CostBreakdown {
        let audio = if self.with_audio { AUDIO_ADDON_COST } else { 0 };
        CostBreakdown {
            base: self.base,
            audio,
            total: self.base + audio,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
