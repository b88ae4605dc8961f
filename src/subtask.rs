//! Subtask names produced by a portfolio-analysis run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Subtasks every analysis run is expected to produce, in display order.
pub const EXPECTED_SUBTASKS: &[&str] = &[
    "math_correlation",
    "math_risk_metrics",
    "math_performance",
    "math_volatility",
    "math_drawdowns",
    "optimization_max_sharpe",
    "optimization_min_variance",
    "optimization_risk_parity",
    "optimization_efficient_frontier",
    "optimization_stress_testing",
];

/// Name of one independently computed unit of an analysis run.
///
/// Not restricted to [`EXPECTED_SUBTASKS`]: the server may deliver
/// subtasks this client does not know about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskName(String);

impl SubtaskName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubtaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubtaskName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SubtaskName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// The expected enumeration as owned names.
pub fn expected_subtasks() -> Vec<SubtaskName> {
    EXPECTED_SUBTASKS.iter().copied().map(SubtaskName::from).collect()
}
