//! Fusion configuration, passed explicitly into every fusion attempt.

use serde::{Deserialize, Serialize};

/// Options controlling cell-wise fusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Run fusion at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Compile every literal into the kernel instead of binding
    /// non-integer literals as scalar inputs.
    #[serde(default)]
    pub compile_literals: bool,
    /// Let a trailing full or row sum become the kernel's accumulation mode.
    #[serde(default = "default_true")]
    pub absorb_aggregations: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compile_literals: false,
            absorb_aggregations: true,
        }
    }
}
