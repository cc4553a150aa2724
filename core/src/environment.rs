//! Environment probing and gating
//!
//! The environment is sampled once at the start of every pass. Gating is
//! applied after arbitration and before rendering, so a suppressed winner
//! does not hand the view to the next candidate.

use std::fmt;

use atmos_types::ProducerConfig;

/// Reports runtime environment state.
pub trait EnvironmentProbe {
    /// Narrow viewport (e.g. a phone in portrait)
    fn is_constrained_viewport(&self) -> bool;
    fn prefers_reduced_motion(&self) -> bool;
    /// Current domain state used by automatic mode (e.g. a weather condition)
    fn condition(&self) -> Option<String> {
        None
    }
}

/// Environment state frozen for the duration of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    pub constrained_viewport: bool,
    pub reduced_motion: bool,
    pub condition: Option<String>,
}

impl EnvironmentSnapshot {
    pub fn capture(probe: &dyn EnvironmentProbe) -> Self {
        Self {
            constrained_viewport: probe.is_constrained_viewport(),
            reduced_motion: probe.prefers_reduced_motion(),
            condition: probe.condition(),
        }
    }
}

/// Why a winner was not rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    ConstrainedViewport,
    ReducedMotion,
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ConstrainedViewport => "constrained viewport",
            Self::ReducedMotion => "reduced motion",
        })
    }
}

/// Check both suppressors for a winning producer.
pub fn suppression(config: &ProducerConfig, env: &EnvironmentSnapshot) -> Option<Suppression> {
    if env.constrained_viewport && !config.enable_on_constrained_viewport {
        return Some(Suppression::ConstrainedViewport);
    }
    if config.respect_reduced_motion && env.reduced_motion {
        return Some(Suppression::ReducedMotion);
    }
    None
}
