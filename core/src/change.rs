//! Change detection between the applied and the desired effect
//!
//! Decides whether a view's renderer can be updated in place or has to be
//! stopped and restarted. Cosmetic changes (opacity) never restart the
//! animation; changes to the effect's visual identity always do.

use atmos_types::{Density, ProducerConfig};

use crate::ports::EffectId;

/// Renderer parameters derived from a producer config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectParams {
    /// 0-100, updatable in place
    pub opacity: u8,
    /// Drives the effect palette, recreate-sensitive
    pub color: Option<String>,
    /// Particle count, recreate-sensitive
    pub density: Density,
}

impl EffectParams {
    pub fn from_config(config: &ProducerConfig) -> Self {
        Self {
            opacity: config.clamped_opacity(),
            color: config.color.clone(),
            density: config.density,
        }
    }
}

/// Classification of a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    None,
    InPlaceUpdate,
    Recreate,
}

/// Compare the applied effect (if any) with the desired one.
pub fn classify(
    current: Option<(&EffectId, &EffectParams)>,
    effect: &EffectId,
    params: &EffectParams,
) -> Change {
    let Some((current_effect, current_params)) = current else {
        return Change::Recreate;
    };

    if current_effect != effect
        || !same_color(current_params.color.as_deref(), params.color.as_deref())
        || current_params.density != params.density
    {
        return Change::Recreate;
    }

    if current_params.opacity != params.opacity {
        return Change::InPlaceUpdate;
    }

    // Colours equal modulo case still count as "no change"
    Change::None
}

/// Case-insensitive colour comparison. Equivalent colours written in
/// different syntaxes ("white" vs "#fff") compare as different.
fn same_color(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}
