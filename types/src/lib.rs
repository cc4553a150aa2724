//! Shared configuration types for atmos
//!
//! A producer is a card-like component that wants to draw a view-wide
//! effect (rain, snow, fog...). These types describe what a producer asks
//! for. They are deserialized from host configuration and handed to the
//! coordinator, which only reads the fields arbitration and gating need.
//! The effect selector and display conditions are opaque to the core and
//! interpreted by host-provided collaborators.

use serde::{Deserialize, Serialize};

/// Upper bound for [`ProducerConfig::opacity`].
pub const MAX_OPACITY: u8 = 100;

/// How the effect identifier is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMode {
    /// Derived from environment state (e.g. the current weather condition)
    #[default]
    Automatic,
    /// The configured `effect` is used as-is
    Manual,
}

/// Where the overlay is stacked relative to the view's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerPosition {
    /// Behind the view's cards
    #[default]
    Background,
    /// Above the view's cards (never intercepts input)
    Foreground,
}

/// How multiple display conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    #[default]
    All,
    Any,
}

/// Particle density. Changing it invalidates renderer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    Low,
    #[default]
    Normal,
    High,
}

/// One display condition. Interpreted by the host's predicate evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayCondition {
    /// What is being tested (an entity id, a media query name...)
    pub subject: String,
    /// Expected value
    pub equals: String,
    /// Invert the result
    #[serde(default)]
    pub negate: bool,
}

/// Configuration carried by a registered producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub enabled: bool,
    pub mode: EffectMode,
    /// Effect selector used in manual mode
    pub effect: Option<String>,
    pub display_conditions: Vec<DisplayCondition>,
    pub display_mode: ConditionMode,
    /// 0-100
    pub opacity: u8,
    /// Tint driving the effect palette
    pub color: Option<String>,
    pub density: Density,
    pub layer: LayerPosition,
    /// Keep the effect on narrow viewports
    pub enable_on_constrained_viewport: bool,
    /// Suppress the effect when the user prefers reduced motion
    pub respect_reduced_motion: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: EffectMode::Automatic,
            effect: None,
            display_conditions: Vec::new(),
            display_mode: ConditionMode::All,
            opacity: MAX_OPACITY,
            color: None,
            density: Density::Normal,
            layer: LayerPosition::Background,
            enable_on_constrained_viewport: true,
            respect_reduced_motion: true,
        }
    }
}

impl ProducerConfig {
    /// Manual-mode config drawing `effect`.
    pub fn manual(effect: impl Into<String>) -> Self {
        Self {
            mode: EffectMode::Manual,
            effect: Some(effect.into()),
            ..Self::default()
        }
    }

    /// Opacity clamped to [`MAX_OPACITY`].
    pub fn clamped_opacity(&self) -> u8 {
        self.opacity.min(MAX_OPACITY)
    }
}
