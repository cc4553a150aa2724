//! Host-facing ports
//!
//! The coordinator never touches host UI objects directly. Everything it
//! needs from the host (tree structure, render surfaces, renderers, display
//! predicates, effect mapping) comes in through the traits below. Handles are
//! plain ids owned by the host glue.

use std::fmt;

use atmos_types::{ConditionMode, DisplayCondition, LayerPosition, ProducerConfig};

use crate::change::EffectParams;
use crate::environment::EnvironmentSnapshot;
use crate::error::HostError;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque handle to a host UI node (the element a producer is mounted in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostHandle(pub u64);

/// Handle to a render surface created by a [`SurfaceHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

/// Handle to a resize observer registered on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Stable identity of a logical view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey(String);

impl ViewKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an effect the renderer knows how to draw. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EffectId(String);

impl EffectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Laid-out size of a surface in host pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub width: u32,
    pub height: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

/// Creates and manages render surfaces inside view containers.
pub trait SurfaceHost {
    /// Create a surface sized to `container` and attach it at `position`.
    fn create(&mut self, container: HostHandle, position: LayerPosition)
    -> Result<SurfaceId, HostError>;

    /// Laid-out bounds. `None` until the host has sized the surface.
    fn bounds(&self, surface: SurfaceId) -> Option<Bounds>;

    fn is_attached(&self, surface: SurfaceId) -> bool;

    fn set_visible(&mut self, surface: SurfaceId, visible: bool);

    /// Move the surface to another stacking position without recreating it.
    fn restack(&mut self, surface: SurfaceId, position: LayerPosition);

    /// Start observing resizes of the surface's container.
    fn observe(&mut self, surface: SurfaceId) -> ObserverId;

    fn unobserve(&mut self, observer: ObserverId);

    /// Detach and release the surface. Unknown ids are ignored.
    fn remove(&mut self, surface: SurfaceId);
}

/// Produces renderers bound to a surface.
pub trait RendererFactory {
    fn create(
        &mut self,
        surface: SurfaceId,
        bounds: Bounds,
    ) -> Result<Box<dyn RendererHandle>, HostError>;
}

/// A live renderer drawing into one surface.
pub trait RendererHandle {
    /// Begin drawing `effect`. Starts the animation loop.
    fn start(&mut self, effect: &EffectId, params: &EffectParams);
    /// Apply cosmetic parameter changes without restarting.
    fn update(&mut self, params: &EffectParams);
    /// Stop the animation loop and clear the surface.
    fn stop(&mut self);
    /// Release all renderer resources. The handle is unusable afterwards.
    fn destroy(&mut self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// Evaluates a producer's display conditions. Pure and synchronous.
pub trait DisplayPredicateEvaluator {
    fn evaluate(&self, conditions: &[DisplayCondition], mode: ConditionMode) -> bool;
}

/// Maps a producer config to the effect to draw.
///
/// Returns `None` when there is nothing to draw (e.g. manual mode without a
/// selector, or an environment state with no mapped effect).
pub trait EffectResolver {
    fn resolve(&self, config: &ProducerConfig, environment: &EnvironmentSnapshot)
    -> Option<EffectId>;
}

/// Display predicate that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl DisplayPredicateEvaluator for AlwaysVisible {
    fn evaluate(&self, _conditions: &[DisplayCondition], _mode: ConditionMode) -> bool {
        true
    }
}
