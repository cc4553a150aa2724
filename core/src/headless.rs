//! In-memory host
//!
//! A complete set of ports backed by plain data structures: a node tree with
//! shadow roots, surfaces that can be held back from layout, renderers that
//! record every call, and a settable environment. Used by the scenario runner
//! and by tests. All handles share state through `Rc`, so a clone can be
//! kept by the driver to mutate the host while the coordinator owns another.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use atmos_types::{ConditionMode, DisplayCondition, EffectMode, LayerPosition, ProducerConfig};

use crate::anchor::{HostTree, NodeRole, TreeAnchorResolver};
use crate::change::EffectParams;
use crate::config::CoordinatorConfig;
use crate::coordinator::{Coordinator, Ports};
use crate::environment::{EnvironmentProbe, EnvironmentSnapshot};
use crate::error::HostError;
use crate::ports::{
    Bounds, DisplayPredicateEvaluator, EffectId, EffectResolver, HostHandle, ObserverId,
    RendererFactory, RendererHandle, SurfaceHost, SurfaceId,
};
use crate::timer::VirtualTimer;

/// Size reported by laid-out headless surfaces.
pub const HEADLESS_BOUNDS: Bounds = Bounds {
    width: 1280,
    height: 720,
};

// ─────────────────────────────────────────────────────────────────────────────
// Tree
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Node {
    parent: Option<HostHandle>,
    shadow_host: Option<HostHandle>,
    children: Vec<HostHandle>,
    role: NodeRole,
    view_id: Option<String>,
    /// Root of the live document (as opposed to a detached fragment)
    document: bool,
}

/// Host tree held in memory.
#[derive(Debug, Clone, Default)]
pub struct HeadlessTree {
    nodes: Rc<RefCell<Vec<Node>>>,
}

impl HeadlessTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, node: Node) -> HostHandle {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(node);
        HostHandle(nodes.len() as u64 - 1)
    }

    fn with_node<R>(&self, handle: HostHandle, f: impl FnOnce(&Node) -> R) -> Option<R> {
        let nodes = self.nodes.borrow();
        usize::try_from(handle.0)
            .ok()
            .and_then(|i| nodes.get(i))
            .map(f)
    }

    fn with_node_mut(&self, handle: HostHandle, f: impl FnOnce(&mut Node)) {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(node) = usize::try_from(handle.0).ok().and_then(|i| nodes.get_mut(i)) {
            f(node);
        }
    }

    /// New document root (connected).
    pub fn add_root(&self) -> HostHandle {
        self.push(Node {
            document: true,
            ..Node::default()
        })
    }

    /// New node outside the document.
    pub fn add_detached(&self, role: NodeRole) -> HostHandle {
        self.push(Node {
            role,
            ..Node::default()
        })
    }

    /// Append a new child.
    pub fn add_child(&self, parent: HostHandle, role: NodeRole) -> HostHandle {
        let child = self.add_detached(role);
        self.append(parent, child);
        child
    }

    /// Insert a new child at `index` among the parent's children.
    pub fn insert_child(&self, parent: HostHandle, index: usize, role: NodeRole) -> HostHandle {
        let child = self.add_detached(role);
        self.with_node_mut(child, |n| n.parent = Some(parent));
        self.with_node_mut(parent, |n| {
            let index = index.min(n.children.len());
            n.children.insert(index, child);
        });
        child
    }

    /// Append a view container carrying its own identity.
    pub fn add_view(&self, parent: HostHandle, id: &str) -> HostHandle {
        let view = self.add_child(parent, NodeRole::ViewContainer);
        self.with_node_mut(view, |n| n.view_id = Some(id.to_string()));
        view
    }

    /// Attach a shadow root to `host`.
    pub fn attach_shadow_root(&self, host: HostHandle) -> HostHandle {
        self.push(Node {
            role: NodeRole::ShadowRoot,
            shadow_host: Some(host),
            ..Node::default()
        })
    }

    /// Move an existing (detached) node under `parent`.
    pub fn append(&self, parent: HostHandle, child: HostHandle) {
        self.with_node_mut(child, |n| n.parent = Some(parent));
        self.with_node_mut(parent, |n| n.children.push(child));
    }

    /// Remove a node (and its subtree) from the document.
    pub fn detach(&self, node: HostHandle) {
        let parent = self.with_node(node, |n| n.parent).flatten();
        if let Some(parent) = parent {
            self.with_node_mut(parent, |n| n.children.retain(|&c| c != node));
        }
        self.with_node_mut(node, |n| {
            n.parent = None;
            n.shadow_host = None;
        });
    }
}

impl HostTree for HeadlessTree {
    fn parent(&self, node: HostHandle) -> Option<HostHandle> {
        self.with_node(node, |n| n.parent).flatten()
    }

    fn shadow_host(&self, node: HostHandle) -> Option<HostHandle> {
        self.with_node(node, |n| n.shadow_host).flatten()
    }

    fn child_index(&self, node: HostHandle) -> Option<u32> {
        let parent = self.parent(node)?;
        self.with_node(parent, |p| p.children.iter().position(|&c| c == node))
            .flatten()
            .and_then(|i| u32::try_from(i).ok())
    }

    fn role(&self, node: HostHandle) -> NodeRole {
        self.with_node(node, |n| n.role).unwrap_or_default()
    }

    fn view_id(&self, node: HostHandle) -> Option<String> {
        self.with_node(node, |n| n.view_id.clone()).flatten()
    }

    fn is_connected(&self, node: HostHandle) -> bool {
        let mut current = node;
        for _ in 0..4096 {
            let Some((parent, shadow_host, document)) =
                self.with_node(current, |n| (n.parent, n.shadow_host, n.document))
            else {
                return false;
            };
            match parent.or(shadow_host) {
                Some(next) => current = next,
                None => return document,
            }
        }
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Call log
// ─────────────────────────────────────────────────────────────────────────────

/// One observable side effect on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderCall {
    SurfaceCreated {
        surface: SurfaceId,
        container: HostHandle,
        position: LayerPosition,
    },
    SurfaceVisible { surface: SurfaceId, visible: bool },
    Restacked { surface: SurfaceId, position: LayerPosition },
    SurfaceRemoved { surface: SurfaceId },
    Start {
        surface: SurfaceId,
        effect: String,
        opacity: u8,
    },
    Update { surface: SurfaceId, opacity: u8 },
    Stop { surface: SurfaceId },
    Destroy { surface: SurfaceId },
}

impl RenderCall {
    pub fn surface(&self) -> SurfaceId {
        match self {
            Self::SurfaceCreated { surface, .. }
            | Self::SurfaceVisible { surface, .. }
            | Self::Restacked { surface, .. }
            | Self::SurfaceRemoved { surface }
            | Self::Start { surface, .. }
            | Self::Update { surface, .. }
            | Self::Stop { surface }
            | Self::Destroy { surface } => *surface,
        }
    }

    pub fn is_renderer_call(&self) -> bool {
        matches!(
            self,
            Self::Start { .. } | Self::Update { .. } | Self::Stop { .. } | Self::Destroy { .. }
        )
    }
}

impl fmt::Display for RenderCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SurfaceCreated {
                surface,
                container,
                position,
            } => write!(f, "surface#{} created in node {} ({position:?})", surface.0, container.0),
            Self::SurfaceVisible { surface, visible } => {
                let verb = if *visible { "shown" } else { "hidden" };
                write!(f, "surface#{} {verb}", surface.0)
            }
            Self::Restacked { surface, position } => {
                write!(f, "surface#{} restacked ({position:?})", surface.0)
            }
            Self::SurfaceRemoved { surface } => write!(f, "surface#{} removed", surface.0),
            Self::Start {
                surface,
                effect,
                opacity,
            } => write!(f, "surface#{} start {effect} opacity={opacity}", surface.0),
            Self::Update { surface, opacity } => {
                write!(f, "surface#{} update opacity={opacity}", surface.0)
            }
            Self::Stop { surface } => write!(f, "surface#{} stop", surface.0),
            Self::Destroy { surface } => write!(f, "surface#{} destroy", surface.0),
        }
    }
}

/// Shared, append-only record of host calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<RenderCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: RenderCall) {
        self.calls.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<RenderCall> {
        self.calls.borrow().clone()
    }

    pub fn calls_for(&self, surface: SurfaceId) -> Vec<RenderCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.surface() == surface)
            .cloned()
            .collect()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<RenderCall> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Surfaces and renderers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SurfaceState {
    container: HostHandle,
    laid_out: bool,
}

#[derive(Debug, Default)]
struct SurfaceTable {
    next_surface: u64,
    next_observer: u64,
    surfaces: HashMap<SurfaceId, SurfaceState>,
    observers: HashMap<ObserverId, SurfaceId>,
    defer_layout: bool,
    fail_creates: u32,
}

/// Surfaces living inside a [`HeadlessTree`]. A surface counts as attached
/// while it exists and its container is connected.
#[derive(Debug, Clone)]
pub struct HeadlessSurfaces {
    tree: HeadlessTree,
    log: CallLog,
    table: Rc<RefCell<SurfaceTable>>,
}

impl HeadlessSurfaces {
    pub fn new(tree: HeadlessTree, log: CallLog) -> Self {
        Self {
            tree,
            log,
            table: Rc::default(),
        }
    }

    /// New surfaces report no bounds until [`Self::complete_layout`].
    pub fn defer_layout(&self, defer: bool) {
        self.table.borrow_mut().defer_layout = defer;
    }

    /// Lay out every pending surface.
    pub fn complete_layout(&self) {
        for state in self.table.borrow_mut().surfaces.values_mut() {
            state.laid_out = true;
        }
    }

    /// Fail the next `count` surface creations.
    pub fn fail_creates(&self, count: u32) {
        self.table.borrow_mut().fail_creates = count;
    }

    pub fn live_surfaces(&self) -> usize {
        self.table.borrow().surfaces.len()
    }

    pub fn live_observers(&self) -> usize {
        self.table.borrow().observers.len()
    }
}

impl SurfaceHost for HeadlessSurfaces {
    fn create(
        &mut self,
        container: HostHandle,
        position: LayerPosition,
    ) -> Result<SurfaceId, HostError> {
        let mut table = self.table.borrow_mut();
        if table.fail_creates > 0 {
            table.fail_creates -= 1;
            return Err(HostError::SurfaceUnavailable(format!(
                "container {} refused a surface",
                container.0
            )));
        }
        let surface = SurfaceId(table.next_surface);
        table.next_surface += 1;
        let laid_out = !table.defer_layout;
        table.surfaces.insert(surface, SurfaceState { container, laid_out });
        self.log.push(RenderCall::SurfaceCreated {
            surface,
            container,
            position,
        });
        Ok(surface)
    }

    fn bounds(&self, surface: SurfaceId) -> Option<Bounds> {
        let table = self.table.borrow();
        table
            .surfaces
            .get(&surface)
            .filter(|s| s.laid_out)
            .map(|_| HEADLESS_BOUNDS)
    }

    fn is_attached(&self, surface: SurfaceId) -> bool {
        let container = self.table.borrow().surfaces.get(&surface).map(|s| s.container);
        container.is_some_and(|c| self.tree.is_connected(c))
    }

    fn set_visible(&mut self, surface: SurfaceId, visible: bool) {
        self.log.push(RenderCall::SurfaceVisible { surface, visible });
    }

    fn restack(&mut self, surface: SurfaceId, position: LayerPosition) {
        self.log.push(RenderCall::Restacked { surface, position });
    }

    fn observe(&mut self, surface: SurfaceId) -> ObserverId {
        let mut table = self.table.borrow_mut();
        let observer = ObserverId(table.next_observer);
        table.next_observer += 1;
        table.observers.insert(observer, surface);
        observer
    }

    fn unobserve(&mut self, observer: ObserverId) {
        self.table.borrow_mut().observers.remove(&observer);
    }

    fn remove(&mut self, surface: SurfaceId) {
        if self.table.borrow_mut().surfaces.remove(&surface).is_some() {
            self.log.push(RenderCall::SurfaceRemoved { surface });
        }
    }
}

/// Renderer that only records what it was asked to do.
#[derive(Debug)]
pub struct RecordingRenderer {
    surface: SurfaceId,
    log: CallLog,
}

impl RendererHandle for RecordingRenderer {
    fn start(&mut self, effect: &EffectId, params: &EffectParams) {
        self.log.push(RenderCall::Start {
            surface: self.surface,
            effect: effect.to_string(),
            opacity: params.opacity,
        });
    }

    fn update(&mut self, params: &EffectParams) {
        self.log.push(RenderCall::Update {
            surface: self.surface,
            opacity: params.opacity,
        });
    }

    fn stop(&mut self) {
        self.log.push(RenderCall::Stop {
            surface: self.surface,
        });
    }

    fn destroy(&mut self) {
        self.log.push(RenderCall::Destroy {
            surface: self.surface,
        });
    }
}

#[derive(Debug, Clone)]
pub struct RecordingRenderers {
    log: CallLog,
    failures: Rc<Cell<u32>>,
}

impl RecordingRenderers {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failures: Rc::default(),
        }
    }

    /// Fail the next `count` renderer creations.
    pub fn fail_next(&self, count: u32) {
        self.failures.set(count);
    }
}

impl RendererFactory for RecordingRenderers {
    fn create(
        &mut self,
        surface: SurfaceId,
        _bounds: Bounds,
    ) -> Result<Box<dyn RendererHandle>, HostError> {
        let remaining = self.failures.get();
        if remaining > 0 {
            self.failures.set(remaining - 1);
            return Err(HostError::RendererCreate(format!(
                "no drawing context for surface#{}",
                surface.0
            )));
        }
        Ok(Box::new(RecordingRenderer {
            surface,
            log: self.log.clone(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment and collaborators
// ─────────────────────────────────────────────────────────────────────────────

/// Settable environment.
#[derive(Debug, Clone, Default)]
pub struct HeadlessEnvironment {
    state: Rc<RefCell<EnvironmentSnapshot>>,
}

impl HeadlessEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_constrained_viewport(&self, constrained: bool) {
        self.state.borrow_mut().constrained_viewport = constrained;
    }

    pub fn set_reduced_motion(&self, reduced: bool) {
        self.state.borrow_mut().reduced_motion = reduced;
    }

    pub fn set_condition(&self, condition: Option<&str>) {
        self.state.borrow_mut().condition = condition.map(str::to_string);
    }
}

impl EnvironmentProbe for HeadlessEnvironment {
    fn is_constrained_viewport(&self) -> bool {
        self.state.borrow().constrained_viewport
    }

    fn prefers_reduced_motion(&self) -> bool {
        self.state.borrow().reduced_motion
    }

    fn condition(&self) -> Option<String> {
        self.state.borrow().condition.clone()
    }
}

/// Evaluates display conditions against a table of facts
/// (`subject -> value`). Unknown subjects never match.
#[derive(Debug, Clone, Default)]
pub struct FactsEvaluator {
    facts: Rc<RefCell<HashMap<String, String>>>,
}

impl FactsEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, subject: &str, value: &str) {
        self.facts
            .borrow_mut()
            .insert(subject.to_string(), value.to_string());
    }

    fn holds(&self, condition: &DisplayCondition) -> bool {
        let matches = self
            .facts
            .borrow()
            .get(&condition.subject)
            .is_some_and(|v| *v == condition.equals);
        matches != condition.negate
    }
}

impl DisplayPredicateEvaluator for FactsEvaluator {
    fn evaluate(&self, conditions: &[DisplayCondition], mode: ConditionMode) -> bool {
        if conditions.is_empty() {
            return true;
        }
        match mode {
            ConditionMode::All => conditions.iter().all(|c| self.holds(c)),
            ConditionMode::Any => conditions.iter().any(|c| self.holds(c)),
        }
    }
}

/// Manual mode passes the configured effect through; automatic mode looks the
/// environment condition up in a table.
#[derive(Debug, Clone, Default)]
pub struct TableEffectResolver {
    table: HashMap<String, String>,
}

impl TableEffectResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for common weather condition names.
    pub fn weather() -> Self {
        [
            ("rainy", "rain"),
            ("pouring", "rain_storm"),
            ("lightning-rainy", "thunderstorm"),
            ("snowy", "snow"),
            ("snowy-rainy", "sleet"),
            ("fog", "fog"),
            ("hail", "hail"),
            ("windy", "wind"),
            ("clear-night", "stars"),
            ("sunny", "sun_beams"),
            ("cloudy", "clouds"),
        ]
        .into_iter()
        .fold(Self::new(), |r, (c, e)| r.with_mapping(c, e))
    }

    pub fn with_mapping(mut self, condition: &str, effect: &str) -> Self {
        self.table.insert(condition.to_string(), effect.to_string());
        self
    }
}

impl EffectResolver for TableEffectResolver {
    fn resolve(&self, config: &ProducerConfig, environment: &EnvironmentSnapshot) -> Option<EffectId> {
        match config.mode {
            EffectMode::Manual => config.effect.as_deref().map(EffectId::new),
            EffectMode::Automatic => environment
                .condition
                .as_deref()
                .and_then(|c| self.table.get(c))
                .map(EffectId::new),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// Every headless port, sharing one tree, log and clock.
#[derive(Debug, Clone)]
pub struct HeadlessHost {
    pub tree: HeadlessTree,
    pub log: CallLog,
    pub surfaces: HeadlessSurfaces,
    pub renderers: RecordingRenderers,
    pub environment: HeadlessEnvironment,
    pub facts: FactsEvaluator,
    pub effects: TableEffectResolver,
    pub timer: VirtualTimer,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessHost {
    pub fn new() -> Self {
        Self::with_timer(VirtualTimer::new())
    }

    /// Host sharing an existing clock.
    pub fn with_timer(timer: VirtualTimer) -> Self {
        let tree = HeadlessTree::new();
        let log = CallLog::new();
        Self {
            surfaces: HeadlessSurfaces::new(tree.clone(), log.clone()),
            renderers: RecordingRenderers::new(log.clone()),
            tree,
            log,
            environment: HeadlessEnvironment::new(),
            facts: FactsEvaluator::new(),
            effects: TableEffectResolver::weather(),
            timer,
        }
    }

    pub fn ports(&self) -> Ports {
        Ports {
            resolver: Box::new(TreeAnchorResolver::new(self.tree.clone())),
            predicate: Box::new(self.facts.clone()),
            effects: Box::new(self.effects.clone()),
            environment: Box::new(self.environment.clone()),
            surfaces: Box::new(self.surfaces.clone()),
            renderers: Box::new(self.renderers.clone()),
            timer: Box::new(self.timer.clone()),
        }
    }

    pub fn coordinator(&self, config: &CoordinatorConfig) -> Coordinator {
        Coordinator::new(config, self.ports())
    }

    /// Let `ms` virtual milliseconds pass, delivering due timers.
    pub fn advance(&self, coordinator: &mut Coordinator, ms: u64) {
        let target = self.timer.now_ms().saturating_add(ms);
        self.timer.run_until(target, |handle| coordinator.on_timer(handle));
    }
}
