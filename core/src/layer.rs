//! Per-view overlay resources
//!
//! Owns one [`Overlay`] per view: a render surface attached to the view's
//! container plus the renderer drawing into it. Overlays are created on the
//! first winning selection, reused while their surface stays attached and
//! disposed when orphaned or no longer needed.
//!
//! Lifecycle of one view:
//!
//! ```text
//! ABSENT ─► CREATED (hidden) ─► VISIBLE(E) ⇄ VISIBLE(E') ─► HIDDEN ─► DISPOSED
//!              │   ▲                                              ▲
//!              ▼   │ surface laid out                             │
//!           ATTACHING (retries) ──── retries exhausted ───────────┘
//! ```
//!
//! Any state goes straight to DISPOSED when its container is detached.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use atmos_types::LayerPosition;
use tracing::{debug, info, warn};

use crate::anchor::AnchorResolver;
use crate::change::{Change, EffectParams, classify};
use crate::error::{HostError, LayerError};
use crate::guard::{GuardAction, GuardEvent, UpdateState, transition};
use crate::ports::{
    Bounds, EffectId, HostHandle, ObserverId, RendererFactory, RendererHandle, SurfaceHost,
    SurfaceId, ViewKey,
};
use crate::retry::{RetryPolicy, RetryState, RetryStep};
use crate::timer::{TimerHandle, TimerPort};

/// Effect currently (or about to be) drawn by an overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEffect {
    pub effect: EffectId,
    pub params: EffectParams,
}

/// Observable lifecycle state of an overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Created,
    Attaching,
    Visible,
    Hidden,
}

impl fmt::Display for OverlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Attaching => "attaching",
            Self::Visible => "visible",
            Self::Hidden => "hidden",
        })
    }
}

enum Phase {
    /// Surface exists but has not been laid out yet
    Attaching {
        retry: RetryState,
        timer: Option<TimerHandle>,
    },
    Ready(Box<dyn RendererHandle>),
    Disposed,
}

/// Live render resource of one view.
pub struct Overlay {
    view: ViewKey,
    container: HostHandle,
    position: LayerPosition,
    surface: SurfaceId,
    observer: Option<ObserverId>,
    phase: Phase,
    current: Option<AppliedEffect>,
    /// Applied once an attaching surface becomes ready
    desired: Option<AppliedEffect>,
    visible: bool,
    shown_once: bool,
    guard: UpdateState,
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("view", &self.view)
            .field("container", &self.container)
            .field("position", &self.position)
            .field("surface", &self.surface)
            .field("state", &self.state())
            .field("current", &self.current)
            .field("guard", &self.guard)
            .finish()
    }
}

impl Overlay {
    pub fn view(&self) -> &ViewKey {
        &self.view
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn current(&self) -> Option<&AppliedEffect> {
        self.current.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn guard(&self) -> UpdateState {
        self.guard
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.phase, Phase::Disposed)
    }

    pub fn state(&self) -> OverlayState {
        match self.phase {
            Phase::Attaching { .. } => OverlayState::Attaching,
            _ if self.visible => OverlayState::Visible,
            _ if self.shown_once => OverlayState::Hidden,
            _ => OverlayState::Created,
        }
    }

    fn request(&mut self) -> GuardAction {
        let (state, action) = transition(self.guard, GuardEvent::Request);
        self.guard = state;
        action
    }

    fn finish(&mut self) -> GuardAction {
        let (state, action) = transition(self.guard, GuardEvent::Finish);
        self.guard = state;
        action
    }

    /// Draw `target`, restarting the renderer only when required.
    fn apply(&mut self, surfaces: &mut dyn SurfaceHost, target: AppliedEffect) -> Change {
        let Phase::Ready(renderer) = &mut self.phase else {
            self.desired = Some(target);
            return Change::None;
        };

        let change = classify(
            self.current.as_ref().map(|c| (&c.effect, &c.params)),
            &target.effect,
            &target.params,
        );
        match change {
            Change::Recreate => {
                if self.current.is_some() {
                    renderer.stop();
                }
                renderer.start(&target.effect, &target.params);
                self.current = Some(target);
            }
            Change::InPlaceUpdate => {
                renderer.update(&target.params);
                self.current = Some(target);
            }
            Change::None => {}
        }

        if !self.visible {
            surfaces.set_visible(self.surface, true);
            self.visible = true;
            self.shown_once = true;
        }
        change
    }

    fn hide(&mut self, surfaces: &mut dyn SurfaceHost) {
        self.desired = None;
        if let Phase::Ready(renderer) = &mut self.phase
            && self.current.take().is_some()
        {
            renderer.stop();
        }
        if self.visible {
            surfaces.set_visible(self.surface, false);
            self.visible = false;
        }
    }

    /// Release everything. Safe to call repeatedly.
    fn dispose(&mut self, surfaces: &mut dyn SurfaceHost, timer: &mut dyn TimerPort) {
        match std::mem::replace(&mut self.phase, Phase::Disposed) {
            Phase::Disposed => return,
            Phase::Attaching { timer: pending, .. } => {
                if let Some(handle) = pending {
                    timer.cancel(handle);
                }
            }
            Phase::Ready(mut renderer) => {
                renderer.stop();
                renderer.destroy();
            }
        }
        if let Some(observer) = self.observer.take() {
            surfaces.unobserve(observer);
        }
        surfaces.remove(self.surface);
        self.current = None;
        self.desired = None;
        self.visible = false;
    }
}

/// What [`ViewLayerManager::present`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    /// Renderer started/updated (or left alone) and the overlay is visible
    Shown(Change),
    /// Surface is waiting for layout; the effect starts once it is ready
    Attaching,
    /// An update for this view is in flight; a trailing pass will follow
    Deferred,
}

/// Outcome of an attach retry timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachProgress {
    /// Still waiting for layout
    Waiting,
    /// Attached and drawing. `trailing` asks for one follow-up pass.
    Ready { trailing: bool },
    /// Gave up; the overlay was disposed
    Failed { trailing: bool },
}

/// Owns the overlay table.
pub struct ViewLayerManager {
    overlays: BTreeMap<ViewKey, Overlay>,
    surfaces: Box<dyn SurfaceHost>,
    renderers: Box<dyn RendererFactory>,
    retry: RetryPolicy,
    attach_timers: HashMap<TimerHandle, ViewKey>,
}

impl fmt::Debug for ViewLayerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewLayerManager")
            .field("overlays", &self.overlays)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ViewLayerManager {
    pub fn new(
        surfaces: Box<dyn SurfaceHost>,
        renderers: Box<dyn RendererFactory>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            overlays: BTreeMap::new(),
            surfaces,
            renderers,
            retry,
            attach_timers: HashMap::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.overlays.len()
    }

    pub fn overlay(&self, view: &ViewKey) -> Option<&Overlay> {
        self.overlays.get(view)
    }

    pub fn overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.values()
    }

    pub fn is_attach_timer(&self, handle: TimerHandle) -> bool {
        self.attach_timers.contains_key(&handle)
    }

    /// Return the view's overlay, creating it if missing or if its surface
    /// or container changed. A reused overlay is restacked when needed.
    pub fn ensure(
        &mut self,
        view: &ViewKey,
        container: HostHandle,
        position: LayerPosition,
        timer: &mut dyn TimerPort,
    ) -> Result<&mut Overlay, LayerError> {
        let reusable = self.overlays.get(view).is_some_and(|o| {
            !o.is_disposed() && o.container == container && self.surfaces.is_attached(o.surface)
        });

        if !reusable {
            self.dispose(view, timer);
            let overlay = self.create(view, container, position, timer)?;
            self.overlays.insert(view.clone(), overlay);
        }

        let Some(overlay) = self.overlays.get_mut(view) else {
            return Err(HostError::SurfaceUnavailable(view.to_string()).into());
        };
        if overlay.position != position {
            debug!(view = %view, ?position, "Restacking overlay");
            self.surfaces.restack(overlay.surface, position);
            overlay.position = position;
        }
        Ok(overlay)
    }

    fn create(
        &mut self,
        view: &ViewKey,
        container: HostHandle,
        position: LayerPosition,
        timer: &mut dyn TimerPort,
    ) -> Result<Overlay, LayerError> {
        let surface = self.surfaces.create(container, position)?;
        self.surfaces.set_visible(surface, false);
        let observer = Some(self.surfaces.observe(surface));

        let mut overlay = Overlay {
            view: view.clone(),
            container,
            position,
            surface,
            observer,
            phase: Phase::Disposed,
            current: None,
            desired: None,
            visible: false,
            shown_once: false,
            guard: UpdateState::Idle,
        };

        match self.surfaces.bounds(surface) {
            Some(bounds) => match self.renderers.create(surface, bounds) {
                Ok(renderer) => overlay.phase = Phase::Ready(renderer),
                Err(e) => {
                    if let Some(observer) = overlay.observer.take() {
                        self.surfaces.unobserve(observer);
                    }
                    self.surfaces.remove(surface);
                    return Err(e.into());
                }
            },
            None => {
                let mut retry = RetryState::default();
                let RetryStep::Wait(delay) = retry.next(&self.retry) else {
                    if let Some(observer) = overlay.observer.take() {
                        self.surfaces.unobserve(observer);
                    }
                    self.surfaces.remove(surface);
                    return Err(LayerError::AttachTimedOut {
                        view: view.to_string(),
                        attempts: 0,
                    });
                };
                let handle = timer.schedule(delay);
                self.attach_timers.insert(handle, view.clone());
                overlay.phase = Phase::Attaching {
                    retry,
                    timer: Some(handle),
                };
                let (state, _) = transition(overlay.guard, GuardEvent::Suspend);
                overlay.guard = state;
                debug!(view = %view, "Surface not laid out yet, waiting");
            }
        }

        info!(view = %view, surface = surface.0, ?position, "Created overlay");
        Ok(overlay)
    }

    /// Show `effect` on the view, creating the overlay on demand.
    pub fn present(
        &mut self,
        view: &ViewKey,
        container: HostHandle,
        position: LayerPosition,
        target: AppliedEffect,
        timer: &mut dyn TimerPort,
    ) -> Result<Presented, LayerError> {
        if let Some(overlay) = self.overlays.get_mut(view)
            && overlay.request() == GuardAction::Defer
        {
            debug!(view = %view, "Update in flight, deferring");
            return Ok(Presented::Deferred);
        }

        let overlay = self.ensure(view, container, position, timer)?;
        if matches!(overlay.phase, Phase::Attaching { .. }) {
            overlay.desired = Some(target);
            return Ok(Presented::Attaching);
        }
        Ok(Presented::Shown(self.show(view, target)))
    }

    /// Apply an effect to an existing, attached overlay.
    pub fn show(&mut self, view: &ViewKey, target: AppliedEffect) -> Change {
        let Some(overlay) = self.overlays.get_mut(view) else {
            return Change::None;
        };
        let change = overlay.apply(self.surfaces.as_mut(), target);
        debug!(view = %view, ?change, "Applied effect");
        change
    }

    /// Stop drawing and hide the view's overlay. Returns `false` when the
    /// request was deferred behind an in-flight update.
    pub fn hide(&mut self, view: &ViewKey) -> bool {
        let Some(overlay) = self.overlays.get_mut(view) else {
            return true;
        };
        if overlay.request() == GuardAction::Defer {
            return false;
        }
        if overlay.visible || overlay.current.is_some() {
            debug!(view = %view, "Hiding overlay");
        }
        overlay.hide(self.surfaces.as_mut());
        true
    }

    /// Dispose and forget the view's overlay. No-op when there is none.
    pub fn dispose(&mut self, view: &ViewKey, timer: &mut dyn TimerPort) -> bool {
        let Some(mut overlay) = self.overlays.remove(view) else {
            return false;
        };
        self.attach_timers.retain(|_, v| v != view);
        overlay.dispose(self.surfaces.as_mut(), timer);
        info!(view = %view, "Disposed overlay");
        true
    }

    pub fn dispose_all(&mut self, timer: &mut dyn TimerPort) -> usize {
        let views: Vec<ViewKey> = self.overlays.keys().cloned().collect();
        let mut disposed = 0;
        for view in &views {
            if self.dispose(view, timer) {
                disposed += 1;
            }
        }
        disposed
    }

    /// Dispose overlays whose container or surface left the host tree, and
    /// overlays whose container now resolves under a different view key.
    pub fn reap_orphans(
        &mut self,
        resolver: &dyn AnchorResolver,
        timer: &mut dyn TimerPort,
    ) -> Vec<ViewKey> {
        let orphans: Vec<ViewKey> = self
            .overlays
            .values()
            .filter(|o| {
                !resolver.is_connected(o.container)
                    || !self.surfaces.is_attached(o.surface)
                    || resolver
                        .resolve_view(o.container)
                        .is_none_or(|resolved| resolved.key != o.view)
            })
            .map(|o| o.view.clone())
            .collect();
        for view in &orphans {
            debug!(view = %view, "Reaping orphaned overlay");
            self.dispose(view, timer);
        }
        orphans
    }

    /// Views with an attach in flight.
    pub fn views_in_flight(&self) -> Vec<ViewKey> {
        self.overlays
            .values()
            .filter(|o| o.guard != UpdateState::Idle)
            .map(|o| o.view.clone())
            .collect()
    }

    /// Continue a pending surface attach.
    pub fn on_attach_timer(
        &mut self,
        handle: TimerHandle,
        timer: &mut dyn TimerPort,
    ) -> Option<AttachProgress> {
        let view = self.attach_timers.remove(&handle)?;
        let overlay = self.overlays.get_mut(&view)?;
        let Phase::Attaching { retry, .. } = &mut overlay.phase else {
            return None;
        };

        let bounds = if self.surfaces.is_attached(overlay.surface) {
            self.surfaces.bounds(overlay.surface)
        } else {
            None
        };

        match bounds {
            Some(bounds) => Some(self.complete_attach(&view, bounds, timer)),
            None => match retry.next(&self.retry) {
                RetryStep::Wait(delay) => {
                    let next = timer.schedule(delay);
                    if let Phase::Attaching { timer: pending, .. } = &mut overlay.phase {
                        *pending = Some(next);
                    }
                    self.attach_timers.insert(next, view);
                    Some(AttachProgress::Waiting)
                }
                RetryStep::GiveUp { attempts } => {
                    let err = LayerError::AttachTimedOut {
                        view: view.to_string(),
                        attempts,
                    };
                    warn!(view = %view, error = %err, "Giving up on overlay surface");
                    let trailing = overlay.finish() == GuardAction::RunTrailing;
                    self.dispose(&view, timer);
                    Some(AttachProgress::Failed { trailing })
                }
            },
        }
    }

    fn complete_attach(
        &mut self,
        view: &ViewKey,
        bounds: Bounds,
        timer: &mut dyn TimerPort,
    ) -> AttachProgress {
        let Some(overlay) = self.overlays.get_mut(view) else {
            return AttachProgress::Failed { trailing: false };
        };
        match self.renderers.create(overlay.surface, bounds) {
            Ok(renderer) => {
                overlay.phase = Phase::Ready(renderer);
                if let Some(target) = overlay.desired.take() {
                    overlay.apply(self.surfaces.as_mut(), target);
                }
                let trailing = overlay.finish() == GuardAction::RunTrailing;
                info!(view = %view, width = bounds.width, height = bounds.height, "Overlay attached");
                AttachProgress::Ready { trailing }
            }
            Err(e) => {
                warn!(view = %view, error = %e, "Renderer creation failed");
                let trailing = overlay.finish() == GuardAction::RunTrailing;
                self.dispose(view, timer);
                AttachProgress::Failed { trailing }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{NodeRole, TreeAnchorResolver};
    use crate::headless::{CallLog, HeadlessSurfaces, HeadlessTree, RecordingRenderers, RenderCall};
    use crate::timer::VirtualTimer;
    use atmos_types::Density;

    struct Fixture {
        tree: HeadlessTree,
        log: CallLog,
        surfaces: HeadlessSurfaces,
        timer: VirtualTimer,
        manager: ViewLayerManager,
        view: ViewKey,
        container: HostHandle,
    }

    fn fixture() -> Fixture {
        let tree = HeadlessTree::new();
        let root = tree.add_root();
        let container = tree.add_view(root, "home");
        let log = CallLog::new();
        let surfaces = HeadlessSurfaces::new(tree.clone(), log.clone());
        let manager = ViewLayerManager::new(
            Box::new(surfaces.clone()),
            Box::new(RecordingRenderers::new(log.clone())),
            RetryPolicy::default(),
        );
        Fixture {
            tree,
            log,
            surfaces,
            timer: VirtualTimer::new(),
            manager,
            view: ViewKey::new("home"),
            container,
        }
    }

    fn target(effect: &str, opacity: u8) -> AppliedEffect {
        AppliedEffect {
            effect: EffectId::new(effect),
            params: EffectParams {
                opacity,
                color: None,
                density: Density::Normal,
            },
        }
    }

    impl Fixture {
        fn present(&mut self, effect: &str, opacity: u8) -> Presented {
            self.manager
                .present(
                    &self.view,
                    self.container,
                    LayerPosition::Background,
                    target(effect, opacity),
                    &mut self.timer,
                )
                .unwrap()
        }
    }

    #[test]
    fn test_ensure_reuses_attached_overlay() {
        let mut fx = fixture();
        let first = fx
            .manager
            .ensure(&fx.view, fx.container, LayerPosition::Background, &mut fx.timer)
            .unwrap()
            .surface();
        let second = fx
            .manager
            .ensure(&fx.view, fx.container, LayerPosition::Background, &mut fx.timer)
            .unwrap()
            .surface();

        assert_eq!(first, second);
        assert_eq!(fx.surfaces.live_surfaces(), 1);
        assert_eq!(fx.manager.active_count(), 1);
    }

    #[test]
    fn test_created_overlay_starts_hidden() {
        let mut fx = fixture();
        let overlay = fx
            .manager
            .ensure(&fx.view, fx.container, LayerPosition::Background, &mut fx.timer)
            .unwrap();

        assert_eq!(overlay.state(), OverlayState::Created);
        assert!(!overlay.is_visible());
    }

    #[test]
    fn test_present_classifies_changes() {
        let mut fx = fixture();
        assert_eq!(fx.present("rain", 50), Presented::Shown(Change::Recreate));
        assert_eq!(fx.present("rain", 50), Presented::Shown(Change::None));
        assert_eq!(fx.present("rain", 80), Presented::Shown(Change::InPlaceUpdate));
        assert_eq!(fx.present("snow", 80), Presented::Shown(Change::Recreate));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut fx = fixture();
        fx.present("rain", 100);
        let surface = fx.manager.overlay(&fx.view).unwrap().surface();

        assert!(fx.manager.dispose(&fx.view, &mut fx.timer));
        assert!(!fx.manager.dispose(&fx.view, &mut fx.timer));

        let destroys = fx
            .log
            .calls_for(surface)
            .into_iter()
            .filter(|c| *c == RenderCall::Destroy { surface })
            .count();
        assert_eq!(destroys, 1);
        assert_eq!(fx.surfaces.live_observers(), 0);
    }

    #[test]
    fn test_hide_stops_and_keeps_overlay() {
        let mut fx = fixture();
        fx.present("rain", 100);

        assert!(fx.manager.hide(&fx.view));
        let overlay = fx.manager.overlay(&fx.view).unwrap();
        assert_eq!(overlay.state(), OverlayState::Hidden);
        assert!(overlay.current().is_none());
        assert_eq!(fx.manager.active_count(), 1);
    }

    #[test]
    fn test_reap_orphans_only_touches_detached_views() {
        let mut fx = fixture();
        fx.present("rain", 100);
        let other = ViewKey::new("other");
        let root = fx.tree.add_root();
        let other_container = fx.tree.add_view(root, "other");
        fx.manager
            .present(
                &other,
                other_container,
                LayerPosition::Foreground,
                target("snow", 100),
                &mut fx.timer,
            )
            .unwrap();

        fx.tree.detach(fx.container);
        let resolver = TreeAnchorResolver::new(fx.tree.clone());
        let reaped = fx.manager.reap_orphans(&resolver, &mut fx.timer);

        assert_eq!(reaped, vec![fx.view.clone()]);
        assert!(fx.manager.overlay(&other).is_some());
        assert!(fx.manager.reap_orphans(&resolver, &mut fx.timer).is_empty());
    }

    #[test]
    fn test_reap_orphans_drops_overlay_whose_key_moved() {
        let mut fx = fixture();
        let root = fx.tree.add_root();
        let container = fx.tree.add_child(root, NodeRole::ViewContainer);
        let view = ViewKey::new("view:1");
        fx.manager
            .present(
                &view,
                container,
                LayerPosition::Background,
                target("rain", 100),
                &mut fx.timer,
            )
            .unwrap();

        let resolver = TreeAnchorResolver::new(fx.tree.clone());
        assert!(fx.manager.reap_orphans(&resolver, &mut fx.timer).is_empty());

        fx.tree.insert_child(root, 0, NodeRole::Element);
        assert_eq!(fx.manager.reap_orphans(&resolver, &mut fx.timer), vec![view]);
        assert_eq!(fx.manager.active_count(), 0);
        assert_eq!(fx.surfaces.live_surfaces(), 0);
    }

    #[test]
    fn test_attach_retry_cancelled_on_dispose() {
        let mut fx = fixture();
        fx.surfaces.defer_layout(true);
        assert_eq!(fx.present("rain", 100), Presented::Attaching);
        assert_eq!(fx.timer.pending(), 1);
        assert_eq!(fx.manager.views_in_flight(), vec![fx.view.clone()]);

        fx.manager.dispose(&fx.view, &mut fx.timer);
        assert_eq!(fx.timer.pending(), 0);
        assert!(fx.manager.views_in_flight().is_empty());
    }

    #[test]
    fn test_attach_timer_starts_desired_effect() {
        let mut fx = fixture();
        fx.surfaces.defer_layout(true);
        fx.present("rain", 100);
        fx.surfaces.complete_layout();

        let fired = fx.timer.advance(16);
        assert!(fx.manager.is_attach_timer(fired[0]));
        let progress = fx.manager.on_attach_timer(fired[0], &mut fx.timer);

        assert_eq!(progress, Some(AttachProgress::Ready { trailing: false }));
        let overlay = fx.manager.overlay(&fx.view).unwrap();
        assert_eq!(overlay.state(), OverlayState::Visible);
        assert_eq!(overlay.current(), Some(&target("rain", 100)));
        assert_eq!(fx.manager.on_attach_timer(fired[0], &mut fx.timer), None);
    }
}
