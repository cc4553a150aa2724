//! Coordinator facade
//!
//! Wires registry, scheduler, arbitration and the overlay table together.
//! One coordinator is created per application context and passed to the
//! host glue explicitly.
//!
//! Public operations never fail and never block: `register`/`unregister`
//! only mark the coordinator dirty, and all derived state (winners, overlays)
//! changes on pass boundaries. Failures are logged and the affected view
//! shows no effect until a later pass succeeds.

use std::collections::BTreeMap;
use std::fmt;

use atmos_types::ProducerConfig;
use tracing::{debug, info, trace, warn};

use crate::anchor::AnchorResolver;
use crate::arbitration::{Winner, arbitrate};
use crate::change::{Change, EffectParams};
use crate::config::CoordinatorConfig;
use crate::environment::{EnvironmentProbe, EnvironmentSnapshot, suppression};
use crate::guard::UpdateState;
use crate::layer::{AppliedEffect, AttachProgress, OverlayState, Presented, ViewLayerManager};
use crate::ports::{
    DisplayPredicateEvaluator, EffectId, EffectResolver, HostHandle, RendererFactory, SurfaceHost,
    SurfaceId, ViewKey,
};
use crate::registry::{ProducerKey, Registry};
use crate::scheduler::PassScheduler;
use crate::timer::{TimerHandle, TimerPort};

/// Host-provided collaborators.
pub struct Ports {
    pub resolver: Box<dyn AnchorResolver>,
    pub predicate: Box<dyn DisplayPredicateEvaluator>,
    pub effects: Box<dyn EffectResolver>,
    pub environment: Box<dyn EnvironmentProbe>,
    pub surfaces: Box<dyn SurfaceHost>,
    pub renderers: Box<dyn RendererFactory>,
    pub timer: Box<dyn TimerPort>,
}

/// Diagnostic view of one overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub view: ViewKey,
    pub surface: SurfaceId,
    pub winner: Option<ProducerKey>,
    pub state: OverlayState,
    pub effect: Option<EffectId>,
    pub params: Option<EffectParams>,
    pub guard: UpdateState,
}

impl fmt::Display for ViewSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.view, self.state)?;
        if let Some(effect) = &self.effect {
            write!(f, " effect={effect}")?;
        }
        if let Some(winner) = &self.winner {
            write!(f, " winner={winner}")?;
        }
        if self.guard != UpdateState::Idle {
            write!(f, " guard={}", self.guard)?;
        }
        Ok(())
    }
}

pub struct Coordinator {
    registry: Registry,
    scheduler: PassScheduler,
    layers: ViewLayerManager,
    resolver: Box<dyn AnchorResolver>,
    predicate: Box<dyn DisplayPredicateEvaluator>,
    effects: Box<dyn EffectResolver>,
    environment: Box<dyn EnvironmentProbe>,
    timer: Box<dyn TimerPort>,
    /// Producer currently drawn on each view
    winners: BTreeMap<ViewKey, ProducerKey>,
    passes: u64,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .field("layers", &self.layers)
            .field("winners", &self.winners)
            .field("passes", &self.passes)
            .finish()
    }
}

impl Coordinator {
    pub fn new(config: &CoordinatorConfig, ports: Ports) -> Self {
        Self {
            registry: Registry::new(),
            scheduler: PassScheduler::new(config.debounce()),
            layers: ViewLayerManager::new(
                ports.surfaces,
                ports.renderers,
                config.attach_retry.clone(),
            ),
            resolver: ports.resolver,
            predicate: ports.predicate,
            effects: ports.effects,
            environment: ports.environment,
            timer: ports.timer,
            winners: BTreeMap::new(),
            passes: 0,
        }
    }

    // ─── Public surface ──────────────────────────────────────────────────────

    /// Register or re-register a producer.
    ///
    /// Without an override the preview flag is derived from the host's
    /// position (inside an editing surface or not). A host that is not
    /// connected yet has no position, so its flag is derived on the first
    /// pass that finds it connected.
    pub fn register(
        &mut self,
        owner_id: &str,
        producer_id: &str,
        config: ProducerConfig,
        host: HostHandle,
        is_preview_override: Option<bool>,
    ) {
        let is_preview = match is_preview_override {
            Some(flag) => flag,
            None if self.resolver.is_connected(host) => self.resolver.is_preview_context(host),
            None => {
                let outcome = self.registry.upsert_pending(owner_id, producer_id, config, host);
                debug!(owner_id, producer_id, host = host.0, ?outcome, "Registered producer on detached host");
                self.mark_dirty();
                return;
            }
        };
        let key = ProducerKey::new(owner_id, producer_id, is_preview);
        let outcome = self.registry.upsert(key.clone(), config, host);
        debug!(producer = %key, host = host.0, ?outcome, "Registered producer");
        self.mark_dirty();
    }

    /// Remove a producer. Without an override both its preview and live
    /// registrations are removed.
    pub fn unregister(&mut self, owner_id: &str, producer_id: &str, is_preview_override: Option<bool>) {
        let removed = match is_preview_override {
            Some(is_preview) => {
                let key = ProducerKey::new(owner_id, producer_id, is_preview);
                usize::from(self.registry.remove(&key).is_some())
            }
            None => self.registry.remove_any(owner_id, producer_id),
        };
        if removed == 0 {
            trace!(owner_id, producer_id, "Unregister of unknown producer");
            return;
        }
        debug!(owner_id, producer_id, removed, "Unregistered producer");
        self.mark_dirty();
    }

    /// Cancel any pending debounce and run a pass now.
    pub fn force_update(&mut self) {
        self.scheduler.cancel(self.timer.as_mut());
        self.run_pass();
    }

    /// Deliver an elapsed timer handle. Unknown handles are ignored.
    pub fn on_timer(&mut self, handle: TimerHandle) {
        if self.scheduler.take_due(handle) {
            self.run_pass();
            return;
        }

        match self.layers.on_attach_timer(handle, self.timer.as_mut()) {
            Some(AttachProgress::Ready { trailing } | AttachProgress::Failed { trailing }) => {
                if trailing {
                    self.mark_dirty();
                }
            }
            Some(AttachProgress::Waiting) => {}
            None => trace!(handle = handle.0, "Ignoring stale timer"),
        }
    }

    /// Dispose every overlay, forget every producer and cancel timers.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel(self.timer.as_mut());
        let disposed = self.layers.dispose_all(self.timer.as_mut());
        let producers = self.registry.len();
        self.registry.clear();
        self.winners.clear();
        info!(disposed, producers, "Coordinator shut down");
    }

    /// Number of views currently holding an overlay.
    pub fn active_view_count(&self) -> usize {
        self.layers.active_count()
    }

    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Passes run so far.
    pub fn pass_count(&self) -> u64 {
        self.passes
    }

    pub fn is_pass_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    pub fn snapshot(&self) -> Vec<ViewSnapshot> {
        self.layers
            .overlays()
            .map(|o| ViewSnapshot {
                view: o.view().clone(),
                surface: o.surface(),
                winner: self.winners.get(o.view()).cloned(),
                state: o.state(),
                effect: o.current().map(|c| c.effect.clone()),
                params: o.current().map(|c| c.params.clone()),
                guard: o.guard(),
            })
            .collect()
    }

    // ─── Pass ────────────────────────────────────────────────────────────────

    fn mark_dirty(&mut self) {
        if self.scheduler.mark_dirty(self.timer.as_mut()) {
            trace!(window_ms = self.scheduler.window().as_millis(), "Pass scheduled");
        }
    }

    fn run_pass(&mut self) {
        self.passes += 1;
        let pass = self.passes;
        let env = EnvironmentSnapshot::capture(self.environment.as_ref());

        let reaped = self
            .layers
            .reap_orphans(self.resolver.as_ref(), self.timer.as_mut());
        for view in &reaped {
            self.winners.remove(view);
        }
        let dropped = self.registry.reap_detached(self.resolver.as_ref());
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Dropped producers with detached hosts");
        }
        for key in self.registry.settle_pending(self.resolver.as_ref()) {
            debug!(producer = %key, "Host attached, producer keyed");
        }

        let outcome = arbitrate(
            self.registry.all(),
            self.resolver.as_ref(),
            self.predicate.as_ref(),
        );
        for key in &outcome.resolved {
            self.registry.mark_seen(key);
        }

        let mut desired: BTreeMap<ViewKey, (Winner, AppliedEffect)> = BTreeMap::new();
        for (view, winner) in outcome.views {
            let Some(winner) = winner else {
                continue;
            };
            if let Some(reason) = suppression(&winner.config, &env) {
                debug!(view = %view, producer = %winner.producer, %reason, "Winner suppressed");
                continue;
            }
            let Some(effect) = self.effects.resolve(&winner.config, &env) else {
                debug!(view = %view, producer = %winner.producer, "No effect for winner");
                continue;
            };
            let target = AppliedEffect {
                effect,
                params: EffectParams::from_config(&winner.config),
            };
            desired.insert(view, (winner, target));
        }

        if desired.is_empty() {
            let disposed = self.layers.dispose_all(self.timer.as_mut());
            self.winners.clear();
            debug!(pass, disposed, reaped = reaped.len(), "Pass complete, no winners");
            return;
        }

        let losing: Vec<ViewKey> = self
            .layers
            .overlays()
            .map(|o| o.view().clone())
            .filter(|v| !desired.contains_key(v))
            .collect();
        for view in losing {
            if self.layers.hide(&view) {
                self.winners.remove(&view);
            } else {
                debug!(view = %view, "Hide deferred behind in-flight update");
            }
        }

        for (view, (winner, target)) in desired {
            let effect = target.effect.clone();
            match self.layers.present(
                &view,
                winner.container,
                winner.config.layer,
                target,
                self.timer.as_mut(),
            ) {
                Ok(Presented::Deferred) => {
                    debug!(view = %view, producer = %winner.producer, "Present deferred behind in-flight update");
                }
                Ok(presented) => {
                    if presented != Presented::Shown(Change::None) {
                        debug!(view = %view, producer = %winner.producer, %effect, ?presented, "Presented winner");
                    }
                    self.winners.insert(view, winner.producer);
                }
                Err(e) => {
                    warn!(view = %view, producer = %winner.producer, error = %e, "Failed to present overlay");
                    self.winners.remove(&view);
                }
            }
        }

        debug!(
            pass,
            preview = outcome.preview_active,
            unresolved = outcome.unresolved.len(),
            reaped = reaped.len(),
            active = self.layers.active_count(),
            "Pass complete"
        );
    }
}
