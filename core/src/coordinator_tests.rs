//! Tests for the coordinator
//!
//! Drives a coordinator over the headless host and checks the renderer call
//! log after each pass.

use atmos_types::{DisplayCondition, EffectMode, LayerPosition, ProducerConfig};

use crate::anchor::NodeRole;
use crate::config::CoordinatorConfig;
use crate::coordinator::{Coordinator, ViewSnapshot};
use crate::headless::{HeadlessHost, RenderCall};
use crate::layer::OverlayState;
use crate::ports::{EffectId, HostHandle, SurfaceId};

struct Harness {
    host: HeadlessHost,
    coordinator: Coordinator,
    root: HostHandle,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(CoordinatorConfig::default())
    }

    fn with_config(config: CoordinatorConfig) -> Self {
        let host = HeadlessHost::new();
        let root = host.tree.add_root();
        let coordinator = host.coordinator(&config);
        Self {
            host,
            coordinator,
            root,
        }
    }

    fn view(&self, id: &str) -> HostHandle {
        self.host.tree.add_view(self.root, id)
    }

    fn card(&self, view: HostHandle) -> HostHandle {
        self.host.tree.add_child(view, NodeRole::Element)
    }

    /// Card placed above every existing card of the view.
    fn top_card(&self, view: HostHandle) -> HostHandle {
        self.host.tree.insert_child(view, 0, NodeRole::Element)
    }

    fn register(&mut self, owner: &str, config: ProducerConfig, host: HostHandle) {
        self.coordinator.register(owner, "fx", config, host, None);
    }

    fn pass(&mut self) {
        self.coordinator.force_update();
    }

    fn advance(&mut self, ms: u64) {
        self.host.advance(&mut self.coordinator, ms);
    }

    fn snapshot(&self, view: &str) -> Option<ViewSnapshot> {
        self.coordinator
            .snapshot()
            .into_iter()
            .find(|s| s.view.as_str() == view)
    }

    fn surface(&self, view: &str) -> SurfaceId {
        self.snapshot(view).map(|s| s.surface).unwrap()
    }

    fn effect(&self, view: &str) -> Option<String> {
        self.snapshot(view)
            .and_then(|s| s.effect)
            .map(|e| e.as_str().to_string())
    }

    fn winner(&self, view: &str) -> Option<String> {
        self.snapshot(view)
            .and_then(|s| s.winner)
            .map(|w| w.owner_id)
    }

    /// Renderer calls recorded since the last drain.
    fn renderer_calls(&self) -> Vec<RenderCall> {
        self.host
            .log
            .take()
            .into_iter()
            .filter(RenderCall::is_renderer_call)
            .collect()
    }
}

fn with_opacity(effect: &str, opacity: u8) -> ProducerConfig {
    ProducerConfig {
        opacity,
        ..ProducerConfig::manual(effect)
    }
}

fn count(calls: &[RenderCall], pred: impl Fn(&RenderCall) -> bool) -> usize {
    calls.iter().filter(|c| pred(c)).count()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_single_producer_gets_overlay_after_one_pass() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.register("a", ProducerConfig::manual("rain"), card);

    assert_eq!(h.coordinator.active_view_count(), 0);
    h.advance(100);

    assert_eq!(h.coordinator.pass_count(), 1);
    assert_eq!(h.coordinator.active_view_count(), 1);
    let snap = h.snapshot("v1").unwrap();
    assert_eq!(snap.state, OverlayState::Visible);
    assert_eq!(snap.effect, Some(EffectId::new("rain")));
    assert_eq!(h.winner("v1").as_deref(), Some("a"));

    let calls = h.renderer_calls();
    assert_eq!(
        calls,
        vec![RenderCall::Start {
            surface: snap.surface,
            effect: "rain".into(),
            opacity: 100
        }]
    );
}

#[test]
fn test_upper_producer_takes_over_without_restart_for_same_effect() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let lower = h.card(v1);
    h.register("a", ProducerConfig::manual("rain"), lower);
    h.pass();
    h.renderer_calls();

    let upper = h.top_card(v1);
    h.register("b", ProducerConfig::manual("rain"), upper);
    h.pass();

    assert_eq!(h.winner("v1").as_deref(), Some("b"));
    assert!(h.renderer_calls().is_empty());
}

#[test]
fn test_upper_producer_with_other_effect_recreates() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let lower = h.card(v1);
    h.register("a", ProducerConfig::manual("rain"), lower);
    h.pass();
    let surface = h.surface("v1");
    h.renderer_calls();

    let upper = h.top_card(v1);
    h.register("b", ProducerConfig::manual("snow"), upper);
    h.pass();

    assert_eq!(h.effect("v1").as_deref(), Some("snow"));
    assert_eq!(
        h.renderer_calls(),
        vec![
            RenderCall::Stop { surface },
            RenderCall::Start {
                surface,
                effect: "snow".into(),
                opacity: 100
            },
        ]
    );
}

#[test]
fn test_preview_producer_supersedes_active_live_producer() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let live_card = h.card(v1);
    h.register("card", ProducerConfig::manual("rain"), live_card);
    h.pass();
    assert_eq!(h.effect("v1").as_deref(), Some("rain"));

    let editor = h.host.tree.add_child(v1, NodeRole::PreviewContainer);
    let preview_card = h.card(editor);
    h.register("card", ProducerConfig::manual("fog"), preview_card);
    h.pass();

    let snap = h.snapshot("v1").unwrap();
    let winner = snap.winner.unwrap();
    assert!(winner.is_preview);
    assert_eq!(snap.effect, Some(EffectId::new("fog")));
    assert_eq!(h.coordinator.registered_count(), 2);
}

#[test]
fn test_preview_override_beats_detection() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let top = h.card(v1);
    let bottom = h.card(v1);
    h.coordinator
        .register("live", "fx", ProducerConfig::manual("rain"), top, Some(false));
    h.coordinator
        .register("edit", "fx", ProducerConfig::manual("snow"), bottom, Some(true));
    h.pass();

    assert_eq!(h.winner("v1").as_deref(), Some("edit"));
}

#[test]
fn test_opacity_change_updates_in_place() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.register("a", with_opacity("rain", 50), card);
    h.pass();
    let surface = h.surface("v1");
    h.renderer_calls();

    h.register("a", with_opacity("rain", 80), card);
    h.pass();

    assert_eq!(
        h.renderer_calls(),
        vec![RenderCall::Update {
            surface,
            opacity: 80
        }]
    );
}

#[test]
fn test_manual_effect_change_stops_then_starts() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();
    let surface = h.surface("v1");
    h.renderer_calls();

    h.register("a", ProducerConfig::manual("snow_storm"), card);
    h.pass();

    assert_eq!(
        h.renderer_calls(),
        vec![
            RenderCall::Stop { surface },
            RenderCall::Start {
                surface,
                effect: "snow_storm".into(),
                opacity: 100
            },
        ]
    );
}

#[test]
fn test_detached_container_is_disposed_once() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let v2 = h.view("v2");
    let c1 = h.card(v1);
    let c2 = h.card(v2);
    h.register("a", ProducerConfig::manual("rain"), c1);
    h.register("b", ProducerConfig::manual("snow"), c2);
    h.pass();
    assert_eq!(h.coordinator.active_view_count(), 2);
    let s1 = h.surface("v1");
    h.host.log.take();

    h.host.tree.detach(v1);
    h.pass();
    h.pass();

    assert_eq!(h.coordinator.active_view_count(), 1);
    assert!(h.snapshot("v1").is_none());
    let calls = h.host.log.take();
    assert_eq!(count(&calls, |c| *c == RenderCall::Destroy { surface: s1 }), 1);
    assert_eq!(
        count(&calls, |c| *c == RenderCall::SurfaceRemoved { surface: s1 }),
        1
    );
    assert_eq!(h.host.surfaces.live_observers(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_each_view_has_one_winner_and_one_overlay() {
    let mut h = Harness::new();
    let views: Vec<HostHandle> = ["v1", "v2", "v3"].iter().map(|id| h.view(id)).collect();
    for (i, view) in views.iter().enumerate() {
        for j in 0..3 {
            let card = h.card(*view);
            h.coordinator.register(
                &format!("owner{i}"),
                &format!("fx{j}"),
                ProducerConfig::manual("rain"),
                card,
                None,
            );
        }
    }
    h.pass();

    let snaps = h.coordinator.snapshot();
    assert_eq!(snaps.len(), 3);
    assert!(snaps.iter().all(|s| s.winner.is_some()));
    assert_eq!(h.host.surfaces.live_surfaces(), 3);
}

#[test]
fn test_burst_within_window_runs_one_pass_with_final_state() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    let doomed = h.card(v1);

    for opacity in [10, 20, 30, 40] {
        h.register("a", with_opacity("rain", opacity), card);
        h.advance(10);
    }
    h.register("b", ProducerConfig::manual("snow"), doomed);
    h.coordinator.unregister("b", "fx", None);
    assert_eq!(h.coordinator.pass_count(), 0);

    h.advance(60);
    assert_eq!(h.coordinator.pass_count(), 1);
    assert!(!h.coordinator.is_pass_pending());

    let snap = h.snapshot("v1").unwrap();
    assert_eq!(snap.params.map(|p| p.opacity), Some(40));
    assert_eq!(snap.effect, Some(EffectId::new("rain")));
    assert_eq!(h.coordinator.registered_count(), 1);

    h.advance(500);
    assert_eq!(h.coordinator.pass_count(), 1);
}

#[test]
fn test_identical_reregistration_touches_nothing() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.register("a", with_opacity("rain", 60), card);
    h.pass();
    h.host.log.take();

    h.register("a", with_opacity("rain", 60), card);
    h.pass();

    assert!(h.host.log.is_empty());
}

#[test]
fn test_change_on_one_view_never_touches_another() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let v2 = h.view("v2");
    let c1 = h.card(v1);
    let c2 = h.card(v2);
    h.register("a", ProducerConfig::manual("rain"), c1);
    h.register("b", ProducerConfig::manual("snow"), c2);
    h.pass();
    let s2 = h.surface("v2");
    h.host.log.take();

    h.register("a", ProducerConfig::manual("fog"), c1);
    h.pass();
    h.host.tree.detach(v1);
    h.pass();

    assert!(h.host.log.calls_for(s2).is_empty());
    assert!(!h.host.log.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Selection inputs
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_display_conditions_reevaluated_each_pass() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let top = h.card(v1);
    let bottom = h.card(v1);
    let night_only = ProducerConfig {
        display_conditions: vec![DisplayCondition {
            subject: "sun".into(),
            equals: "below_horizon".into(),
            negate: false,
        }],
        ..ProducerConfig::manual("stars")
    };
    h.register("night", night_only, top);
    h.register("day", ProducerConfig::manual("sun_beams"), bottom);
    h.pass();
    assert_eq!(h.winner("v1").as_deref(), Some("day"));

    h.host.facts.set("sun", "below_horizon");
    h.pass();
    assert_eq!(h.winner("v1").as_deref(), Some("night"));
    assert_eq!(h.effect("v1").as_deref(), Some("stars"));
}

#[test]
fn test_automatic_mode_follows_environment_condition() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.host.environment.set_condition(Some("snowy"));
    let auto = ProducerConfig {
        mode: EffectMode::Automatic,
        ..ProducerConfig::default()
    };
    h.register("a", auto, card);
    h.pass();
    assert_eq!(h.effect("v1").as_deref(), Some("snow"));

    h.host.environment.set_condition(Some("rainy"));
    h.pass();
    assert_eq!(h.effect("v1").as_deref(), Some("rain"));

    h.host.environment.set_condition(None);
    h.pass();
    assert_eq!(h.coordinator.active_view_count(), 0);
}

#[test]
fn test_constrained_viewport_suppresses_opted_out_winner() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let v2 = h.view("v2");
    let c1 = h.card(v1);
    let c2 = h.card(v2);
    let desktop_only = ProducerConfig {
        enable_on_constrained_viewport: false,
        ..ProducerConfig::manual("rain")
    };
    h.register("a", desktop_only, c1);
    h.register("b", ProducerConfig::manual("snow"), c2);
    h.pass();
    let s1 = h.surface("v1");
    h.host.log.take();

    h.host.environment.set_constrained_viewport(true);
    h.pass();

    let snap = h.snapshot("v1").unwrap();
    assert_eq!(snap.state, OverlayState::Hidden);
    assert_eq!(snap.winner, None);
    assert_eq!(
        h.host.log.calls_for(s1),
        vec![
            RenderCall::Stop { surface: s1 },
            RenderCall::SurfaceVisible {
                surface: s1,
                visible: false
            },
        ]
    );

    h.host.environment.set_constrained_viewport(false);
    h.pass();
    assert_eq!(h.snapshot("v1").unwrap().state, OverlayState::Visible);
}

#[test]
fn test_reduced_motion_suppresses_respecting_winner() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.host.environment.set_reduced_motion(true);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();
    assert_eq!(h.coordinator.active_view_count(), 0);

    let ignoring = ProducerConfig {
        respect_reduced_motion: false,
        ..ProducerConfig::manual("rain")
    };
    h.register("a", ignoring, card);
    h.pass();
    assert_eq!(h.coordinator.active_view_count(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_no_winners_disposes_every_overlay() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();
    let surface = h.surface("v1");

    h.coordinator.unregister("a", "fx", None);
    h.pass();

    assert_eq!(h.coordinator.active_view_count(), 0);
    assert_eq!(h.host.surfaces.live_surfaces(), 0);
    let calls = h.host.log.calls_for(surface);
    assert!(calls.contains(&RenderCall::Destroy { surface }));
}

#[test]
fn test_unregister_without_override_removes_preview_and_live() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.coordinator
        .register("a", "fx", ProducerConfig::manual("rain"), card, Some(false));
    h.coordinator
        .register("a", "fx", ProducerConfig::manual("rain"), card, Some(true));
    assert_eq!(h.coordinator.registered_count(), 2);

    h.coordinator.unregister("a", "fx", Some(true));
    assert_eq!(h.coordinator.registered_count(), 1);

    h.coordinator
        .register("a", "fx", ProducerConfig::manual("rain"), card, Some(true));
    h.coordinator.unregister("a", "fx", None);
    assert_eq!(h.coordinator.registered_count(), 0);
}

#[test]
fn test_unknown_unregister_schedules_nothing() {
    let mut h = Harness::new();
    h.coordinator.unregister("ghost", "fx", None);
    assert!(!h.coordinator.is_pass_pending());
}

#[test]
fn test_late_attached_host_is_kept_until_resolvable() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.host.tree.add_detached(NodeRole::Element);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();
    assert_eq!(h.coordinator.registered_count(), 1);
    assert_eq!(h.coordinator.active_view_count(), 0);

    h.host.tree.append(v1, card);
    h.pass();
    assert_eq!(h.coordinator.active_view_count(), 1);
}

#[test]
fn test_producer_on_removed_host_is_reaped() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();

    h.host.tree.detach(card);
    h.pass();

    assert_eq!(h.coordinator.registered_count(), 0);
    assert_eq!(h.coordinator.active_view_count(), 0);
}

#[test]
fn test_layer_change_restacks_existing_surface() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();
    let surface = h.surface("v1");
    h.host.log.take();

    let foreground = ProducerConfig {
        layer: LayerPosition::Foreground,
        ..ProducerConfig::manual("rain")
    };
    h.register("a", foreground, card);
    h.pass();

    assert_eq!(
        h.host.log.take(),
        vec![RenderCall::Restacked {
            surface,
            position: LayerPosition::Foreground
        }]
    );
}

#[test]
fn test_renderer_failure_retried_next_pass() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.host.renderers.fail_next(1);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();

    assert_eq!(h.coordinator.active_view_count(), 0);
    assert_eq!(h.host.surfaces.live_surfaces(), 0);
    assert_eq!(h.host.surfaces.live_observers(), 0);

    h.pass();
    assert_eq!(h.coordinator.active_view_count(), 1);
    assert_eq!(h.snapshot("v1").unwrap().state, OverlayState::Visible);
}

#[test]
fn test_surface_waits_for_layout_then_starts() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.host.surfaces.defer_layout(true);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();

    assert_eq!(h.snapshot("v1").unwrap().state, OverlayState::Attaching);
    assert!(h.renderer_calls().is_empty());

    h.advance(16);
    assert_eq!(h.snapshot("v1").unwrap().state, OverlayState::Attaching);

    h.host.surfaces.complete_layout();
    h.advance(16);
    assert_eq!(h.snapshot("v1").unwrap().state, OverlayState::Visible);
    assert_eq!(
        count(&h.renderer_calls(), |c| matches!(c, RenderCall::Start { .. })),
        1
    );
}

#[test]
fn test_requests_during_attach_drain_as_one_trailing_pass() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.host.surfaces.defer_layout(true);
    h.register("a", with_opacity("rain", 50), card);
    h.pass();

    h.register("a", with_opacity("rain", 70), card);
    h.pass();
    h.register("a", with_opacity("rain", 90), card);
    h.pass();
    let passes = h.coordinator.pass_count();
    assert_eq!(
        h.snapshot("v1").unwrap().guard,
        crate::guard::UpdateState::UpdatePending
    );

    h.host.surfaces.complete_layout();
    h.advance(16);
    assert!(h.coordinator.is_pass_pending());
    h.advance(100);

    assert_eq!(h.coordinator.pass_count(), passes + 1);
    let surface = h.surface("v1");
    assert_eq!(
        h.renderer_calls(),
        vec![
            RenderCall::Start {
                surface,
                effect: "rain".into(),
                opacity: 50
            },
            RenderCall::Update {
                surface,
                opacity: 90
            },
        ]
    );
}

#[test]
fn test_attach_gives_up_after_bounded_retries() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.host.surfaces.defer_layout(true);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();

    h.advance(1_000);

    assert_eq!(h.coordinator.active_view_count(), 0);
    assert_eq!(h.host.surfaces.live_surfaces(), 0);
    assert_eq!(h.host.timer.pending(), 0);
}

#[test]
fn test_shutdown_releases_everything_and_cancels_timers() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let v2 = h.view("v2");
    let c1 = h.card(v1);
    let c2 = h.card(v2);
    h.register("a", ProducerConfig::manual("rain"), c1);
    h.register("b", ProducerConfig::manual("snow"), c2);
    h.pass();
    h.register("a", ProducerConfig::manual("fog"), c1);
    assert!(h.coordinator.is_pass_pending());

    h.coordinator.shutdown();

    assert_eq!(h.coordinator.active_view_count(), 0);
    assert_eq!(h.coordinator.registered_count(), 0);
    assert_eq!(h.host.surfaces.live_surfaces(), 0);
    assert_eq!(h.host.surfaces.live_observers(), 0);
    assert_eq!(h.host.timer.pending(), 0);

    let passes = h.coordinator.pass_count();
    h.advance(500);
    assert_eq!(h.coordinator.pass_count(), passes);

    h.coordinator.shutdown();
}

#[test]
fn test_debounce_window_comes_from_config() {
    let config = CoordinatorConfig {
        debounce_ms: 30,
        ..CoordinatorConfig::default()
    };
    let mut h = Harness::with_config(config);
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.register("a", ProducerConfig::manual("rain"), card);

    h.advance(29);
    assert_eq!(h.coordinator.pass_count(), 0);
    h.advance(1);
    assert_eq!(h.coordinator.pass_count(), 1);
}

#[test]
fn test_detached_host_gets_preview_flag_when_it_attaches() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let live_card = h.card(v1);
    h.register("card", ProducerConfig::manual("rain"), live_card);
    h.pass();

    let copy = h.host.tree.add_detached(NodeRole::Element);
    h.register("card", ProducerConfig::manual("fog"), copy);
    assert_eq!(h.coordinator.registered_count(), 2);

    let editor = h.host.tree.add_child(v1, NodeRole::PreviewContainer);
    h.host.tree.append(editor, copy);
    h.pass();

    let snap = h.snapshot("v1").unwrap();
    let winner = snap.winner.unwrap();
    assert_eq!(winner.owner_id, "card");
    assert!(winner.is_preview);
    assert_eq!(snap.effect, Some(EffectId::new("fog")));
    assert_eq!(h.coordinator.registered_count(), 2);

    h.coordinator.unregister("card", "fx", Some(true));
    h.pass();
    assert_eq!(h.effect("v1").as_deref(), Some("rain"));
}

#[test]
fn test_shifted_view_key_replaces_overlay() {
    let mut h = Harness::new();
    let named = h.view("named");
    let unnamed = h.host.tree.add_child(h.root, NodeRole::ViewContainer);
    let c1 = h.card(named);
    let c2 = h.card(unnamed);
    h.register("a", ProducerConfig::manual("snow"), c1);
    h.register("b", ProducerConfig::manual("rain"), c2);
    h.pass();
    assert_eq!(h.effect("view:2").as_deref(), Some("rain"));

    h.host.tree.insert_child(h.root, 0, NodeRole::Element);
    h.pass();

    assert!(h.snapshot("view:2").is_none());
    assert_eq!(h.effect("view:3").as_deref(), Some("rain"));
    assert_eq!(h.effect("named").as_deref(), Some("snow"));
    assert_eq!(h.coordinator.active_view_count(), 2);
    assert_eq!(h.host.surfaces.live_surfaces(), 2);
    assert_eq!(h.host.surfaces.live_observers(), 2);
}

#[test]
fn test_hide_during_attach_applies_on_trailing_pass() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let v2 = h.view("v2");
    let c1 = h.card(v1);
    let c2 = h.card(v2);
    h.register("b", ProducerConfig::manual("snow"), c2);
    h.pass();

    h.host.surfaces.defer_layout(true);
    h.register("a", ProducerConfig::manual("rain"), c1);
    h.pass();
    assert_eq!(h.snapshot("v1").unwrap().state, OverlayState::Attaching);

    h.coordinator.unregister("a", "fx", None);
    h.pass();
    let snap = h.snapshot("v1").unwrap();
    assert_eq!(snap.state, OverlayState::Attaching);
    assert_eq!(snap.guard, crate::guard::UpdateState::UpdatePending);
    assert_eq!(h.effect("v2").as_deref(), Some("snow"));
    h.host.log.take();

    h.host.surfaces.complete_layout();
    h.advance(16);
    assert!(h.coordinator.is_pass_pending());
    h.advance(100);

    let snap = h.snapshot("v1").unwrap();
    assert_eq!(snap.state, OverlayState::Hidden);
    assert!(snap.winner.is_none());
    let surface = snap.surface;
    let calls = h.renderer_calls();
    assert_eq!(calls.last(), Some(&RenderCall::Stop { surface }));
    assert_eq!(
        count(&calls, |c| matches!(c, RenderCall::Stop { .. })),
        1
    );
    assert_eq!(h.effect("v2").as_deref(), Some("snow"));
}

#[test]
fn test_deferred_present_keeps_applied_winner() {
    let mut h = Harness::new();
    let v1 = h.view("v1");
    let card = h.card(v1);
    h.host.surfaces.defer_layout(true);
    h.register("a", ProducerConfig::manual("rain"), card);
    h.pass();
    assert_eq!(h.winner("v1").as_deref(), Some("a"));

    let top = h.top_card(v1);
    h.register("top", ProducerConfig::manual("snow"), top);
    h.pass();
    assert_eq!(h.winner("v1").as_deref(), Some("a"));

    h.host.surfaces.complete_layout();
    h.advance(16);
    h.advance(100);

    assert_eq!(h.winner("v1").as_deref(), Some("top"));
    assert_eq!(h.effect("v1").as_deref(), Some("snow"));
}
