//! Scenario replay
//!
//! Builds the declared tree on a headless host, replays each step and prints
//! what the host saw after it.

use std::collections::HashMap;
use std::io::Write;

use atmos_core::config::CoordinatorConfig;
use atmos_core::coordinator::{Coordinator, ViewSnapshot};
use atmos_core::headless::HeadlessHost;
use atmos_core::{HostHandle, NodeRole};
use tracing::debug;

use crate::scenario::{Expectation, NodeKind, NodeSpec, Scenario, ScenarioError, Step};

/// Result of one scenario run.
#[derive(Debug, Default)]
pub struct Report {
    pub steps: usize,
    pub checks: usize,
    pub failures: Vec<String>,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Runner {
    host: HeadlessHost,
    coordinator: Coordinator,
    nodes: HashMap<String, HostHandle>,
    root: HostHandle,
}

impl Runner {
    pub fn new(config: &CoordinatorConfig) -> Self {
        let host = HeadlessHost::new();
        let root = host.tree.add_root();
        let coordinator = host.coordinator(config);
        Self {
            host,
            coordinator,
            nodes: HashMap::new(),
            root,
        }
    }

    fn node(&self, id: &str) -> Result<HostHandle, ScenarioError> {
        self.nodes
            .get(id)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownNode(id.to_string()))
    }

    fn build_node(&mut self, spec: &NodeSpec) -> Result<(), ScenarioError> {
        if self.nodes.contains_key(&spec.id) {
            return Err(ScenarioError::DuplicateNode(spec.id.clone()));
        }
        let tree = &self.host.tree;
        let parent = match &spec.parent {
            Some(parent) => Some(self.nodes.get(parent).copied().ok_or_else(|| {
                ScenarioError::ParentNotDeclared {
                    node: spec.id.clone(),
                    parent: parent.clone(),
                }
            })?),
            None if spec.detached => None,
            None => Some(self.root),
        };

        let role = match spec.kind {
            NodeKind::Element => NodeRole::Element,
            NodeKind::View => NodeRole::ViewContainer,
            NodeKind::Preview => NodeRole::PreviewContainer,
            NodeKind::Shadow => NodeRole::ShadowRoot,
        };

        let handle = match (spec.kind, parent) {
            _ if spec.detached => tree.add_detached(role),
            (NodeKind::Shadow, Some(host)) => tree.attach_shadow_root(host),
            (NodeKind::View, Some(parent)) if spec.view_id.as_deref() != Some("") => {
                tree.add_view(parent, spec.view_id.as_deref().unwrap_or(&spec.id))
            }
            (_, Some(parent)) => tree.add_child(parent, role),
            (_, None) => tree.add_detached(role),
        };
        debug!(node = %spec.id, handle = handle.0, ?role, "Built node");
        self.nodes.insert(spec.id.clone(), handle);
        Ok(())
    }

    pub fn run(&mut self, scenario: &Scenario, out: &mut impl Write) -> Result<Report, ScenarioError> {
        for spec in &scenario.nodes {
            self.build_node(spec)?;
        }

        let mut report = Report::default();
        for (i, step) in scenario.steps.iter().enumerate() {
            report.steps += 1;
            let label = self.apply(step, &mut report)?;
            writeln!(out, "[{:>5}ms] #{i} {label}", self.host.timer.now_ms())?;
            for call in self.host.log.take() {
                writeln!(out, "           {call}")?;
            }
        }

        writeln!(out, "--")?;
        for snap in self.coordinator.snapshot() {
            writeln!(out, "{snap}")?;
        }
        Ok(report)
    }

    fn apply(&mut self, step: &Step, report: &mut Report) -> Result<String, ScenarioError> {
        let label = match step {
            Step::Register {
                owner,
                producer,
                host,
                preview,
                config,
            } => {
                let handle = self.node(host)?;
                self.coordinator
                    .register(owner, producer, config.clone(), handle, *preview);
                format!("register {owner}/{producer} on {host}")
            }
            Step::Unregister {
                owner,
                producer,
                preview,
            } => {
                self.coordinator.unregister(owner, producer, *preview);
                format!("unregister {owner}/{producer}")
            }
            Step::Detach { node } => {
                self.host.tree.detach(self.node(node)?);
                format!("detach {node}")
            }
            Step::Attach { node, parent } => {
                self.host.tree.append(self.node(parent)?, self.node(node)?);
                format!("attach {node} under {parent}")
            }
            Step::Advance { ms } => {
                self.host.advance(&mut self.coordinator, *ms);
                format!("advance {ms}ms")
            }
            Step::Force => {
                self.coordinator.force_update();
                "force update".to_string()
            }
            Step::Environment {
                constrained_viewport,
                reduced_motion,
                condition,
            } => {
                let env = &self.host.environment;
                if let Some(constrained) = constrained_viewport {
                    env.set_constrained_viewport(*constrained);
                }
                if let Some(reduced) = reduced_motion {
                    env.set_reduced_motion(*reduced);
                }
                if let Some(condition) = condition {
                    env.set_condition(Some(condition.as_str()).filter(|c| !c.is_empty()));
                }
                "environment changed".to_string()
            }
            Step::Fact { subject, value } => {
                self.host.facts.set(subject, value);
                format!("fact {subject}={value}")
            }
            Step::Layout { defer, complete } => {
                if let Some(defer) = defer {
                    self.host.surfaces.defer_layout(*defer);
                }
                if *complete {
                    self.host.surfaces.complete_layout();
                }
                "layout".to_string()
            }
            Step::FailRenderer { count } => {
                self.host.renderers.fail_next(*count);
                format!("fail next {count} renderer(s)")
            }
            Step::Expect(expectation) => {
                let failures = self.check(expectation);
                report.checks += 1;
                let label = if failures.is_empty() {
                    "expect ok".to_string()
                } else {
                    format!("expect FAILED: {}", failures.join("; "))
                };
                report.failures.extend(failures);
                label
            }
            Step::Shutdown => {
                self.coordinator.shutdown();
                "shutdown".to_string()
            }
        };
        Ok(label)
    }

    fn check(&self, expect: &Expectation) -> Vec<String> {
        let mut failures = Vec::new();
        let mut compare = |what: &str, expected: String, actual: String| {
            if expected != actual {
                failures.push(format!("{what}: expected {expected}, got {actual}"));
            }
        };

        if let Some(n) = expect.active_views {
            compare("active views", n.to_string(), self.coordinator.active_view_count().to_string());
        }
        if let Some(n) = expect.registered {
            compare("registered", n.to_string(), self.coordinator.registered_count().to_string());
        }
        if let Some(n) = expect.passes {
            compare("passes", n.to_string(), self.coordinator.pass_count().to_string());
        }

        let Some(view) = &expect.view else {
            return failures;
        };
        let snap: Option<ViewSnapshot> = self
            .coordinator
            .snapshot()
            .into_iter()
            .find(|s| s.view.as_str() == view);
        let field = |f: fn(&ViewSnapshot) -> Option<String>| {
            snap.as_ref().and_then(f).unwrap_or_default()
        };

        if let Some(effect) = &expect.effect {
            compare(
                &format!("{view} effect"),
                effect.clone(),
                field(|s| s.effect.as_ref().map(ToString::to_string)),
            );
        }
        if let Some(winner) = &expect.winner {
            compare(
                &format!("{view} winner"),
                winner.clone(),
                field(|s| s.winner.as_ref().map(|w| w.owner_id.clone())),
            );
        }
        if let Some(state) = &expect.state {
            let actual = snap
                .as_ref()
                .map(|s| s.state.to_string())
                .unwrap_or_else(|| "absent".to_string());
            compare(&format!("{view} state"), state.clone(), actual);
        }
        if let Some(opacity) = expect.opacity {
            compare(
                &format!("{view} opacity"),
                opacity.to_string(),
                field(|s| s.params.as_ref().map(|p| p.opacity.to_string())),
            );
        }
        failures
    }
}
