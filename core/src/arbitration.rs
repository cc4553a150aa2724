//! Winner selection
//!
//! One pass over a registry snapshot yields at most one producer per view:
//!
//! 1. If any preview producer exists, only preview producers compete;
//!    otherwise only live ones do.
//! 2. Candidates are grouped by the view their host resolves to.
//!    Unresolvable producers sit the pass out.
//! 3. Each group is ordered topmost first. When the visual order of the
//!    group cannot be fully determined, registration order is used instead.
//! 4. The first enabled candidate whose display conditions pass wins.

use std::collections::BTreeMap;

use atmos_types::ProducerConfig;
use tracing::debug;

use crate::anchor::{AnchorResolver, ResolvedView, StackingKey};
use crate::ports::{DisplayPredicateEvaluator, HostHandle, ViewKey};
use crate::registry::{Producer, ProducerKey};

/// The producer selected for a view, with the data needed to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct Winner {
    pub producer: ProducerKey,
    pub container: HostHandle,
    pub config: ProducerConfig,
}

/// Result of one arbitration pass.
#[derive(Debug, Default)]
pub struct Arbitration {
    /// Every view that had at least one candidate; `None` when nobody qualified
    pub views: BTreeMap<ViewKey, Option<Winner>>,
    /// Producers whose host resolved this pass
    pub resolved: Vec<ProducerKey>,
    /// Producers skipped because their host did not resolve
    pub unresolved: Vec<ProducerKey>,
    pub preview_active: bool,
}

impl Arbitration {
    pub fn winner_count(&self) -> usize {
        self.views.values().filter(|w| w.is_some()).count()
    }
}

/// How a view's candidates were ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOrder {
    Visual,
    Registration,
}

struct Candidate<'a> {
    producer: &'a Producer,
    view: ResolvedView,
    stacking: Option<StackingKey>,
}

pub fn arbitrate<'a>(
    producers: impl IntoIterator<Item = &'a Producer>,
    resolver: &dyn AnchorResolver,
    predicate: &dyn DisplayPredicateEvaluator,
) -> Arbitration {
    let (preview, live): (Vec<&Producer>, Vec<&Producer>) =
        producers.into_iter().partition(|p| p.key.is_preview);

    let preview_active = !preview.is_empty();
    let pool = if preview_active { preview } else { live };

    let mut result = Arbitration {
        preview_active,
        ..Arbitration::default()
    };

    let mut groups: BTreeMap<ViewKey, Vec<Candidate<'_>>> = BTreeMap::new();
    for producer in pool {
        let Some(view) = resolver.resolve_view(producer.host) else {
            result.unresolved.push(producer.key.clone());
            continue;
        };
        result.resolved.push(producer.key.clone());
        groups.entry(view.key.clone()).or_default().push(Candidate {
            producer,
            stacking: resolver.stacking_key(producer.host),
            view,
        });
    }

    for (key, mut candidates) in groups {
        let order = sort_candidates(&mut candidates);
        let winner = candidates
            .iter()
            .find(|c| {
                let config = &c.producer.config;
                config.enabled && predicate.evaluate(&config.display_conditions, config.display_mode)
            })
            .map(|c| Winner {
                producer: c.producer.key.clone(),
                container: c.view.container,
                config: c.producer.config.clone(),
            });

        debug!(
            view = %key,
            candidates = candidates.len(),
            ?order,
            winner = ?winner.as_ref().map(|w| w.producer.to_string()),
            "Arbitrated view"
        );
        result.views.insert(key, winner);
    }

    result
}

/// Sort topmost first. Falls back to ascending registration order for the
/// whole group when any pair is not visually comparable.
fn sort_candidates(candidates: &mut [Candidate<'_>]) -> GroupOrder {
    let visual = match candidates.first().and_then(|c| c.stacking.as_ref()) {
        Some(first) => candidates.iter().all(|c| {
            c.stacking
                .as_ref()
                .is_some_and(|s| s.shares_root(first))
        }),
        None => false,
    };

    if visual {
        candidates.sort_by(|a, b| {
            let (Some(sa), Some(sb)) = (&a.stacking, &b.stacking) else {
                return a.producer.registered_at.cmp(&b.producer.registered_at);
            };
            sa.visual_cmp(sb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.producer.registered_at.cmp(&b.producer.registered_at))
        });
        GroupOrder::Visual
    } else {
        candidates.sort_by_key(|c| c.producer.registered_at);
        GroupOrder::Registration
    }
}
