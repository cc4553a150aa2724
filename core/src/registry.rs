//! Producer registry
//!
//! Pure storage for registered producers. Ordering and selection live in
//! arbitration; scheduling lives in the coordinator.

use std::collections::HashMap;
use std::fmt;

use atmos_types::ProducerConfig;

use crate::anchor::AnchorResolver;
use crate::ports::HostHandle;

/// Identity of a registered producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerKey {
    pub owner_id: String,
    pub producer_id: String,
    pub is_preview: bool,
}

impl ProducerKey {
    pub fn new(owner_id: impl Into<String>, producer_id: impl Into<String>, is_preview: bool) -> Self {
        Self {
            owner_id: owner_id.into(),
            producer_id: producer_id.into(),
            is_preview,
        }
    }
}

impl fmt::Display for ProducerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.producer_id)?;
        if self.is_preview {
            f.write_str(" (preview)")?;
        }
        Ok(())
    }
}

/// A registered effect source.
#[derive(Debug, Clone)]
pub struct Producer {
    pub key: ProducerKey,
    pub config: ProducerConfig,
    pub host: HostHandle,
    /// Registration ordinal, preserved across re-registration
    pub registered_at: u64,
    /// The host has been resolved to a view at least once
    seen_attached: bool,
}

impl Producer {
    pub fn seen_attached(&self) -> bool {
        self.seen_attached
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
}

/// Registration made while its host was detached and no preview flag was
/// given. It gets a key once the host connects.
#[derive(Debug, Clone)]
struct Pending {
    config: ProducerConfig,
    host: HostHandle,
    registered_at: u64,
}

#[derive(Debug, Default)]
pub struct Registry {
    producers: HashMap<ProducerKey, Producer>,
    /// Keyed by (owner_id, producer_id)
    pending: HashMap<(String, String), Pending>,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace in place. Re-registration keeps `registered_at`.
    /// A pending registration of the same producer on the same host is
    /// superseded.
    pub fn upsert(&mut self, key: ProducerKey, config: ProducerConfig, host: HostHandle) -> Upsert {
        let id = (key.owner_id.clone(), key.producer_id.clone());
        let superseded = if self.pending.get(&id).is_some_and(|p| p.host == host) {
            self.pending.remove(&id)
        } else {
            None
        };

        if let Some(existing) = self.producers.get_mut(&key) {
            if existing.host != host {
                existing.seen_attached = false;
            }
            existing.config = config;
            existing.host = host;
            return Upsert::Replaced;
        }

        let registered_at = match superseded {
            Some(pending) => pending.registered_at,
            None => self.take_seq(),
        };
        self.producers.insert(
            key.clone(),
            Producer {
                key,
                config,
                host,
                registered_at,
                seen_attached: false,
            },
        );
        Upsert::Inserted
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Hold a registration whose preview flag cannot be derived yet.
    pub fn upsert_pending(
        &mut self,
        owner_id: &str,
        producer_id: &str,
        config: ProducerConfig,
        host: HostHandle,
    ) -> Upsert {
        let id = (owner_id.to_string(), producer_id.to_string());
        if let Some(existing) = self.pending.get_mut(&id) {
            existing.config = config;
            existing.host = host;
            return Upsert::Replaced;
        }
        let registered_at = self.take_seq();
        self.pending.insert(
            id,
            Pending {
                config,
                host,
                registered_at,
            },
        );
        Upsert::Inserted
    }

    /// Key pending registrations whose host is connected now, deriving the
    /// preview flag from the host's position. A key that already exists is
    /// replaced in place, like a re-registration.
    pub fn settle_pending(&mut self, resolver: &dyn AnchorResolver) -> Vec<ProducerKey> {
        let ready: Vec<(String, String)> = self
            .pending
            .iter()
            .filter(|(_, p)| resolver.is_connected(p.host))
            .map(|(id, _)| id.clone())
            .collect();

        let mut settled = Vec::with_capacity(ready.len());
        for id in ready {
            let Some(pending) = self.pending.remove(&id) else {
                continue;
            };
            let key = ProducerKey::new(id.0, id.1, resolver.is_preview_context(pending.host));
            match self.producers.get_mut(&key) {
                Some(existing) => {
                    existing.config = pending.config;
                    existing.host = pending.host;
                    existing.seen_attached = false;
                }
                None => {
                    self.producers.insert(
                        key.clone(),
                        Producer {
                            key: key.clone(),
                            config: pending.config,
                            host: pending.host,
                            registered_at: pending.registered_at,
                            seen_attached: false,
                        },
                    );
                }
            }
            settled.push(key);
        }
        settled
    }

    pub fn remove(&mut self, key: &ProducerKey) -> Option<Producer> {
        self.producers.remove(key)
    }

    /// Remove the preview, the live and any pending entry of a producer.
    pub fn remove_any(&mut self, owner_id: &str, producer_id: &str) -> usize {
        let keyed = [true, false]
            .into_iter()
            .filter_map(|is_preview| {
                self.remove(&ProducerKey::new(owner_id, producer_id, is_preview))
            })
            .count();
        let pending = self
            .pending
            .remove(&(owner_id.to_string(), producer_id.to_string()));
        keyed + usize::from(pending.is_some())
    }

    /// Unordered view of every keyed producer. Pending registrations are
    /// not included.
    pub fn all(&self) -> impl Iterator<Item = &Producer> {
        self.producers.values()
    }

    pub fn get(&self, key: &ProducerKey) -> Option<&Producer> {
        self.producers.get(key)
    }

    /// Keyed and pending registrations.
    pub fn len(&self) -> usize {
        self.producers.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty() && self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.producers.clear();
        self.pending.clear();
    }

    pub fn mark_seen(&mut self, key: &ProducerKey) {
        if let Some(producer) = self.producers.get_mut(key) {
            producer.seen_attached = true;
        }
    }

    /// Drop producers whose host was attached once and is gone now.
    /// Producers that never resolved are kept (late attachment).
    pub fn reap_detached(&mut self, resolver: &dyn AnchorResolver) -> Vec<ProducerKey> {
        let gone: Vec<ProducerKey> = self
            .producers
            .values()
            .filter(|p| p.seen_attached && !resolver.is_connected(p.host))
            .map(|p| p.key.clone())
            .collect();
        for key in &gone {
            self.producers.remove(key);
        }
        gone
    }
}
