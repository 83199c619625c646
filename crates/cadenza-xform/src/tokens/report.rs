//! What a `react` pass hands to its observers.

use std::collections::BTreeMap;

use cadenza_xform_core::Value;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;

use super::Token;

/// Facts grouped as `key -> source -> value`, first write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FactSnapshot {
    facts: BTreeMap<String, BTreeMap<String, Value>>,
}

impl FactSnapshot {
    /// Records `value` unless `(key, source)` is already present.
    ///
    /// Snapshots are filled newest-first, so an earlier insert is the more
    /// recent fact and later duplicates are dropped.
    pub fn add_if_missing(&mut self, key: &str, source: &str, value: &Value) -> bool {
        let sources = self.facts.entry(key.to_string()).or_default();
        if sources.contains_key(source) {
            return false;
        }
        sources.insert(source.to_string(), value.clone());
        true
    }

    pub fn get(&self, key: &str, source: &str) -> Option<&Value> {
        self.facts.get(key)?.get(source)
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Number of `(key, source)` pairs.
    pub fn len(&self) -> usize {
        self.facts.values().map(BTreeMap::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.facts.iter().flat_map(|(key, sources)| {
            sources
                .iter()
                .map(move |(source, value)| (key.as_str(), source.as_str(), value))
        })
    }

    /// Renders the snapshot as a `{key: {source: value}}` object for broadcast.
    pub fn to_json(&self) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        for (key, sources) in &self.facts {
            let mut per_source = serde_json::Map::new();
            for (source, value) in sources {
                let rendered = match value {
                    Value::Int(n) => serde_json::Value::from(*n),
                    Value::String(s) => serde_json::Value::from(s.as_str()),
                    Value::Bin(bytes) => serde_json::Value::from(bytes.clone()),
                };
                per_source.insert(source.clone(), rendered);
            }
            root.insert(key.clone(), serde_json::Value::Object(per_source));
        }
        serde_json::Value::Object(root)
    }
}

/// Outcome of one `react` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactReport {
    pub token: Token,
    /// Every fact that changed since the previous pass.
    pub changed: FactSnapshot,
    /// The persistent subset that was offered to the media library.
    pub persistent: FactSnapshot,
    pub persisted: bool,
}

impl ReactReport {
    pub fn applied(&self) -> bool {
        self.persisted
    }
}

/// Called after every `react`, outside the manager lock.
pub trait ReactObserver: Send + Sync {
    fn on_react(&self, report: &ReactReport);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEvent {
    Changed { token: Token, facts: FactSnapshot },
}

/// Fans react results out to channel subscribers.
#[derive(Default)]
pub struct MetadataEventHub {
    subscribers: Mutex<Vec<Sender<MetadataEvent>>>,
}

impl MetadataEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<MetadataEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: MetadataEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl ReactObserver for MetadataEventHub {
    fn on_react(&self, report: &ReactReport) {
        if report.changed.is_empty() {
            return;
        }
        self.emit(MetadataEvent::Changed {
            token: report.token,
            facts: report.changed.clone(),
        });
    }
}
