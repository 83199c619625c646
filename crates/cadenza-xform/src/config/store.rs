use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

/// Read side of the configuration consumed by the chain builder and stages.
pub trait ConfigLookup: Send + Sync {
    fn lookup(&self, path: &str) -> Option<String>;

    /// Registers `path` with `default` unless it already has a value.
    fn register(&self, _path: &str, _default: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    ValueChanged { path: String, value: String },
}

impl ConfigEvent {
    pub fn path(&self) -> &str {
        match self {
            Self::ValueChanged { path, .. } => path,
        }
    }
}

/// In-memory property store that announces changes to subscribers.
#[derive(Default)]
pub struct ConfigStore {
    values: RwLock<BTreeMap<String, String>>,
    subscribers: Mutex<Vec<Sender<ConfigEvent>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `path` and notifies subscribers when the value actually changed.
    pub fn set(&self, path: &str, value: &str) {
        {
            let mut values = self.values.write();
            if values.get(path).is_some_and(|current| current == value) {
                return;
            }
            values.insert(path.to_string(), value.to_string());
        }
        self.emit(ConfigEvent::ValueChanged {
            path: path.to_string(),
            value: value.to_string(),
        });
    }

    pub fn subscribe(&self) -> Receiver<ConfigEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: ConfigEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl ConfigLookup for ConfigStore {
    fn lookup(&self, path: &str) -> Option<String> {
        self.values.read().get(path).cloned()
    }

    fn register(&self, path: &str, default: &str) {
        self.values
            .write()
            .entry(path.to_string())
            .or_insert_with(|| default.to_string());
    }
}
