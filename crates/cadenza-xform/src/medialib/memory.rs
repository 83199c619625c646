use std::collections::{BTreeMap, HashMap};

use cadenza_xform_core::Value;
use parking_lot::Mutex;

use super::{EntryId, MediaLibrary, MedialibSession, SERVER_SOURCE, properties};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Property {
    source: String,
    value: Value,
}

type EntryProperties = BTreeMap<String, Property>;

#[derive(Default)]
struct Store {
    generation: u64,
    next_id: u32,
    entries: HashMap<EntryId, EntryProperties>,
}

/// In-memory media library with optimistic session commits.
///
/// A session that wrote anything fails to commit when another writing
/// session committed after it began.
#[derive(Default)]
pub struct MemoryMedialib {
    store: Mutex<Store>,
}

impl MemoryMedialib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entry whose `url` property is `url` as given (still encoded).
    pub fn entry_new(&self, url: &str) -> EntryId {
        let mut store = self.store.lock();
        store.next_id += 1;
        let id = EntryId(store.next_id);
        let mut props = EntryProperties::new();
        props.insert(
            properties::URL.to_string(),
            Property {
                source: SERVER_SOURCE.to_string(),
                value: Value::from(url),
            },
        );
        store.entries.insert(id, props);
        store.generation += 1;
        id
    }

    pub fn property_source(&self, entry: EntryId, key: &str) -> Option<String> {
        let store = self.store.lock();
        store
            .entries
            .get(&entry)?
            .get(key)
            .map(|prop| prop.source.clone())
    }
}

impl MediaLibrary for MemoryMedialib {
    fn begin(&self) -> Box<dyn MedialibSession + '_> {
        let generation = self.store.lock().generation;
        Box::new(MemorySession {
            library: self,
            generation,
            writes: Vec::new(),
        })
    }
}

struct MemorySession<'a> {
    library: &'a MemoryMedialib,
    generation: u64,
    writes: Vec<(EntryId, String, Property)>,
}

impl MemorySession<'_> {
    fn pending(&self, entry: EntryId, key: &str) -> Option<&Property> {
        self.writes
            .iter()
            .rev()
            .find(|(id, name, _)| *id == entry && name == key)
            .map(|(_, _, prop)| prop)
    }
}

impl MedialibSession for MemorySession<'_> {
    fn entry_property_get(&self, entry: EntryId, key: &str) -> Option<Value> {
        if let Some(prop) = self.pending(entry, key) {
            return Some(prop.value.clone());
        }
        let store = self.library.store.lock();
        store
            .entries
            .get(&entry)?
            .get(key)
            .map(|prop| prop.value.clone())
    }

    fn entry_properties(&self, entry: EntryId) -> Vec<(String, Value)> {
        let mut merged = {
            let store = self.library.store.lock();
            store.entries.get(&entry).cloned().unwrap_or_default()
        };
        for (id, key, prop) in &self.writes {
            if *id == entry {
                merged.insert(key.clone(), prop.clone());
            }
        }
        merged
            .into_iter()
            .map(|(key, prop)| (key, prop.value))
            .collect()
    }

    fn entry_property_set(&mut self, entry: EntryId, key: &str, value: Value, source: &str) {
        self.writes.push((
            entry,
            key.to_string(),
            Property {
                source: source.to_string(),
                value,
            },
        ));
    }

    fn commit(self: Box<Self>) -> bool {
        if self.writes.is_empty() {
            return true;
        }
        let library = self.library;
        let mut store = library.store.lock();
        if store.generation != self.generation {
            return false;
        }
        for (entry, key, prop) in self.writes {
            store.entries.entry(entry).or_default().insert(key, prop);
        }
        store.generation += 1;
        true
    }
}
