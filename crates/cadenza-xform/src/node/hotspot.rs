use std::collections::{HashMap, VecDeque};

use cadenza_xform_core::Value;

#[derive(Debug, Clone)]
struct Hotspot {
    /// Offset from the start of the unconsumed buffer.
    pos: usize,
    /// `None` for barriers.
    datum: Option<(String, Value)>,
}

/// Auxiliary data anchored to byte offsets of a node's output.
#[derive(Debug, Default)]
pub(crate) struct HotspotQueue {
    pending: VecDeque<Hotspot>,
    landed: HashMap<String, Value>,
}

impl HotspotQueue {
    pub(crate) fn push(&mut self, pos: usize, key: &str, value: Value) {
        self.pending.push_back(Hotspot {
            pos,
            datum: Some((key.to_string(), value)),
        });
    }

    pub(crate) fn barrier(&mut self, pos: usize) {
        self.pending.push_back(Hotspot { pos, datum: None });
    }

    /// Lands every hotspot at offset 0 and returns the offset of the next
    /// pending one.
    pub(crate) fn land_ready(&mut self) -> Option<usize> {
        while self.pending.front().is_some_and(|hs| hs.pos == 0) {
            if let Some(Hotspot {
                datum: Some((key, value)),
                ..
            }) = self.pending.pop_front()
            {
                self.landed.insert(key, value);
            }
        }
        self.pending.front().map(|hs| hs.pos)
    }

    /// Shifts pending offsets after `consumed` bytes left the buffer.
    pub(crate) fn advance(&mut self, consumed: usize) {
        for hs in &mut self.pending {
            hs.pos = hs.pos.saturating_sub(consumed);
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Value a downstream reader sees: the newest hotspot at offset 0 that
    /// has not been drained yet, else the landed value.
    pub(crate) fn get(&self, key: &str) -> Option<&Value> {
        self.pending
            .iter()
            .take_while(|hs| hs.pos == 0)
            .filter_map(|hs| hs.datum.as_ref())
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value)
            .last()
            .or_else(|| self.landed.get(key))
    }

    /// Newest value written for `key`, pending or landed.
    pub(crate) fn latest(&self, key: &str) -> Option<&Value> {
        self.pending
            .iter()
            .rev()
            .filter_map(|hs| hs.datum.as_ref())
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
            .or_else(|| self.landed.get(key))
    }
}
