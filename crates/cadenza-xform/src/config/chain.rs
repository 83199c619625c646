use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Bytes requested from a plugin per read-ahead refill.
    pub read_chunk: usize,
    /// Capacity of the per-stage line reader, terminator included.
    pub max_line_size: usize,
    /// Effect appended after the core chain to collect segment metadata.
    pub segment_plugin: String,
    /// Prefix of the numbered effect list (`effect.order.0`, ...).
    pub effect_order_prefix: String,
    /// Upper bound on stages in a single chain, url stage included. Values
    /// above [`MAX_CHAIN_STAGES`] are capped.
    pub max_stages: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            read_chunk: 4096,
            max_line_size: 1024,
            segment_plugin: "segment".to_string(),
            effect_order_prefix: "effect.order.".to_string(),
            max_stages: usize::from(u8::MAX),
        }
    }
}

/// Stage orders are `u8`, so a chain holds at most this many stages.
pub const MAX_CHAIN_STAGES: usize = u8::MAX as usize + 1;

impl ChainConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// `max_stages`, capped at [`MAX_CHAIN_STAGES`].
    pub(crate) fn stage_limit(&self) -> usize {
        self.max_stages.min(MAX_CHAIN_STAGES)
    }

    pub(crate) fn effect_order_key(&self, index: usize) -> String {
        format!("{}{index}", self.effect_order_prefix)
    }

    /// Whether a changed config path affects the effect section of a chain.
    pub(crate) fn affects_effects(&self, path: &str) -> bool {
        path.starts_with(&self.effect_order_prefix) || path.ends_with(".enabled")
    }
}
