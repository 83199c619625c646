//! A built xform chain and the builder that negotiates it.

mod builder;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use cadenza_xform_core::StreamType;
use tracing::debug;

use crate::error::XformError;
use crate::medialib::EntryId;
use crate::node::XformNode;
use crate::plugin::SeekWhence;
use crate::tokens::{Token, TokenManager};

pub use builder::ChainBuilder;

/// Published view of a chain's layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainInfo {
    pub url: String,
    pub entry: Option<EntryId>,
    /// Shortnames of the plugin-backed stages, source first.
    pub stages: Vec<String>,
    pub out_type: StreamType,
}

impl ChainInfo {
    /// Stage shortnames joined with `:`.
    pub fn name(&self) -> String {
        self.stages.join(":")
    }
}

/// Shared handle other threads use to observe a chain across rebuilds.
#[derive(Debug)]
pub struct ChainInfoHandle {
    info: ArcSwap<ChainInfo>,
    generation: AtomicU64,
}

impl ChainInfoHandle {
    fn new(initial: ChainInfo) -> Self {
        Self {
            info: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
        }
    }

    pub fn load(&self) -> Arc<ChainInfo> {
        self.info.load_full()
    }

    /// Bumped on every rebuild.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn publish(&self, info: ChainInfo) -> u64 {
        self.info.store(Arc::new(info));
        self.generation
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }
}

/// Stages from the url pseudo-stage to the consumer-facing tail.
///
/// `nodes[..decoder_len]` is the decoder section; the remaining nodes are
/// effects and can be rebuilt in place.
pub struct XformChain {
    nodes: Vec<XformNode>,
    decoder_len: usize,
    url: String,
    entry: Option<EntryId>,
    tokens: Arc<TokenManager>,
    goals: Arc<[StreamType]>,
    rehash: bool,
    info: Arc<ChainInfoHandle>,
}

impl XformChain {
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, XformError> {
        let (tail, upstream) = self.split_tail()?;
        tail.read(upstream, buf)
    }

    pub fn peek(&mut self, buf: &mut [u8]) -> Result<usize, XformError> {
        let (tail, upstream) = self.split_tail()?;
        tail.peek(upstream, buf)
    }

    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, XformError> {
        let (tail, upstream) = self.split_tail()?;
        tail.seek(upstream, offset, whence)
    }

    fn split_tail(&mut self) -> Result<(&mut XformNode, &mut [XformNode]), XformError> {
        self.nodes
            .split_last_mut()
            .ok_or_else(|| XformError::NotReadable {
                stage: self.url.clone(),
            })
    }

    fn tail(&self) -> Option<&XformNode> {
        self.nodes.last()
    }

    pub fn out_type(&self) -> Option<&StreamType> {
        self.tail().map(XformNode::out_type)
    }

    /// Read horizon of the tail; pass it to [`TokenManager::react`].
    pub fn token(&self) -> Token {
        self.tail().map_or(Token::ORIGIN, XformNode::token)
    }

    pub fn is_eos(&self) -> bool {
        self.tail().is_some_and(XformNode::is_eos)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn entry(&self) -> Option<EntryId> {
        self.entry
    }

    pub fn is_rehash(&self) -> bool {
        self.rehash
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn stages(&self) -> impl Iterator<Item = &XformNode> {
        self.nodes.iter().filter(|node| node.plugin().is_some())
    }

    /// Number of stages in the decoder section, url pseudo-stage excluded.
    pub fn decoder_stages(&self) -> usize {
        self.decoder_len.saturating_sub(1)
    }

    pub fn chain_name(&self) -> String {
        self.stages()
            .map(XformNode::shortname)
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn info_handle(&self) -> Arc<ChainInfoHandle> {
        self.info.clone()
    }

    fn snapshot(&self) -> ChainInfo {
        ChainInfo {
            url: self.url.clone(),
            entry: self.entry,
            stages: self
                .stages()
                .map(|node| node.shortname().to_string())
                .collect(),
            out_type: self.out_type().cloned().unwrap_or_default(),
        }
    }

    /// Drops every effect stage, tail first.
    fn truncate_effects(&mut self) {
        while self.nodes.len() > self.decoder_len {
            self.nodes.pop();
        }
    }
}

impl Drop for XformChain {
    fn drop(&mut self) {
        debug!(url = %self.url, stages = self.nodes.len(), "releasing xform chain");
        release_stages(&mut self.nodes);
    }
}

/// Drops `nodes` tail first so every stage is destroyed before its upstream.
pub(crate) fn release_stages(nodes: &mut Vec<XformNode>) {
    while nodes.pop().is_some() {}
}
