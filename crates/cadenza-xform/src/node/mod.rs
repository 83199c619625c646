//! A single pull-based stage of an xform chain.
//!
//! Nodes live in a chain arena ordered from source to tail. Every operation
//! that reaches upstream takes the slice of nodes in front of `self`, so a
//! stage can only ever pull from stages that were built before it.

mod browse;
mod context;
mod hotspot;

use std::mem;
use std::sync::Arc;

use cadenza_xform_core::{StreamType, Value};
use tracing::{debug, error, warn};

use crate::config::{ChainConfig, ConfigLookup};
use crate::error::XformError;
use crate::plugin::{SeekWhence, XformInstance, XformPlugin};
use crate::tokens::{Lifetime, Token, TokenManager};
use hotspot::HotspotQueue;

pub use browse::{BrowseEntry, BrowseListing, keys as browse_keys};
pub use context::XformContext;

pub(crate) use context::OutTypeSlot;

/// Shortname reported for the url pseudo-stage.
pub(crate) const SOURCE_SHORTNAME: &str = "url";

/// Everything a node owns apart from its plugin and output type.
pub(crate) struct NodeState {
    pub(crate) order: u8,
    pub(crate) shortname: String,
    pub(crate) token: Token,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) config: Arc<dyn ConfigLookup>,
    pub(crate) goals: Arc<[StreamType]>,
    pub(crate) read_chunk: usize,
    pub(crate) max_line_size: usize,
    /// Read-ahead bytes not yet handed downstream.
    pub(crate) buffer: Vec<u8>,
    scratch: Vec<u8>,
    pub(crate) hotspots: HotspotQueue,
    pub(crate) eos: bool,
    pub(crate) error: bool,
    /// Partial line kept by `read_line` between calls.
    pub(crate) line: Vec<u8>,
}

/// Shared pieces every node of a chain is built with.
#[derive(Clone)]
pub(crate) struct NodeEnv {
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) config: Arc<dyn ConfigLookup>,
    pub(crate) goals: Arc<[StreamType]>,
    pub(crate) settings: ChainConfig,
}

impl NodeState {
    fn new(env: &NodeEnv, order: u8, shortname: &str, token: Token) -> Self {
        Self {
            order,
            shortname: shortname.to_string(),
            token,
            tokens: env.tokens.clone(),
            config: env.config.clone(),
            goals: env.goals.clone(),
            read_chunk: env.settings.read_chunk.max(1),
            max_line_size: env.settings.max_line_size.max(2),
            buffer: Vec::with_capacity(env.settings.read_chunk),
            scratch: Vec::new(),
            hotspots: HotspotQueue::default(),
            eos: false,
            error: false,
            line: Vec::new(),
        }
    }

    /// Anchors `value` at the current end of the read-ahead buffer.
    pub(crate) fn auxdata_set(&mut self, key: &str, value: Value) {
        self.hotspots.push(self.buffer.len(), key, value);
    }

    /// Like [`Self::auxdata_set`] but skipped when the newest value for
    /// `key` already equals `value`.
    pub(crate) fn auxdata_set_if_changed(&mut self, key: &str, value: Value) {
        if self.hotspots.latest(key) == Some(&value) {
            return;
        }
        self.auxdata_set(key, value);
    }

    pub(crate) fn metadata_set(&mut self, key: &str, value: Value) {
        let token = self
            .tokens
            .set(self.order, &self.shortname, key, value, Lifetime::Persistent);
        self.token = self.token.max(token);
    }

    pub(crate) fn metadata_get(&self, key: &str) -> Option<Value> {
        self.tokens.get(self.token, self.order, &self.shortname, key)
    }
}

pub struct XformNode {
    plugin: Option<Arc<dyn XformPlugin>>,
    instance: Option<Box<dyn XformInstance>>,
    out_type: StreamType,
    pub(crate) state: NodeState,
}

impl XformNode {
    /// The url pseudo-stage every chain starts from.
    pub(crate) fn source(env: &NodeEnv, out_type: StreamType) -> Self {
        Self {
            plugin: None,
            instance: None,
            out_type,
            state: NodeState::new(env, 0, SOURCE_SHORTNAME, Token::ORIGIN),
        }
    }

    /// Instantiates `plugin` on top of `upstream`.
    ///
    /// Fails if the plugin init fails or returns without declaring an output
    /// type.
    pub(crate) fn new(
        plugin: Arc<dyn XformPlugin>,
        upstream: &mut [XformNode],
        env: &NodeEnv,
    ) -> Result<Self, XformError> {
        let shortname = plugin.shortname().to_string();
        let (order, token) = upstream.last().map_or((0, Token::ORIGIN), |prev| {
            (prev.state.order.saturating_add(1), prev.state.token)
        });
        let mut state = NodeState::new(env, order, &shortname, token);

        let mut out_type = None;
        let init = {
            let mut ctx =
                XformContext::new(&mut state, upstream, OutTypeSlot::Pending(&mut out_type));
            plugin.init(&mut ctx)
        };
        let mut instance = init.map_err(|source| XformError::InitFailed {
            stage: shortname.clone(),
            source,
        })?;

        let Some(out_type) = out_type else {
            error!(stage = %shortname, "xform did not set an output type during init - bug in plugin");
            if plugin.descriptor().capabilities.destroy {
                instance.destroy();
            }
            return Err(XformError::OutTypeUnset { stage: shortname });
        };

        debug!(stage = %shortname, order, %out_type, "xform initialized");
        Ok(Self {
            plugin: Some(plugin),
            instance: Some(instance),
            out_type,
            state,
        })
    }

    pub fn shortname(&self) -> &str {
        &self.state.shortname
    }

    pub fn order(&self) -> u8 {
        self.state.order
    }

    pub fn token(&self) -> Token {
        self.state.token
    }

    pub fn out_type(&self) -> &StreamType {
        &self.out_type
    }

    pub fn plugin(&self) -> Option<&Arc<dyn XformPlugin>> {
        self.plugin.as_ref()
    }

    pub fn is_eos(&self) -> bool {
        self.state.eos
    }

    pub fn is_errored(&self) -> bool {
        self.state.error
    }

    /// Bytes read ahead but not consumed yet.
    pub fn buffered(&self) -> usize {
        self.state.buffer.len()
    }

    /// Auxdata as seen by the stage reading from this node.
    pub fn auxdata_get(&self, key: &str) -> Option<&Value> {
        self.state.hotspots.get(key)
    }

    pub fn metadata_get(&self, key: &str) -> Option<Value> {
        self.state.metadata_get(key)
    }

    pub fn metadata_set_int(&mut self, key: &str, value: i64) {
        self.state.metadata_set(key, Value::Int(value));
    }

    pub fn metadata_set_str(&mut self, key: &str, value: &str) {
        self.state.metadata_set(key, Value::from(value));
    }

    /// Consumes up to `buf.len()` bytes, never crossing a pending hotspot.
    pub(crate) fn read(
        &mut self,
        upstream: &mut [XformNode],
        buf: &mut [u8],
    ) -> Result<usize, XformError> {
        if self.state.error {
            return Err(XformError::Errored {
                stage: self.state.shortname.clone(),
            });
        }

        let mut size = buf.len();
        if let Some(next) = self.state.hotspots.land_ready() {
            size = size.min(next);
        }

        let mut read = 0;
        if !self.state.buffer.is_empty() {
            read = size.min(self.state.buffer.len());
            buf[..read].copy_from_slice(&self.state.buffer[..read]);
            self.state.buffer.drain(..read);
            self.state.hotspots.advance(read);
        }

        if self.state.eos {
            return Ok(read);
        }

        while read < size {
            let n = self.pull(upstream, &mut buf[read..size])?;
            if n == 0 {
                self.state.eos = true;
                break;
            }
            if read == 0 {
                self.state.hotspots.land_ready();
            }
            if self.state.hotspots.has_pending() {
                self.state.buffer.extend_from_slice(&buf[read..read + n]);
                break;
            }
            read += n;
        }

        Ok(read)
    }

    /// Copies up to `buf.len()` bytes without consuming them.
    pub(crate) fn peek(
        &mut self,
        upstream: &mut [XformNode],
        buf: &mut [u8],
    ) -> Result<usize, XformError> {
        if self.state.error {
            return Err(XformError::Errored {
                stage: self.state.shortname.clone(),
            });
        }

        while self.state.buffer.len() < buf.len() && !self.state.eos {
            let mut chunk = mem::take(&mut self.state.scratch);
            chunk.resize(self.state.read_chunk, 0);
            let pulled = self.pull(upstream, &mut chunk);
            match pulled {
                Ok(0) => self.state.eos = true,
                Ok(n) => self.state.buffer.extend_from_slice(&chunk[..n]),
                Err(_) => {},
            }
            self.state.scratch = chunk;
            pulled?;
        }

        let n = buf.len().min(self.state.buffer.len());
        buf[..n].copy_from_slice(&self.state.buffer[..n]);
        Ok(n)
    }

    /// Seeks the plugin; a successful seek drops read-ahead bytes and every
    /// pending hotspot.
    pub(crate) fn seek(
        &mut self,
        upstream: &mut [XformNode],
        offset: i64,
        whence: SeekWhence,
    ) -> Result<u64, XformError> {
        let stage = self.state.shortname.clone();
        if self.state.error {
            return Err(XformError::Errored { stage });
        }
        let seekable = self
            .plugin
            .as_ref()
            .is_some_and(|plugin| plugin.descriptor().capabilities.seek);
        let (true, Some(instance)) = (seekable, self.instance.as_mut()) else {
            debug!(%stage, "seek not implemented");
            return Err(XformError::SeekUnsupported { stage });
        };

        let offset = match whence {
            SeekWhence::Cur => offset - self.state.buffer.len() as i64,
            SeekWhence::Set | SeekWhence::End => offset,
        };

        let result = {
            let mut ctx = XformContext::new(
                &mut self.state,
                upstream,
                OutTypeSlot::Sealed(&self.out_type),
            );
            instance.seek(&mut ctx, offset, whence)
        };

        match result {
            Ok(pos) => {
                self.state.eos = false;
                self.state.buffer.clear();
                self.state.hotspots.clear_pending();
                Ok(pos)
            },
            Err(source) => {
                self.state.error = true;
                Err(XformError::Plugin { stage, source })
            },
        }
    }

    /// Lists entries below `url` through the plugin's browse callback.
    pub(crate) fn browse(
        &mut self,
        upstream: &mut [XformNode],
        url: &str,
        listing: &mut BrowseListing,
    ) -> Result<bool, XformError> {
        let browsable = self
            .plugin
            .as_ref()
            .is_some_and(|plugin| plugin.descriptor().capabilities.browse);
        let (true, Some(instance)) = (browsable, self.instance.as_mut()) else {
            return Ok(false);
        };

        let mut ctx = XformContext::new(
            &mut self.state,
            upstream,
            OutTypeSlot::Sealed(&self.out_type),
        );
        instance
            .browse(&mut ctx, url, listing)
            .map_err(|source| XformError::Plugin {
                stage: self.state.shortname.clone(),
                source,
            })?;
        Ok(true)
    }

    /// One plugin read into `out`; marks the node errored on failure.
    fn pull(&mut self, upstream: &mut [XformNode], out: &mut [u8]) -> Result<usize, XformError> {
        let Some(instance) = self.instance.as_mut() else {
            return Err(XformError::NotReadable {
                stage: self.state.shortname.clone(),
            });
        };

        let requested = out.len();
        let result = {
            let mut ctx = XformContext::new(
                &mut self.state,
                upstream,
                OutTypeSlot::Sealed(&self.out_type),
            );
            instance.read(&mut ctx, out)
        };

        match result {
            Ok(n) if n <= requested => Ok(n),
            Ok(returned) => {
                error!(
                    stage = %self.state.shortname,
                    returned,
                    requested,
                    "read method returned bad value - bug in plugin"
                );
                self.state.error = true;
                Err(XformError::ReadOutOfRange {
                    stage: self.state.shortname.clone(),
                    returned,
                    requested,
                })
            },
            Err(source) => {
                warn!(stage = %self.state.shortname, error = %source, "xform read failed");
                self.state.error = true;
                Err(XformError::Plugin {
                    stage: self.state.shortname.clone(),
                    source,
                })
            },
        }
    }
}

impl Drop for XformNode {
    fn drop(&mut self) {
        debug!(stage = %self.state.shortname, "freeing xform");
        let destroy = self
            .plugin
            .as_ref()
            .is_some_and(|plugin| plugin.descriptor().capabilities.destroy);
        if let (true, Some(instance)) = (destroy, self.instance.as_mut()) {
            instance.destroy();
        }
    }
}

#[cfg(test)]
#[path = "../tests/node_tests.rs"]
mod tests;
