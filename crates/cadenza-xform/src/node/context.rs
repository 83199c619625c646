use std::mem;

use cadenza_xform_core::stream_type::keys;
use cadenza_xform_core::{StreamType, Value};
use tracing::warn;

use super::{NodeState, XformNode};
use crate::error::XformError;
use crate::plugin::SeekWhence;
use crate::tokens::Token;

/// Where a plugin's output type lives while the context is alive.
pub(crate) enum OutTypeSlot<'a> {
    /// During init; the plugin must fill it.
    Pending(&'a mut Option<StreamType>),
    /// After init the output type can no longer change.
    Sealed(&'a StreamType),
}

/// The handle a plugin gets to its own stage and everything upstream of it.
pub struct XformContext<'a> {
    stage: &'a mut NodeState,
    upstream: &'a mut [XformNode],
    out_type: OutTypeSlot<'a>,
}

impl<'a> XformContext<'a> {
    pub(crate) fn new(
        stage: &'a mut NodeState,
        upstream: &'a mut [XformNode],
        out_type: OutTypeSlot<'a>,
    ) -> Self {
        Self {
            stage,
            upstream,
            out_type,
        }
    }

    pub fn shortname(&self) -> &str {
        &self.stage.shortname
    }

    pub fn order(&self) -> u8 {
        self.stage.order
    }

    /// Read horizon of this stage; never older than anything read from
    /// upstream.
    pub fn token(&self) -> Token {
        self.stage.token
    }

    /// Stream types the chain is being built towards.
    pub fn goals(&self) -> &[StreamType] {
        &self.stage.goals
    }

    fn upstream_mut(&mut self) -> Result<(&mut XformNode, &mut [XformNode]), XformError> {
        self.upstream
            .split_last_mut()
            .ok_or_else(|| XformError::NoUpstream {
                stage: self.stage.shortname.clone(),
            })
    }

    /// Reads from the upstream stage.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, XformError> {
        let (prev, rest) = self.upstream_mut()?;
        let n = prev.read(rest, buf)?;
        let upstream_token = prev.state.token;
        self.stage.token = self.stage.token.max(upstream_token);
        Ok(n)
    }

    /// Looks ahead at upstream bytes without consuming them.
    pub fn peek(&mut self, buf: &mut [u8]) -> Result<usize, XformError> {
        let (prev, rest) = self.upstream_mut()?;
        prev.peek(rest, buf)
    }

    pub fn seek(&mut self, offset: i64, whence: SeekWhence) -> Result<u64, XformError> {
        let (prev, rest) = self.upstream_mut()?;
        let pos = prev.seek(rest, offset, whence)?;
        self.stage.line.clear();
        Ok(pos)
    }

    /// Next line from upstream without its `\n` or `\r\n` terminator, at most
    /// `max_line_size - 1` bytes. `None` once upstream is exhausted.
    pub fn read_line(&mut self) -> Result<Option<String>, XformError> {
        let capacity = self.stage.max_line_size - 1;
        let mut pending = mem::take(&mut self.stage.line);

        if !pending.contains(&b'\n') && pending.len() < capacity {
            let start = pending.len();
            pending.resize(capacity, 0);
            match self.read(&mut pending[start..]) {
                Ok(n) => pending.truncate(start + n),
                Err(err) => {
                    pending.truncate(start);
                    self.stage.line = pending;
                    return Err(err);
                },
            }
        }

        if pending.is_empty() {
            return Ok(None);
        }

        let (end, rest) = match pending.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos, pos + 1),
            None => (pending.len(), pending.len()),
        };
        let text = pending[..end].strip_suffix(b"\r").unwrap_or(&pending[..end]);
        let line = String::from_utf8_lossy(text).into_owned();
        self.stage.line = pending.split_off(rest);
        Ok(Some(line))
    }

    /// Whether the upstream stage hit end of stream.
    pub fn is_eos(&self) -> bool {
        self.upstream.last().is_none_or(|prev| prev.state.eos)
    }

    pub fn in_type(&self) -> Option<&StreamType> {
        self.upstream.last().map(XformNode::out_type)
    }

    pub fn indata_get_str(&self, key: &str) -> Option<&str> {
        self.in_type()?.get_str(key)
    }

    pub fn indata_get_int(&self, key: &str) -> Option<i64> {
        self.in_type()?.get_int(key)
    }

    /// First value for `key` walking upstream from the nearest stage.
    pub fn indata_find_str(&self, key: &str) -> Option<&str> {
        self.upstream
            .iter()
            .rev()
            .find_map(|node| node.out_type().get_str(key))
    }

    /// Url of the stream this stage ultimately reads.
    pub fn url(&self) -> Option<&str> {
        self.indata_find_str(keys::URL)
    }

    pub fn out_type(&self) -> Option<&StreamType> {
        match &self.out_type {
            OutTypeSlot::Pending(slot) => slot.as_ref(),
            OutTypeSlot::Sealed(out_type) => Some(out_type),
        }
    }

    /// Declares this stage's output type. Only allowed during init.
    pub fn set_out_type(&mut self, out_type: StreamType) -> bool {
        match &mut self.out_type {
            OutTypeSlot::Pending(slot) => {
                **slot = Some(out_type);
                true
            },
            OutTypeSlot::Sealed(_) => {
                warn!(stage = %self.stage.shortname, "output type changed after init, ignoring");
                false
            },
        }
    }

    /// Declares the input type as this stage's output type.
    pub fn copy_out_type(&mut self) -> bool {
        let Some(in_type) = self.in_type().cloned() else {
            return false;
        };
        self.set_out_type(in_type)
    }

    pub fn auxdata_set_int(&mut self, key: &str, value: i64) {
        self.stage.auxdata_set_if_changed(key, Value::Int(value));
    }

    pub fn auxdata_set_str(&mut self, key: &str, value: &str) {
        self.stage.auxdata_set_if_changed(key, Value::from(value));
    }

    pub fn auxdata_set_bin(&mut self, key: &str, value: &[u8]) {
        self.stage.auxdata_set(key, Value::Bin(value.to_vec()));
    }

    /// Anchors a keyless hotspot. Downstream reads stop at it.
    pub fn auxdata_barrier(&mut self) {
        let pos = self.stage.buffer.len();
        self.stage.hotspots.barrier(pos);
    }

    /// Auxdata published by the upstream stage at the current read position.
    pub fn auxdata_get(&self, key: &str) -> Option<&Value> {
        self.upstream.last()?.auxdata_get(key)
    }

    pub fn auxdata_has_val(&self, key: &str) -> bool {
        self.auxdata_get(key).is_some()
    }

    pub fn auxdata_get_int(&self, key: &str) -> Option<i64> {
        self.auxdata_get(key)?.as_int()
    }

    pub fn auxdata_get_str(&self, key: &str) -> Option<&str> {
        self.auxdata_get(key)?.as_str()
    }

    pub fn auxdata_get_bin(&self, key: &str) -> Option<&[u8]> {
        self.auxdata_get(key)?.as_bin()
    }

    /// Records a persistent fact for this stage.
    pub fn metadata_set_int(&mut self, key: &str, value: i64) -> bool {
        self.stage.metadata_set(key, Value::Int(value));
        true
    }

    pub fn metadata_set_str(&mut self, key: &str, value: &str) -> bool {
        if self.metadata_get_str(key).as_deref() == Some(value) {
            return true;
        }
        self.stage.metadata_set(key, Value::from(value));
        true
    }

    /// Like [`Self::metadata_set_str`] for raw tag bytes; rejects non-UTF-8
    /// input without touching the metadata store.
    pub fn metadata_set_str_bytes(&mut self, key: &str, value: &[u8]) -> bool {
        match std::str::from_utf8(value) {
            Ok(text) => self.metadata_set_str(key, text),
            Err(_) => {
                warn!(
                    stage = %self.stage.shortname,
                    %key,
                    "xform tried to set property to a non UTF-8 string"
                );
                false
            },
        }
    }

    pub fn metadata_get_int(&self, key: &str) -> Option<i64> {
        self.stage.metadata_get(key)?.as_int()
    }

    pub fn metadata_get_str(&self, key: &str) -> Option<String> {
        match self.stage.metadata_get(key)? {
            Value::String(text) => Some(text),
            Value::Int(_) | Value::Bin(_) => None,
        }
    }

    pub fn metadata_has_val(&self, key: &str) -> bool {
        self.stage.metadata_get(key).is_some()
    }

    /// Looks up `<shortname>.<name>` in the configuration.
    pub fn config_lookup(&self, name: &str) -> Option<String> {
        self.stage
            .config
            .lookup(&format!("{}.{name}", self.stage.shortname))
    }
}
