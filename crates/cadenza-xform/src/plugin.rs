//! Contract between the chain runtime and xform plugins.

use cadenza_xform_core::{PluginError, StreamType};

use crate::node::{BrowseListing, XformContext};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XformCapabilities {
    pub read: bool,
    pub seek: bool,
    pub browse: bool,
    pub destroy: bool,
}

/// An accepted input type pattern and the priority it is claimed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputType {
    pub pattern: StreamType,
    pub priority: i32,
}

impl InputType {
    pub fn new(pattern: StreamType, priority: i32) -> Self {
        Self { pattern, priority }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XformDescriptor {
    pub shortname: String,
    pub description: String,
    pub capabilities: XformCapabilities,
    pub in_types: Vec<InputType>,
}

impl XformDescriptor {
    pub fn new(shortname: impl Into<String>) -> Self {
        Self {
            shortname: shortname.into(),
            description: String::new(),
            capabilities: XformCapabilities {
                read: true,
                ..XformCapabilities::default()
            },
            in_types: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: XformCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn accepts(mut self, pattern: StreamType, priority: i32) -> Self {
        self.in_types.push(InputType::new(pattern, priority));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

/// Shared, immutable plugin descriptor. One instance is created per node.
pub trait XformPlugin: Send + Sync {
    fn descriptor(&self) -> &XformDescriptor;

    fn shortname(&self) -> &str {
        &self.descriptor().shortname
    }

    /// Priority this plugin claims `in_type` with, or `None` if unsupported.
    ///
    /// Defaults to the best priority among the declared input patterns that
    /// match.
    fn supports(&self, in_type: &StreamType) -> Option<i32> {
        self.descriptor()
            .in_types
            .iter()
            .filter(|input| input.pattern.matches(in_type))
            .map(|input| input.priority)
            .max()
    }

    /// Creates the per-node state. Must declare the output type through
    /// [`XformContext::set_out_type`] or [`XformContext::copy_out_type`].
    fn init(&self, ctx: &mut XformContext<'_>) -> Result<Box<dyn XformInstance>, PluginError>;
}

pub trait XformInstance: Send {
    /// Fills `buf` and returns the number of bytes produced; `Ok(0)` is end
    /// of stream.
    fn read(&mut self, ctx: &mut XformContext<'_>, buf: &mut [u8]) -> Result<usize, PluginError>;

    fn seek(
        &mut self,
        _ctx: &mut XformContext<'_>,
        _offset: i64,
        _whence: SeekWhence,
    ) -> Result<u64, PluginError> {
        Err(PluginError::Unsupported("seek"))
    }

    fn browse(
        &mut self,
        _ctx: &mut XformContext<'_>,
        _url: &str,
        _listing: &mut BrowseListing,
    ) -> Result<(), PluginError> {
        Err(PluginError::Unsupported("browse"))
    }

    /// Called once before the node is released, if the plugin declares the
    /// `destroy` capability.
    fn destroy(&mut self) {}
}
