#![deny(clippy::wildcard_imports)]

//! Xform chain runtime: negotiates a pipeline of transform plugins from a
//! media url to a goal stream type, pulls bytes through it, and keeps the
//! metadata its stages produce in a token-versioned store.

pub mod chain;
pub mod config;
pub mod error;
pub mod logging;
pub mod medialib;
pub mod node;
pub mod plugin;
pub mod registry;
pub mod tokens;

pub use cadenza_xform_core::{PluginError, SampleFormat, StreamType, Value};
pub use chain::{ChainBuilder, ChainInfo, ChainInfoHandle, XformChain};
pub use config::{ChainConfig, ConfigEvent, ConfigLookup, ConfigStore};
pub use error::{ChainError, XformError};
pub use logging::init_tracing;
pub use medialib::{EntryId, MediaLibrary, MedialibSession, MemoryMedialib};
pub use node::{BrowseEntry, BrowseListing, XformContext, XformNode};
pub use plugin::{
    InputType, SeekWhence, XformCapabilities, XformDescriptor, XformInstance, XformPlugin,
};
pub use registry::PluginRegistry;
pub use tokens::{
    FactSnapshot, Lifetime, MetadataEvent, MetadataEventHub, ReactObserver, ReactReport, Token,
    TokenManager,
};
