//! Data contracts shared between xform plugins and the chain runtime.
//!
//! Nothing in this crate owns runtime state. Plugins describe what they
//! consume and produce with [`StreamType`], exchange metadata as [`Value`],
//! and report failures as [`PluginError`].

pub mod error;
pub mod sample;
pub mod stream_type;
pub mod value;

pub use error::PluginError;
pub use sample::SampleFormat;
pub use stream_type::StreamType;
pub use value::Value;
