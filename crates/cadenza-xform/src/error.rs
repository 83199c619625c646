//! Typed error enums for stage streaming and chain construction.
//!
//! [`XformError`] is what a single stage reports while streaming.
//! [`ChainError`] is the top-level error for building chains and wraps stage
//! errors raised while a chain is being assembled.

use cadenza_xform_core::PluginError;
use thiserror::Error;

/// Errors produced by a single xform stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XformError {
    /// A previous read failed; the stage stays errored for good.
    #[error("read on errored xform '{stage}'")]
    Errored {
        /// Shortname of the errored stage.
        stage: String,
    },
    /// The stage plugin does not declare seek capability.
    #[error("seek not implemented in '{stage}'")]
    SeekUnsupported {
        /// Shortname of the stage.
        stage: String,
    },
    /// The stage has no plugin able to produce bytes.
    #[error("xform '{stage}' cannot be read")]
    NotReadable {
        /// Shortname of the stage.
        stage: String,
    },
    /// The operation needs an upstream stage but this is the chain source.
    #[error("xform '{stage}' has no upstream stage")]
    NoUpstream {
        /// Shortname of the stage.
        stage: String,
    },
    /// The plugin claimed to read more bytes than it was offered.
    #[error("read method of '{stage}' returned {returned} for a {requested} byte buffer - bug in plugin")]
    ReadOutOfRange {
        /// Shortname of the misbehaving stage.
        stage: String,
        /// Length reported by the plugin.
        returned: usize,
        /// Length of the buffer handed to the plugin.
        requested: usize,
    },
    /// The plugin init callback failed.
    #[error("xform '{stage}' failed to initialize: {source}")]
    InitFailed {
        /// Shortname of the stage.
        stage: String,
        /// Plugin error returned by init.
        #[source]
        source: PluginError,
    },
    /// The plugin returned from init without declaring its output type.
    #[error("xform '{stage}' did not set an output type during init - bug in plugin")]
    OutTypeUnset {
        /// Shortname of the stage.
        stage: String,
    },
    /// The plugin reported a failure while streaming.
    #[error("xform '{stage}' failed: {source}")]
    Plugin {
        /// Shortname of the stage.
        stage: String,
        /// Underlying plugin error.
        #[source]
        source: PluginError,
    },
}

/// Errors produced while building or browsing chains.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// No registered plugin accepts the current output type.
    #[error("couldn't set up chain for '{url}': no plugin supports {stream_type}")]
    NoMatchingPlugin {
        /// URL the chain was built for.
        url: String,
        /// Display form of the unmatched stream type.
        stream_type: String,
    },
    /// The token manager holds no origin `url` fact.
    #[error("no url known for the current entry")]
    MissingUrl,
    /// The URL could not be percent-decoded.
    #[error("malformed url '{url}'")]
    MalformedUrl {
        /// Offending URL.
        url: String,
    },
    /// Chain grew past the configured stage limit without reaching a goal.
    #[error("chain for '{url}' exceeded {max_stages} stages")]
    ChainTooLong {
        /// URL the chain was built for.
        url: String,
        /// Stage limit in effect.
        max_stages: usize,
    },
    /// The stage found for a browse request cannot browse.
    #[error("couldn't browse '{url}'")]
    BrowseUnsupported {
        /// URL passed to browse.
        url: String,
    },
    /// Wrapped stage failure.
    #[error(transparent)]
    Xform(#[from] XformError),
}
