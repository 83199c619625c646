//! Media library contract consumed by the token manager and chain builder.
//!
//! Storage itself lives outside this crate. The chain only needs scoped
//! sessions that read and write entry properties and commit optimistically;
//! [`with_session`] runs a closure until its session commits.

pub mod memory;
pub mod url;

use std::fmt;

use cadenza_xform_core::Value;
use tracing::debug;

pub use memory::MemoryMedialib;

/// Source identity used for facts and properties injected by the host.
pub const SERVER_SOURCE: &str = "server";

/// Entry property names written or read by the chain.
pub mod properties {
    pub const ID: &str = "id";
    pub const URL: &str = "url";
    pub const CHAIN: &str = "chain";
    pub const TIMESPLAYED: &str = "timesplayed";
    pub const LASTSTARTED: &str = "laststarted";
    pub const SAMPLE_FORMAT: &str = "sample_format";
    pub const SAMPLERATE: &str = "samplerate";
    pub const CHANNELS: &str = "channels";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u32);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait MediaLibrary: Send + Sync {
    fn begin(&self) -> Box<dyn MedialibSession + '_>;
}

/// One transaction against the media library.
pub trait MedialibSession {
    fn entry_property_get(&self, entry: EntryId, key: &str) -> Option<Value>;

    /// All properties of `entry`, in a stable order.
    fn entry_properties(&self, entry: EntryId) -> Vec<(String, Value)>;

    fn entry_property_set(&mut self, entry: EntryId, key: &str, value: Value, source: &str);

    /// Returns `false` when a concurrent writer won; the caller retries.
    fn commit(self: Box<Self>) -> bool;
}

/// Runs `f` in a fresh session until the session commits.
pub fn with_session<T, F>(library: &dyn MediaLibrary, mut f: F) -> T
where
    F: FnMut(&mut dyn MedialibSession) -> T,
{
    let mut attempt = 0_u32;
    loop {
        let mut session = library.begin();
        let out = f(session.as_mut());
        if session.commit() {
            return out;
        }
        attempt = attempt.saturating_add(1);
        debug!(attempt, "medialib session commit conflicted, retrying");
    }
}
