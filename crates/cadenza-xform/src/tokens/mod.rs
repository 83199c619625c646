//! Token-versioned metadata store shared by every stage of a chain.
//!
//! Facts are appended with a monotonically increasing [`Token`]. Readers pass
//! a horizon token and their stage order; a fact is visible only if it was
//! written at or before the horizon by the same or an upstream stage. Origin
//! facts (seeded from the media library) carry [`Token::ORIGIN`] and follow
//! source-based visibility instead.

mod log;
mod report;

use std::fmt;
use std::sync::Arc;

use cadenza_xform_core::Value;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::medialib::url::{UrlArg, split_url_args};
use crate::medialib::{EntryId, MediaLibrary, MedialibSession, properties};
use self::log::TokenLog;

pub use crate::medialib::SERVER_SOURCE;
pub use report::{FactSnapshot, MetadataEvent, MetadataEventHub, ReactObserver, ReactReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u64);

impl Token {
    pub const ORIGIN: Token = Token(0);

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Seeded from the media library before any stage runs.
    Origin,
    /// Written back to the media library by `react`.
    Persistent,
    Volatile,
}

pub struct TokenManager {
    log: Mutex<TokenLog>,
    medialib: Option<Arc<dyn MediaLibrary>>,
    observers: RwLock<Vec<Arc<dyn ReactObserver>>>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(TokenLog::default()),
            medialib: None,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Persistent facts are written to `medialib` on `react`.
    pub fn with_medialib(medialib: Arc<dyn MediaLibrary>) -> Self {
        Self {
            medialib: Some(medialib),
            ..Self::new()
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ReactObserver>) {
        self.observers.write().push(observer);
    }

    /// Appends a fact. Origin writes return [`Token::ORIGIN`]; every other
    /// write returns a token greater than any previously returned.
    pub fn set(
        &self,
        order: u8,
        source: &str,
        key: &str,
        value: impl Into<Value>,
        lifetime: Lifetime,
    ) -> Token {
        self.log
            .lock()
            .append(order, source, key, value.into(), lifetime)
    }

    pub fn set_int(
        &self,
        order: u8,
        source: &str,
        key: &str,
        value: i64,
        lifetime: Lifetime,
    ) -> Token {
        self.set(order, source, key, value, lifetime)
    }

    pub fn set_string(
        &self,
        order: u8,
        source: &str,
        key: &str,
        value: &str,
        lifetime: Lifetime,
    ) -> Token {
        self.set(order, source, key, value, lifetime)
    }

    pub fn set_origin_int(&self, source: &str, key: &str, value: i64) -> Token {
        self.set_int(0, source, key, value, Lifetime::Origin)
    }

    pub fn set_origin_string(&self, source: &str, key: &str, value: &str) -> Token {
        self.set_string(0, source, key, value, Lifetime::Origin)
    }

    pub fn set_persistent_int(&self, order: u8, source: &str, key: &str, value: i64) -> Token {
        self.set_int(order, source, key, value, Lifetime::Persistent)
    }

    pub fn set_persistent_string(&self, order: u8, source: &str, key: &str, value: &str) -> Token {
        self.set_string(order, source, key, value, Lifetime::Persistent)
    }

    pub fn set_volatile_int(&self, order: u8, source: &str, key: &str, value: i64) -> Token {
        self.set_int(order, source, key, value, Lifetime::Volatile)
    }

    pub fn set_volatile_string(&self, order: u8, source: &str, key: &str, value: &str) -> Token {
        self.set_string(order, source, key, value, Lifetime::Volatile)
    }

    /// Newest fact for `key` visible to a reader at `(token, order, source)`.
    pub fn get(&self, token: Token, order: u8, source: &str, key: &str) -> Option<Value> {
        self.log.lock().find(token, order, source, key).cloned()
    }

    pub fn get_int(&self, token: Token, order: u8, source: &str, key: &str) -> Option<i64> {
        self.log
            .lock()
            .find(token, order, source, key)
            .and_then(Value::as_int)
    }

    pub fn get_string(&self, token: Token, order: u8, source: &str, key: &str) -> Option<String> {
        self.log
            .lock()
            .find(token, order, source, key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn has_value(&self, token: Token, order: u8, source: &str, key: &str) -> bool {
        self.log.lock().find(token, order, source, key).is_some()
    }

    /// Last token handed out by a versioned write.
    pub fn head_token(&self) -> Token {
        self.log.lock().last_token
    }

    /// Entry the log was last reset for.
    pub fn entry(&self) -> Option<EntryId> {
        self.log.lock().entry
    }

    pub fn len(&self) -> usize {
        self.log.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies every fact issued up to `token` that an earlier call has not
    /// seen yet, writes the persistent ones to the media library and notifies
    /// observers.
    ///
    /// Returns whether the persistent facts were stored. Facts that failed to
    /// persist are offered again by the next call.
    pub fn react(&self, token: Token) -> ReactReport {
        let report = {
            let mut log = self.log.lock();
            let horizon = log.horizon(token);
            let changed = log.collect(log.reacted, horizon, false);
            let persistent = log.collect(log.persisted, horizon, true);

            for (key, source, value) in changed.iter() {
                debug!(%source, %key, %value, "metadata changed");
            }

            let persisted = self.persist(log.entry, &persistent);
            log.reacted = horizon;
            if persisted {
                log.persisted = horizon;
            }
            // Superseded volatile facts are kept; readers may still hold old horizons.

            ReactReport {
                token,
                changed,
                persistent,
                persisted,
            }
        };

        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_react(&report);
        }
        report
    }

    fn persist(&self, entry: Option<EntryId>, facts: &FactSnapshot) -> bool {
        let (Some(medialib), Some(entry)) = (self.medialib.as_ref(), entry) else {
            return true;
        };
        if facts.is_empty() {
            return true;
        }

        let mut session = medialib.begin();
        for (key, source, value) in facts.iter() {
            session.entry_property_set(entry, key, value.clone(), &format!("plugin/{source}"));
        }
        let committed = session.commit();
        if !committed {
            debug!(%entry, facts = facts.len(), "persisting metadata conflicted, will retry");
        }
        committed
    }

    /// Discards the whole log and seeds origin facts for `entry`.
    ///
    /// The entry's `url` is split into its base and one fact per query
    /// argument; every other property is copied as is. All seeded facts use
    /// [`SERVER_SOURCE`].
    pub fn reset(&self, session: &dyn MedialibSession, entry: EntryId) {
        let props = session.entry_properties(entry);

        let mut log = self.log.lock();
        log.clear();
        log.entry = Some(entry);
        log.append(
            0,
            SERVER_SOURCE,
            properties::ID,
            Value::Int(i64::from(entry.0)),
            Lifetime::Origin,
        );

        for (key, value) in props {
            if key == properties::ID {
                continue;
            }
            if key == properties::URL
                && let Some(url) = value.as_str()
            {
                seed_url(&mut log, url);
                continue;
            }
            log.append(0, SERVER_SOURCE, &key, value, Lifetime::Origin);
        }
    }

    /// Registers the query arguments of `url` as origin facts and returns the
    /// still-encoded base.
    pub(crate) fn seed_url_args<'u>(&self, url: &'u str) -> &'u str {
        seed_url_args(&mut self.log.lock(), url)
    }
}

fn seed_url(log: &mut TokenLog, url: &str) {
    let base = seed_url_args(log, url);
    log.append(
        0,
        SERVER_SOURCE,
        properties::URL,
        Value::from(base),
        Lifetime::Origin,
    );
}

fn seed_url_args<'u>(log: &mut TokenLog, url: &'u str) -> &'u str {
    let Some((base, args)) = split_url_args(url) else {
        warn!(%url, "ignoring undecodable url arguments");
        return url.split_once('?').map_or(url, |(base, _)| base);
    };
    for arg in args {
        match arg {
            UrlArg::Value { key, value } => {
                log.append(0, SERVER_SOURCE, &key, Value::String(value), Lifetime::Origin);
            },
            UrlArg::Flag { key } => {
                log.append(0, SERVER_SOURCE, &key, Value::Int(1), Lifetime::Origin);
            },
        }
    }
    base
}

#[cfg(test)]
#[path = "../tests/token_manager_tests.rs"]
mod tests;
