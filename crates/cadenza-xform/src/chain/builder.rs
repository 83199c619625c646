use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cadenza_xform_core::stream_type::{ANY_INT, MIME_PCM, keys};
use cadenza_xform_core::{StreamType, Value};
use tracing::{debug, error, info, warn};

use super::{ChainInfo, ChainInfoHandle, XformChain, release_stages};
use crate::config::{ChainConfig, ConfigEvent, ConfigLookup};
use crate::error::ChainError;
use crate::medialib::url::decode_url;
use crate::medialib::{EntryId, MediaLibrary, SERVER_SOURCE, properties, with_session};
use crate::node::{BrowseEntry, BrowseListing, NodeEnv, XformNode};
use crate::plugin::XformPlugin;
use crate::registry::PluginRegistry;
use crate::tokens::{Token, TokenManager};

/// Negotiates chains of xform stages from a url to one of a set of goal
/// stream types.
pub struct ChainBuilder {
    registry: Arc<PluginRegistry>,
    config: Arc<dyn ConfigLookup>,
    medialib: Option<Arc<dyn MediaLibrary>>,
    settings: ChainConfig,
}

impl ChainBuilder {
    pub fn new(registry: Arc<PluginRegistry>, config: Arc<dyn ConfigLookup>) -> Self {
        Self {
            registry,
            config,
            medialib: None,
            settings: ChainConfig::default(),
        }
    }

    /// Finalized chains record `chain`, `timesplayed` and `laststarted`
    /// in `medialib`.
    pub fn with_medialib(mut self, medialib: Arc<dyn MediaLibrary>) -> Self {
        self.medialib = Some(medialib);
        self
    }

    pub fn with_settings(mut self, settings: ChainConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ChainConfig {
        &self.settings
    }

    fn env(&self, tokens: &Arc<TokenManager>, goals: &Arc<[StreamType]>) -> NodeEnv {
        NodeEnv {
            tokens: tokens.clone(),
            config: self.config.clone(),
            goals: goals.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Highest-priority plugin accepting `in_type`. Ties go to the plugin
    /// registered first; priorities of [`NO_PRIORITY`] and below never win.
    fn best_match(&self, in_type: &StreamType) -> Option<Arc<dyn XformPlugin>> {
        let mut best: Option<Arc<dyn XformPlugin>> = None;
        let mut best_priority = NO_PRIORITY;
        self.registry.for_each(|plugin| {
            debug!(plugin = plugin.shortname(), "trying plugin");
            let Some(priority) = plugin.supports(in_type) else {
                return;
            };
            debug!(plugin = plugin.shortname(), priority, "plugin matched");
            if priority <= best_priority {
                return;
            }
            if let Some(current) = &best {
                debug!(
                    plugin = plugin.shortname(),
                    priority,
                    replaced = current.shortname(),
                    replaced_priority = best_priority,
                    "using higher priority plugin"
                );
            }
            best = Some(plugin.clone());
            best_priority = priority;
        });
        best
    }

    /// Instantiates the best plugin for the output of `nodes`' tail.
    pub(crate) fn find(
        &self,
        nodes: &mut [XformNode],
        env: &NodeEnv,
    ) -> Result<XformNode, ChainError> {
        let url = chain_url(nodes);
        let max_stages = self.settings.stage_limit();
        if nodes.len() >= max_stages {
            return Err(ChainError::ChainTooLong { url, max_stages });
        }
        let in_type = nodes.last().map(|node| node.out_type().clone()).unwrap_or_default();
        let Some(plugin) = self.best_match(&in_type) else {
            debug!(%in_type, "found no matching plugin");
            return Err(ChainError::NoMatchingPlugin {
                url,
                stream_type: in_type.to_string(),
            });
        };
        Ok(XformNode::new(plugin, nodes, env)?)
    }

    /// Builds the decoder section for `url` until the tail produces one of
    /// the goal types.
    pub(crate) fn chain_setup(
        &self,
        env: &NodeEnv,
        url: &str,
    ) -> Result<Vec<XformNode>, ChainError> {
        let base = env.tokens.seed_url_args(url);
        let Some(durl) = decode_url(base) else {
            error!(%url, "couldn't decode url");
            return Err(ChainError::MalformedUrl {
                url: url.to_string(),
            });
        };

        let mut nodes = vec![XformNode::source(env, StreamType::url(durl))];
        loop {
            let node = match self.find(&mut nodes, env) {
                Ok(node) => node,
                Err(err) => {
                    error!(%url, error = %err, "couldn't set up chain");
                    release_stages(&mut nodes);
                    return Err(err);
                },
            };
            nodes.push(node);
            if has_goalformat(&nodes, &env.goals) {
                break;
            }
        }

        if let Some(tail) = nodes.last_mut() {
            collect_format_metadata(tail);
        }
        Ok(nodes)
    }

    /// Builds a chain for the entry the token manager was last reset for.
    pub fn chain_new(
        &self,
        tokens: Arc<TokenManager>,
        goals: Vec<StreamType>,
        rehash: bool,
    ) -> Result<XformChain, ChainError> {
        let Some(url) = tokens.get_string(Token::ORIGIN, 0, SERVER_SOURCE, properties::URL) else {
            error!("couldn't get url for the current entry");
            return Err(ChainError::MissingUrl);
        };
        self.chain_new_from_url(tokens, &url, goals, rehash)
    }

    /// Builds a chain for an explicit, still-encoded url.
    pub fn chain_new_from_url(
        &self,
        tokens: Arc<TokenManager>,
        url: &str,
        goals: Vec<StreamType>,
        rehash: bool,
    ) -> Result<XformChain, ChainError> {
        let goals: Arc<[StreamType]> = goals.into();
        let env = self.env(&tokens, &goals);
        let mut nodes = self.chain_setup(&env, url)?;

        let segment = &self.settings.segment_plugin;
        let add_segment = match (self.registry.find(segment), nodes.last()) {
            (Some(plugin), Some(tail)) => plugin.supports(tail.out_type()).is_some(),
            _ => false,
        };
        if add_segment {
            self.new_effect(&mut nodes, &env, segment);
        }
        let decoder_len = nodes.len();

        if !rehash {
            self.add_effects(&mut nodes, &env);
        }

        let entry = origin_entry(&tokens);
        let chain = XformChain {
            nodes,
            decoder_len,
            url: url.to_string(),
            entry,
            tokens,
            goals,
            rehash,
            info: Arc::new(ChainInfoHandle::new(ChainInfo::default())),
        };
        chain.info.publish(chain.snapshot());
        self.finalize(&chain);
        Ok(chain)
    }

    /// Appends the effect plugin `name` if it accepts the current tail's
    /// output. Failures only skip the effect.
    pub(crate) fn new_effect(&self, nodes: &mut Vec<XformNode>, env: &NodeEnv, name: &str) -> bool {
        let Some(plugin) = self.registry.find(name) else {
            error!(effect = %name, "couldn't find any effect with that name");
            return false;
        };
        if nodes.len() >= self.settings.stage_limit() {
            warn!(effect = %name, stages = nodes.len(), "chain is full, skipping effect");
            return false;
        }
        let supported = nodes
            .last()
            .is_some_and(|tail| plugin.supports(tail.out_type()).is_some());
        if !supported {
            info!(effect = %name, "effect doesn't support format, skipping");
            return false;
        }

        let added = match XformNode::new(plugin, nodes, env) {
            Ok(node) => {
                nodes.push(node);
                true
            },
            Err(err) => {
                info!(effect = %name, error = %err, "effect failed to initialize, skipping");
                false
            },
        };
        self.config.register(&format!("{name}.enabled"), "0");
        added
    }

    /// Appends the configured `effect.order.N` effects in order. Stops at
    /// the first index with no configured value; empty names are skipped.
    pub(crate) fn add_effects(&self, nodes: &mut Vec<XformNode>, env: &NodeEnv) {
        for index in 0.. {
            let Some(name) = self.config.lookup(&self.settings.effect_order_key(index)) else {
                break;
            };
            if name.is_empty() {
                continue;
            }
            self.new_effect(nodes, env, &name);
        }
    }

    /// Rebuilds the effect section when `event` touches effect settings.
    ///
    /// Returns whether the chain was rebuilt. Rehash chains carry no effects
    /// and are left alone.
    pub fn handle_config_event(&self, chain: &mut XformChain, event: &ConfigEvent) -> bool {
        if chain.rehash || !self.settings.affects_effects(event.path()) {
            return false;
        }
        debug!(path = event.path(), url = %chain.url, "effect configuration changed");
        self.rebuild_effects(chain);
        true
    }

    /// Replaces every effect stage of `chain` with a freshly configured set
    /// and publishes the new layout.
    pub fn rebuild_effects(&self, chain: &mut XformChain) {
        let env = self.env(&chain.tokens, &chain.goals);
        chain.truncate_effects();
        self.add_effects(&mut chain.nodes, &env);
        let generation = chain.info.publish(chain.snapshot());
        info!(url = %chain.url, chain = %chain.chain_name(), generation, "swapped chain effects");
    }

    fn finalize(&self, chain: &XformChain) {
        let name = chain.chain_name();
        info!(
            url = %chain.url,
            entry = ?chain.entry,
            chain = %name,
            "successfully set up chain"
        );

        chain.tokens.react(chain.token());

        let (Some(medialib), Some(entry)) = (self.medialib.as_ref(), chain.entry) else {
            return;
        };
        let rehash = chain.rehash;
        with_session(medialib.as_ref(), |session| {
            let times_played = session
                .entry_property_get(entry, properties::TIMESPLAYED)
                .and_then(|value| value.as_int())
                .unwrap_or(0)
                .max(0);
            let last_started = session
                .entry_property_get(entry, properties::LASTSTARTED)
                .and_then(|value| value.as_int());

            session.entry_property_set(
                entry,
                properties::CHAIN,
                Value::from(name.as_str()),
                SERVER_SOURCE,
            );
            session.entry_property_set(
                entry,
                properties::TIMESPLAYED,
                Value::Int(times_played + i64::from(!rehash)),
                SERVER_SOURCE,
            );
            let started = if rehash { last_started } else { Some(unix_now()) };
            if let Some(started) = started {
                session.entry_property_set(
                    entry,
                    properties::LASTSTARTED,
                    Value::Int(started),
                    SERVER_SOURCE,
                );
            }
        });
    }

    /// Lists the entries below `url` using the single stage that accepts it.
    pub fn browse(&self, url: &str) -> Result<Vec<BrowseEntry>, ChainError> {
        let Some(durl) = decode_url(url) else {
            return Err(ChainError::MalformedUrl {
                url: url.to_string(),
            });
        };
        debug!(url = %durl, "browsing");

        let tokens = Arc::new(TokenManager::new());
        let goals: Arc<[StreamType]> = Arc::from(Vec::new());
        let env = self.env(&tokens, &goals);
        let mut nodes = vec![XformNode::source(&env, StreamType::url(durl.as_str()))];

        let mut node = match self.find(&mut nodes, &env) {
            Ok(node) => node,
            Err(err) => {
                debug!(%url, error = %err, "couldn't handle that url");
                release_stages(&mut nodes);
                return Err(ChainError::BrowseUnsupported {
                    url: url.to_string(),
                });
            },
        };
        debug!(plugin = node.shortname(), "found browse xform");

        let mut listing = BrowseListing::new(durl.as_str());
        let browsed = node.browse(&mut nodes, &durl, &mut listing);
        drop(node);
        release_stages(&mut nodes);

        match browsed {
            Ok(true) => Ok(listing.into_sorted()),
            Ok(false) => Err(ChainError::BrowseUnsupported {
                url: url.to_string(),
            }),
            Err(err) => Err(ChainError::from(err)),
        }
    }
}

/// Priority floor a plugin has to beat to be picked.
const NO_PRIORITY: i32 = -1;

fn chain_url(nodes: &[XformNode]) -> String {
    nodes
        .first()
        .and_then(|node| node.out_type().get_str(keys::URL))
        .unwrap_or_default()
        .to_string()
}

fn has_goalformat(nodes: &[XformNode], goals: &[StreamType]) -> bool {
    let Some(current) = nodes.last().map(XformNode::out_type) else {
        return false;
    };
    let found = goals.iter().any(|goal| goal.matches(current));
    if !found {
        debug!(goals = goals.len(), "not in one of the goal types");
    }
    found
}

/// Records sample format, rate and channel count of a PCM tail.
fn collect_format_metadata(tail: &mut XformNode) {
    let out_type = tail.out_type().clone();
    if out_type.mimetype() != Some(MIME_PCM) {
        return;
    }
    if let Some(format) = out_type.sample_format() {
        tail.metadata_set_str(properties::SAMPLE_FORMAT, format.name());
    }
    if let Some(rate) = concrete(out_type.get_int(keys::FMT_SAMPLERATE)) {
        tail.metadata_set_int(properties::SAMPLERATE, rate);
    }
    if let Some(channels) = concrete(out_type.get_int(keys::FMT_CHANNELS)) {
        tail.metadata_set_int(properties::CHANNELS, channels);
    }
}

fn concrete(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v != ANY_INT)
}

fn origin_entry(tokens: &TokenManager) -> Option<EntryId> {
    tokens
        .get_int(Token::ORIGIN, 0, SERVER_SOURCE, properties::ID)
        .and_then(|id| u32::try_from(id).ok())
        .map(EntryId)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}

#[cfg(test)]
#[path = "../tests/chain_builder_tests.rs"]
mod tests;
