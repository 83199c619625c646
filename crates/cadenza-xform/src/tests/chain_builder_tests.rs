use std::sync::Arc;

use cadenza_xform_core::stream_type::MIME_URL;
use cadenza_xform_core::{PluginError, SampleFormat, StreamType};
use parking_lot::Mutex;

use super::ChainBuilder;
use crate::config::{ChainConfig, ConfigLookup, ConfigStore};
use crate::error::ChainError;
use crate::node::XformContext;
use crate::plugin::{XformCapabilities, XformDescriptor, XformInstance, XformPlugin};
use crate::registry::PluginRegistry;
use crate::tokens::{Token, TokenManager};

struct Stage {
    descriptor: XformDescriptor,
    /// `None` copies the input type.
    out: Option<StreamType>,
    fail_init: bool,
}

impl Stage {
    fn new(name: &str, accepts: StreamType, priority: i32, out: Option<StreamType>) -> Self {
        Self {
            descriptor: XformDescriptor::new(name).accepts(accepts, priority),
            out,
            fail_init: false,
        }
    }

    fn failing(mut self) -> Self {
        self.fail_init = true;
        self
    }
}

impl XformPlugin for Stage {
    fn descriptor(&self) -> &XformDescriptor {
        &self.descriptor
    }

    fn init(&self, ctx: &mut XformContext<'_>) -> Result<Box<dyn XformInstance>, PluginError> {
        if self.fail_init {
            return Err(PluginError::Failed("refused".to_string()));
        }
        if let Some(url) = ctx.url().map(str::to_string) {
            ctx.metadata_set_str("seen_url", &url);
        }
        match &self.out {
            Some(out) => ctx.set_out_type(out.clone()),
            None => ctx.copy_out_type(),
        };
        Ok(Box::new(Passthrough))
    }
}

struct Passthrough;

impl XformInstance for Passthrough {
    fn read(&mut self, ctx: &mut XformContext<'_>, buf: &mut [u8]) -> Result<usize, PluginError> {
        ctx.read(buf).map_err(|err| PluginError::io(err.to_string()))
    }
}

fn url_type() -> StreamType {
    StreamType::new(MIME_URL)
}

fn pcm_out() -> StreamType {
    StreamType::pcm(Some(SampleFormat::S16), Some(2), Some(44_100))
}

fn pcm_goal() -> Vec<StreamType> {
    vec![StreamType::pcm(None, None, None)]
}

fn builder<P: XformPlugin + 'static>(plugins: Vec<P>) -> (ChainBuilder, Arc<ConfigStore>) {
    let registry = Arc::new(PluginRegistry::new());
    for plugin in plugins {
        registry.register(Arc::new(plugin));
    }
    let config = Arc::new(ConfigStore::new());
    (ChainBuilder::new(registry, config.clone()), config)
}

#[test]
fn equal_priorities_keep_the_first_registered_plugin() {
    let (builder, _) = builder(vec![
        Stage::new("first", url_type(), 10, Some(StreamType::new("application/x-a"))),
        Stage::new("second", url_type(), 10, Some(StreamType::new("application/x-b"))),
        Stage::new("low", url_type(), 1, Some(StreamType::new("application/x-c"))),
    ]);
    let picked = builder.best_match(&StreamType::url("file:///x"));
    assert_eq!(picked.map(|plugin| plugin.shortname().to_string()).as_deref(), Some("first"));

    let (builder, _) = builder_with_higher();
    let chain = builder
        .chain_new_from_url(
            Arc::new(TokenManager::new()),
            "file:///x",
            vec![StreamType::new("application/*")],
            false,
        )
        .expect("chain");
    assert_eq!(chain.chain_name(), "high");
}

fn builder_with_higher() -> (ChainBuilder, Arc<ConfigStore>) {
    builder(vec![
        Stage::new("first", url_type(), 10, Some(StreamType::new("application/x-a"))),
        Stage::new("high", url_type(), 20, Some(StreamType::new("application/x-b"))),
    ])
}

#[test]
fn missing_core_stage_is_fatal() {
    let (builder, _) = builder(vec![Stage::new(
        "demux",
        url_type(),
        1,
        Some(StreamType::new("application/ogg")),
    )]);

    let err = builder
        .chain_new_from_url(Arc::new(TokenManager::new()), "file:///a.ogg", pcm_goal(), false)
        .err();
    assert!(matches!(
        err,
        Some(ChainError::NoMatchingPlugin { ref url, ref stream_type })
            if url == "file:///a.ogg" && stream_type.starts_with("application/ogg")
    ));
}

#[test]
fn self_matching_plugins_hit_the_stage_limit() {
    let (builder, _) = builder(vec![Stage::new(
        "loop",
        StreamType::new("application/*"),
        1,
        Some(StreamType::new("application/x-loop")),
    )]);
    let builder = builder.with_settings(ChainConfig {
        max_stages: 8,
        ..ChainConfig::default()
    });

    let err = builder
        .chain_new_from_url(Arc::new(TokenManager::new()), "file:///l", pcm_goal(), false)
        .err();
    assert_eq!(
        err,
        Some(ChainError::ChainTooLong {
            url: "file:///l".to_string(),
            max_stages: 8,
        })
    );
}

#[test]
fn failing_or_unsupported_effects_are_skipped() {
    let (builder, config) = builder(vec![
        Stage::new("file", url_type(), 1, Some(pcm_out())),
        Stage::new("eq", StreamType::pcm(None, None, None), 1, None),
        Stage::new("broken", StreamType::pcm(None, None, None), 1, None).failing(),
        Stage::new("video", StreamType::new("video/*"), 1, None),
    ]);
    config.set("effect.order.0", "video");
    config.set("effect.order.1", "");
    config.set("effect.order.2", "broken");
    config.set("effect.order.3", "missing");
    config.set("effect.order.4", "eq");

    let chain = builder
        .chain_new_from_url(Arc::new(TokenManager::new()), "file:///a.wav", pcm_goal(), false)
        .expect("effects never abort the chain");

    assert_eq!(chain.chain_name(), "file:eq");
    assert_eq!(chain.decoder_stages(), 1);
    assert_eq!(config.lookup("eq.enabled").as_deref(), Some("0"));
    assert_eq!(config.lookup("broken.enabled").as_deref(), Some("0"));
    assert_eq!(config.lookup("video.enabled"), None);
}

#[test]
fn rehash_keeps_segment_but_skips_effects() {
    let (builder, config) = builder(vec![
        Stage::new("file", url_type(), 1, Some(pcm_out())),
        Stage::new("segment", StreamType::pcm(None, None, None), 1, None),
        Stage::new("eq", StreamType::pcm(None, None, None), 1, None),
    ]);
    config.set("effect.order.0", "eq");

    let playback = builder
        .chain_new_from_url(Arc::new(TokenManager::new()), "file:///a.wav", pcm_goal(), false)
        .expect("chain");
    assert_eq!(playback.chain_name(), "file:segment:eq");
    assert_eq!(playback.decoder_stages(), 2);

    let rehash = builder
        .chain_new_from_url(Arc::new(TokenManager::new()), "file:///a.wav", pcm_goal(), true)
        .expect("chain");
    assert_eq!(rehash.chain_name(), "file:segment");
    assert!(rehash.is_rehash());
}

#[test]
fn setup_decodes_url_and_records_pcm_format() {
    let (builder, _) = builder(vec![Stage::new("sid", url_type(), 1, Some(pcm_out()))]);
    let tokens = Arc::new(TokenManager::new());

    let chain = builder
        .chain_new_from_url(
            tokens.clone(),
            "file:///my%20tunes/a.sid?subtune=3&loop",
            pcm_goal(),
            false,
        )
        .expect("chain");
    let token = chain.token();

    assert_eq!(
        tokens.get_string(Token::ORIGIN, 0, "sid", "subtune").as_deref(),
        Some("3")
    );
    assert_eq!(tokens.get_int(Token::ORIGIN, 0, "sid", "loop"), Some(1));
    assert_eq!(
        tokens.get_string(token, 1, "sid", "seen_url").as_deref(),
        Some("file:///my tunes/a.sid")
    );
    assert_eq!(
        tokens.get_string(token, u8::MAX, "output", "sample_format").as_deref(),
        Some("S16")
    );
    assert_eq!(tokens.get_int(token, u8::MAX, "output", "samplerate"), Some(44_100));
    assert_eq!(tokens.get_int(token, u8::MAX, "output", "channels"), Some(2));
    assert_eq!(chain.out_type(), Some(&pcm_out()));
}

#[test]
fn chain_new_needs_an_origin_url() {
    let (builder, _) = builder(vec![Stage::new("sid", url_type(), 1, Some(pcm_out()))]);
    assert_eq!(
        builder
            .chain_new(Arc::new(TokenManager::new()), pcm_goal(), false)
            .err(),
        Some(ChainError::MissingUrl)
    );
}

type DestroyLog = Arc<Mutex<Vec<String>>>;

/// Stage that records its shortname when destroyed.
struct Tracked {
    descriptor: XformDescriptor,
    out: StreamType,
    log: DestroyLog,
}

impl Tracked {
    fn new(name: &str, accepts: StreamType, out: StreamType, log: &DestroyLog) -> Self {
        Self {
            descriptor: XformDescriptor::new(name)
                .with_capabilities(XformCapabilities {
                    read: true,
                    destroy: true,
                    ..XformCapabilities::default()
                })
                .accepts(accepts, 1),
            out,
            log: log.clone(),
        }
    }
}

impl XformPlugin for Tracked {
    fn descriptor(&self) -> &XformDescriptor {
        &self.descriptor
    }

    fn init(&self, ctx: &mut XformContext<'_>) -> Result<Box<dyn XformInstance>, PluginError> {
        ctx.set_out_type(self.out.clone());
        Ok(Box::new(TrackedInstance {
            name: self.descriptor.shortname.clone(),
            log: self.log.clone(),
        }))
    }
}

struct TrackedInstance {
    name: String,
    log: DestroyLog,
}

impl XformInstance for TrackedInstance {
    fn read(&mut self, ctx: &mut XformContext<'_>, buf: &mut [u8]) -> Result<usize, PluginError> {
        ctx.read(buf).map_err(|err| PluginError::io(err.to_string()))
    }

    fn destroy(&mut self) {
        self.log.lock().push(self.name.clone());
    }
}

fn tracked_pair(log: &DestroyLog) -> Vec<Tracked> {
    vec![
        Tracked::new("a", url_type(), StreamType::new("x/a"), log),
        Tracked::new("b", StreamType::new("x/a"), StreamType::new("x/b"), log),
    ]
}

#[test]
fn failed_setup_destroys_stages_tail_first() {
    let log = DestroyLog::default();
    let (builder, _) = builder(tracked_pair(&log));

    let err = builder
        .chain_new_from_url(Arc::new(TokenManager::new()), "file:///a", pcm_goal(), false)
        .err();
    assert!(matches!(err, Some(ChainError::NoMatchingPlugin { .. })));
    assert_eq!(*log.lock(), ["b", "a"]);

    log.lock().clear();
    assert_eq!(
        builder.browse("file:///a").err(),
        Some(ChainError::BrowseUnsupported {
            url: "file:///a".to_string(),
        })
    );
    assert_eq!(*log.lock(), ["a"]);
}

#[test]
fn dropped_chain_destroys_stages_tail_first() {
    let log = DestroyLog::default();
    let mut plugins = tracked_pair(&log);
    plugins.push(Tracked::new("c", StreamType::new("x/b"), pcm_out(), &log));
    let (builder, _) = builder(plugins);

    let chain = builder
        .chain_new_from_url(Arc::new(TokenManager::new()), "file:///a", pcm_goal(), false)
        .expect("chain");
    assert_eq!(chain.chain_name(), "a:b:c");
    assert!(log.lock().is_empty());

    drop(chain);
    assert_eq!(*log.lock(), ["c", "b", "a"]);
}

#[test]
fn negative_priorities_never_match() {
    let (builder, _) = builder(vec![Stage::new("shy", url_type(), -1, Some(pcm_out()))]);
    assert!(builder.best_match(&StreamType::url("file:///x")).is_none());
    assert!(matches!(
        builder
            .chain_new_from_url(Arc::new(TokenManager::new()), "file:///x", pcm_goal(), false)
            .err(),
        Some(ChainError::NoMatchingPlugin { .. })
    ));

    let (builder, _) = self::builder(vec![
        Stage::new("shy", url_type(), -1, Some(pcm_out())),
        Stage::new("plain", url_type(), 0, Some(pcm_out())),
    ]);
    let picked = builder.best_match(&StreamType::url("file:///x"));
    assert_eq!(picked.map(|plugin| plugin.shortname().to_string()).as_deref(), Some("plain"));
}

#[test]
fn effects_stop_at_the_stage_limit() {
    let (builder, config) = builder(vec![
        Stage::new("file", url_type(), 1, Some(pcm_out())),
        Stage::new("eq", StreamType::pcm(None, None, None), 1, None),
        Stage::new("gain", StreamType::pcm(None, None, None), 1, None),
    ]);
    let builder = builder.with_settings(ChainConfig {
        max_stages: 3,
        ..ChainConfig::default()
    });
    config.set("effect.order.0", "eq");
    config.set("effect.order.1", "gain");

    let chain = builder
        .chain_new_from_url(Arc::new(TokenManager::new()), "file:///a.wav", pcm_goal(), false)
        .expect("chain");
    assert_eq!(chain.chain_name(), "file:eq");
    assert_eq!(config.lookup("eq.enabled").as_deref(), Some("0"));
    assert_eq!(config.lookup("gain.enabled"), None);
}
