use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use cadenza_xform::medialib::{properties, with_session};
use cadenza_xform::{
    BrowseListing, ChainBuilder, ChainError, ConfigStore, MediaLibrary, MemoryMedialib,
    MetadataEvent, MetadataEventHub, PluginError, PluginRegistry, SampleFormat, StreamType,
    TokenManager, Value, XformCapabilities, XformContext, XformDescriptor, XformInstance,
    XformPlugin,
};
use cadenza_xform_core::stream_type::{MIME_URL, keys};

const OCTET_STREAM: &str = "application/octet-stream";

/// Serves in-memory files for `memfile://` urls.
struct MemFile {
    descriptor: XformDescriptor,
    files: HashMap<String, Vec<u8>>,
}

impl MemFile {
    fn new(files: &[(&str, &[u8])]) -> Self {
        Self {
            descriptor: XformDescriptor::new("memfile").accepts(
                StreamType::new(MIME_URL).with_str(keys::URL, "memfile://*"),
                50,
            ),
            files: files
                .iter()
                .map(|(url, data)| (url.to_string(), data.to_vec()))
                .collect(),
        }
    }
}

impl XformPlugin for MemFile {
    fn descriptor(&self) -> &XformDescriptor {
        &self.descriptor
    }

    fn init(&self, ctx: &mut XformContext<'_>) -> Result<Box<dyn XformInstance>, PluginError> {
        let url = ctx.url().unwrap_or_default().to_string();
        let data = self
            .files
            .get(&url)
            .cloned()
            .ok_or_else(|| PluginError::invalid_input(format!("no such file: {url}")))?;
        ctx.set_out_type(StreamType::new(OCTET_STREAM));
        Ok(Box::new(MemFileReader { data, pos: 0 }))
    }
}

struct MemFileReader {
    data: Vec<u8>,
    pos: usize,
}

impl XformInstance for MemFileReader {
    fn read(&mut self, _ctx: &mut XformContext<'_>, buf: &mut [u8]) -> Result<usize, PluginError> {
        let remaining = &self.data[self.pos..];
        let len = remaining.len().min(buf.len());
        buf[..len].copy_from_slice(&remaining[..len]);
        self.pos += len;
        Ok(len)
    }
}

/// Turns octet streams into 16-bit stereo PCM and tags a title.
struct RawDecoder {
    descriptor: XformDescriptor,
}

impl XformPlugin for RawDecoder {
    fn descriptor(&self) -> &XformDescriptor {
        &self.descriptor
    }

    fn init(&self, ctx: &mut XformContext<'_>) -> Result<Box<dyn XformInstance>, PluginError> {
        ctx.metadata_set_str("title", "Raw Tune");
        ctx.set_out_type(StreamType::pcm(Some(SampleFormat::S16), Some(2), Some(48_000)));
        Ok(Box::new(Relay))
    }
}

/// Effect that passes PCM through untouched.
struct Gain {
    descriptor: XformDescriptor,
}

impl XformPlugin for Gain {
    fn descriptor(&self) -> &XformDescriptor {
        &self.descriptor
    }

    fn init(&self, ctx: &mut XformContext<'_>) -> Result<Box<dyn XformInstance>, PluginError> {
        ctx.copy_out_type();
        Ok(Box::new(Relay))
    }
}

struct Relay;

impl XformInstance for Relay {
    fn read(&mut self, ctx: &mut XformContext<'_>, buf: &mut [u8]) -> Result<usize, PluginError> {
        ctx.read(buf).map_err(|err| PluginError::io(err.to_string()))
    }
}

/// Lists a fixed directory for `dir://` urls.
struct DirList {
    descriptor: XformDescriptor,
}

impl XformPlugin for DirList {
    fn descriptor(&self) -> &XformDescriptor {
        &self.descriptor
    }

    fn init(&self, ctx: &mut XformContext<'_>) -> Result<Box<dyn XformInstance>, PluginError> {
        ctx.set_out_type(StreamType::new("application/x-dir"));
        Ok(Box::new(DirLister))
    }
}

struct DirLister;

impl XformInstance for DirLister {
    fn read(&mut self, _ctx: &mut XformContext<'_>, _buf: &mut [u8]) -> Result<usize, PluginError> {
        Ok(0)
    }

    fn browse(
        &mut self,
        _ctx: &mut XformContext<'_>,
        _url: &str,
        listing: &mut BrowseListing,
    ) -> Result<(), PluginError> {
        listing.add_entry("track 10.raw", false);
        listing.add_entry("track 2.raw", false);
        listing.add_entry("Albums", true);
        Ok(())
    }
}

fn registry(song: &[u8]) -> Arc<PluginRegistry> {
    let registry = Arc::new(PluginRegistry::new());
    registry.register(Arc::new(MemFile::new(&[("memfile://song.raw", song)])));
    registry.register(Arc::new(RawDecoder {
        descriptor: XformDescriptor::new("decoder").accepts(StreamType::new(OCTET_STREAM), 10),
    }));
    registry.register(Arc::new(Gain {
        descriptor: XformDescriptor::new("gain").accepts(StreamType::pcm(None, None, None), 1),
    }));
    registry.register(Arc::new(DirList {
        descriptor: XformDescriptor::new("dirlist")
            .with_capabilities(XformCapabilities {
                read: true,
                browse: true,
                ..XformCapabilities::default()
            })
            .accepts(StreamType::new(MIME_URL).with_str(keys::URL, "dir://*"), 1),
    }));
    registry
}

fn pcm_goal() -> Vec<StreamType> {
    vec![StreamType::pcm(None, None, None)]
}

#[test]
fn playback_chain_reads_reacts_and_records_play_stats() -> Result<()> {
    cadenza_xform::init_tracing();
    let song: Vec<u8> = (0..=255).cycle().take(10_000).collect();

    let medialib = Arc::new(MemoryMedialib::new());
    let entry = medialib.entry_new("memfile://song.raw?start=12");
    let config = Arc::new(ConfigStore::new());
    config.set("effect.order.0", "gain");

    let tokens = Arc::new(TokenManager::with_medialib(medialib.clone()));
    let hub = Arc::new(MetadataEventHub::new());
    let events = hub.subscribe();
    tokens.add_observer(hub.clone());
    with_session(medialib.as_ref(), |session| tokens.reset(session, entry));

    let builder =
        ChainBuilder::new(registry(&song), config.clone()).with_medialib(medialib.clone());
    let mut chain = builder.chain_new(tokens.clone(), pcm_goal(), false)?;
    assert_eq!(chain.chain_name(), "memfile:decoder:gain");
    assert_eq!(chain.entry(), Some(entry));

    let mut played = Vec::new();
    let mut buf = [0_u8; 777];
    loop {
        let read = chain.read(&mut buf)?;
        if read == 0 {
            break;
        }
        played.extend_from_slice(&buf[..read]);
    }
    assert_eq!(played, song);
    assert!(chain.is_eos());

    let MetadataEvent::Changed { facts, .. } = events.try_recv().context("react event")?;
    assert_eq!(facts.get("title", "decoder"), Some(&Value::from("Raw Tune")));
    assert_eq!(facts.get("samplerate", "decoder"), Some(&Value::Int(48_000)));

    let session = medialib.begin();
    assert_eq!(
        session.entry_property_get(entry, properties::CHAIN),
        Some(Value::from("memfile:decoder:gain"))
    );
    assert_eq!(
        session.entry_property_get(entry, properties::TIMESPLAYED),
        Some(Value::Int(1))
    );
    assert!(session.entry_property_get(entry, properties::LASTSTARTED).is_some());
    assert_eq!(
        session.entry_property_get(entry, "title"),
        Some(Value::from("Raw Tune"))
    );
    assert_eq!(
        session.entry_property_get(entry, properties::URL),
        Some(Value::from("memfile://song.raw?start=12"))
    );
    drop(session);
    assert_eq!(
        medialib.property_source(entry, "title").as_deref(),
        Some("plugin/decoder")
    );
    Ok(())
}

#[test]
fn rehash_does_not_count_as_a_play() -> Result<()> {
    let medialib = Arc::new(MemoryMedialib::new());
    let entry = medialib.entry_new("memfile://song.raw");
    let tokens = Arc::new(TokenManager::with_medialib(medialib.clone()));
    with_session(medialib.as_ref(), |session| tokens.reset(session, entry));

    let builder = ChainBuilder::new(registry(b"abcd"), Arc::new(ConfigStore::new()))
        .with_medialib(medialib.clone());
    let chain = builder.chain_new(tokens, pcm_goal(), true)?;
    assert!(chain.is_rehash());

    let session = medialib.begin();
    assert_eq!(
        session.entry_property_get(entry, properties::TIMESPLAYED),
        Some(Value::Int(0))
    );
    assert_eq!(session.entry_property_get(entry, properties::LASTSTARTED), None);
    Ok(())
}

#[test]
fn effect_config_changes_rebuild_the_chain() -> Result<()> {
    let config = Arc::new(ConfigStore::new());
    config.set("effect.order.0", "gain");
    let changes = config.subscribe();

    let builder = ChainBuilder::new(registry(b"0123456789"), config.clone());
    let mut chain = builder.chain_new_from_url(
        Arc::new(TokenManager::new()),
        "memfile://song.raw",
        pcm_goal(),
        false,
    )?;
    let info = chain.info_handle();
    assert_eq!(info.generation(), 1);
    assert_eq!(info.load().name(), "memfile:decoder:gain");

    let mut head = [0_u8; 4];
    assert_eq!(chain.read(&mut head)?, 4);

    config.set("effect.order.0", "");
    let event = changes.try_recv().context("config event")?;
    assert!(builder.handle_config_event(&mut chain, &event));
    assert_eq!(info.generation(), 2);
    assert_eq!(info.load().name(), "memfile:decoder");

    let mut rest = [0_u8; 16];
    let read = chain.read(&mut rest)?;
    assert_eq!(&rest[..read], b"456789");
    Ok(())
}

#[test]
fn browse_lists_entries_in_natural_order() -> Result<()> {
    let builder = ChainBuilder::new(registry(b""), Arc::new(ConfigStore::new()));

    let entries = builder.browse("dir:///music")?;
    let paths = entries
        .iter()
        .map(|entry| entry.path().ok_or_else(|| anyhow!("entry without path")))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(
        paths,
        vec![
            "dir:///music/Albums",
            "dir:///music/track%202.raw",
            "dir:///music/track%2010.raw",
        ]
    );
    assert!(entries[0].is_dir());

    assert_eq!(
        builder.browse("memfile://song.raw").err(),
        Some(ChainError::BrowseUnsupported {
            url: "memfile://song.raw".to_string(),
        })
    );
    assert_eq!(
        builder.browse("ftp://nowhere").err(),
        Some(ChainError::BrowseUnsupported {
            url: "ftp://nowhere".to_string(),
        })
    );
    Ok(())
}
