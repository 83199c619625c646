//! Stream type descriptors used to negotiate adjacent xform stages.
//!
//! A [`StreamType`] is an immutable bag of typed parameters. Plugins declare
//! the types they accept as *patterns* and the type they produce as a concrete
//! value; [`StreamType::matches`] decides whether a produced type satisfies a
//! pattern.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sample::SampleFormat;
use crate::value::Value;

/// Well-known stream type keys.
pub mod keys {
    pub const MIMETYPE: &str = "mimetype";
    pub const URL: &str = "url";
    pub const NAME: &str = "name";
    pub const FMT_FORMAT: &str = "fmt_format";
    pub const FMT_CHANNELS: &str = "fmt_channels";
    pub const FMT_SAMPLERATE: &str = "fmt_samplerate";
}

pub const MIME_URL: &str = "application/x-url";
pub const MIME_PCM: &str = "audio/pcm";

/// Integer parameter value that matches any concrete integer.
pub const ANY_INT: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamType {
    params: BTreeMap<String, Value>,
}

impl StreamType {
    pub fn new(mimetype: impl Into<String>) -> Self {
        Self::default().with_str(keys::MIMETYPE, mimetype)
    }

    /// Raw URL type used to seed the first stage of every chain.
    pub fn url(url: impl Into<String>) -> Self {
        Self::new(MIME_URL).with_str(keys::URL, url)
    }

    /// PCM type with optional (`None` = wildcard) format parameters.
    pub fn pcm(
        format: Option<SampleFormat>,
        channels: Option<u16>,
        samplerate: Option<u32>,
    ) -> Self {
        Self::new(MIME_PCM)
            .with_int(keys::FMT_FORMAT, format.map_or(ANY_INT, SampleFormat::code))
            .with_int(keys::FMT_CHANNELS, channels.map_or(ANY_INT, i64::from))
            .with_int(keys::FMT_SAMPLERATE, samplerate.map_or(ANY_INT, i64::from))
    }

    pub fn with_str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.params.insert(key.to_string(), Value::Int(value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    pub fn mimetype(&self) -> Option<&str> {
        self.get_str(keys::MIMETYPE)
    }

    pub fn sample_format(&self) -> Option<SampleFormat> {
        self.get_int(keys::FMT_FORMAT).and_then(SampleFormat::from_code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.params.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Returns whether `candidate` satisfies `self` used as a pattern.
    ///
    /// Every parameter of the pattern must be present in the candidate.
    /// String parameters are glob patterns (`*`, `?`); integer parameters
    /// match when equal or when the pattern holds [`ANY_INT`].
    pub fn matches(&self, candidate: &StreamType) -> bool {
        self.params.iter().all(|(key, expected)| {
            let Some(actual) = candidate.params.get(key) else {
                return false;
            };
            match (expected, actual) {
                (Value::String(pattern), Value::String(actual)) => glob_match(pattern, actual),
                (Value::Int(expected), Value::Int(actual)) => {
                    *expected == ANY_INT || expected == actual
                },
                (expected, actual) => expected == actual,
            }
        })
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mimetype().unwrap_or("<untyped>"))?;
        let mut first = true;
        for (key, value) in &self.params {
            if key == keys::MIMETYPE {
                continue;
            }
            f.write_str(if first { "; " } else { ", " })?;
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            },
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            },
            _ => {
                let Some((star, matched)) = backtrack else {
                    return false;
                };
                p = star + 1;
                t = matched + 1;
                backtrack = Some((star, matched + 1));
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}
