//! URL helpers for media library entries.
//!
//! Entry URLs are stored encoded. Query arguments carry per-entry hints
//! (`file:///a.sid?subtune=9`) that are turned into origin facts.

use std::borrow::Cow;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Characters escaped by [`encode_url`]; `/` and `:` stay readable.
const URL_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A single decoded query argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlArg {
    /// `key=value`
    Value { key: String, value: String },
    /// bare `key`
    Flag { key: String },
}

impl UrlArg {
    pub fn key(&self) -> &str {
        match self {
            Self::Value { key, .. } | Self::Flag { key } => key,
        }
    }
}

/// Percent-decodes `raw`, turning `+` into a space.
///
/// Returns `None` for truncated or non-hex escapes and for non-UTF-8 results.
pub fn decode_url(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        if *byte == b'%' {
            let escape = bytes.get(idx + 1..idx + 3)?;
            if !escape.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
        }
    }
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

pub fn encode_url(raw: &str) -> String {
    utf8_percent_encode(raw, URL_ESCAPE).to_string()
}

/// Splits `base?k=v&flag` into the still-encoded base and decoded arguments.
///
/// Empty argument segments are skipped. Returns `None` if an argument fails
/// to decode.
pub fn split_url_args(url: &str) -> Option<(&str, Vec<UrlArg>)> {
    let Some((base, query)) = url.split_once('?') else {
        return Some((url, Vec::new()));
    };
    let mut args = Vec::new();
    for param in query.split('&').filter(|param| !param.is_empty()) {
        let arg = match param.split_once('=') {
            Some((key, value)) => UrlArg::Value {
                key: decode_url(key)?,
                value: decode_url(value)?,
            },
            None => UrlArg::Flag {
                key: decode_url(param)?,
            },
        };
        args.push(arg);
    }
    Some((base, args))
}
