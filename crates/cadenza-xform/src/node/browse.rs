//! Directory-style listings produced by browsable plugins.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use cadenza_xform_core::Value;
use serde::Serialize;
use tracing::warn;

use crate::medialib::url::encode_url;

pub mod keys {
    pub const PATH: &str = "path";
    pub const ISDIR: &str = "isdir";
    pub const REALPATH: &str = "realpath";
    pub const INTSORT: &str = "intsort";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BrowseEntry {
    properties: BTreeMap<String, Value>,
}

impl BrowseEntry {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn path(&self) -> Option<&str> {
        self.get(keys::PATH).and_then(Value::as_str)
    }

    pub fn is_dir(&self) -> bool {
        self.get(keys::ISDIR).and_then(Value::as_int) == Some(1)
    }

    pub fn intsort(&self) -> Option<i64> {
        self.get(keys::INTSORT).and_then(Value::as_int)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }
}

/// Collects entries for the url being browsed.
#[derive(Debug)]
pub struct BrowseListing {
    base_url: String,
    entries: Vec<BrowseEntry>,
    next_index: u32,
}

impl BrowseListing {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            entries: Vec::new(),
            next_index: 0,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Appends an entry for `filename` under the base url. Names containing
    /// `/` are rejected.
    pub fn add_entry(&mut self, filename: &str, is_dir: bool) -> bool {
        if filename.contains('/') {
            warn!(%filename, "browse entry names cannot contain '/'");
            return false;
        }

        let separator = if self.base_url.ends_with('/') || self.base_url.is_empty() {
            ""
        } else {
            "/"
        };
        let path = format!(
            "{}{separator}{}",
            encode_url(&self.base_url),
            encode_url(filename)
        );

        let mut entry = BrowseEntry::default();
        entry
            .properties
            .insert(keys::PATH.to_string(), Value::String(path));
        entry
            .properties
            .insert(keys::ISDIR.to_string(), Value::Int(i64::from(is_dir)));
        self.entries.push(entry);
        true
    }

    /// Sets a property on the most recently added entry.
    pub fn add_property(&mut self, key: &str, value: impl Into<Value>) -> bool {
        let Some(entry) = self.entries.last_mut() else {
            warn!(%key, "browse property without an entry");
            return false;
        };
        entry.properties.insert(key.to_string(), value.into());
        true
    }

    /// Adds an entry whose `realpath` points at `url` plus `args`. Unnamed
    /// entries are numbered in insertion order.
    pub fn add_symlink(&mut self, basename: Option<&str>, url: &str, args: &[&str]) -> bool {
        let name = match basename {
            Some(name) => name.to_string(),
            None => {
                let index = self.next_index;
                self.next_index += 1;
                index.to_string()
            },
        };
        if !self.add_entry(&name, false) {
            return false;
        }

        let mut realpath = encode_url(url);
        for (idx, arg) in args.iter().enumerate() {
            realpath.push(if idx == 0 { '?' } else { '&' });
            realpath.push_str(arg);
        }
        self.add_property(keys::REALPATH, realpath)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by `intsort` when both carry one, else by path.
    pub(crate) fn into_sorted(mut self) -> Vec<BrowseEntry> {
        self.entries.sort_by(compare_entries);
        self.entries
    }
}

fn compare_entries(a: &BrowseEntry, b: &BrowseEntry) -> Ordering {
    if let (Some(x), Some(y)) = (a.intsort(), b.intsort()) {
        return x.cmp(&y);
    }
    match (a.path(), b.path()) {
        (Some(x), Some(y)) => natcmp(x, y),
        _ => Ordering::Equal,
    }
}

/// Case-insensitive comparison that orders digit runs by numeric value.
pub(crate) fn natcmp(a: &str, b: &str) -> Ordering {
    let mut lhs = a.chars().peekable();
    let mut rhs = b.chars().peekable();
    loop {
        match (lhs.peek().copied(), rhs.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = take_digits(&mut lhs);
                let right = take_digits(&mut rhs);
                let ord = compare_digit_runs(&left, &right);
                if ord != Ordering::Equal {
                    return ord;
                }
            },
            (Some(x), Some(y)) => {
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                lhs.next();
                rhs.next();
            },
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
