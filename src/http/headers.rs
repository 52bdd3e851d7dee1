//! Ordered header multi-map and hop-by-hop policy.
//!
//! `HeaderMultiMap` is the header model shared by the proxy, the forwarding
//! dispatcher and the echo service. Names are case-insensitive (they are
//! `HeaderName`s, which are always lowercase), keys keep the order in which
//! they first appeared and each key keeps its values in arrival order.
//!
//! The serialized form is the one the echo service renders: a JSON object
//! keyed by header name, a single value as a string, repeated values joined
//! with `", "`.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Headers that only describe one connection segment.
pub const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Ordered multi-map of header names to one or more values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMultiMap {
    entries: Vec<(HeaderName, Vec<HeaderValue>)>,
}

impl HeaderMultiMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any values already stored under `name`.
    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// All values stored under `name`, in arrival order.
    pub fn get_all(&self, name: &str) -> &[HeaderValue] {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// First value under `name` as text, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().and_then(|v| v.to_str().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        !self.get_all(name).is_empty()
    }

    /// Remove `name` and return its values.
    pub fn remove(&mut self, name: &str) -> Vec<HeaderValue> {
        match self
            .entries
            .iter()
            .position(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
        {
            Some(idx) => self.entries.remove(idx).1,
            None => Vec::new(),
        }
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, values)` in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &[HeaderValue])> {
        self.entries.iter().map(|(n, v)| (n, v.as_slice()))
    }

    /// Strip hop-by-hop headers, including those nominated by `Connection`.
    pub fn strip_hop_by_hop(&mut self) {
        let nominated: Vec<String> = self
            .get_all(header::CONNECTION.as_str())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .collect();

        self.entries.retain(|(name, _)| {
            !is_hop_by_hop(name) && !nominated.iter().any(|t| t == name.as_str())
        });
    }

    /// Copy into an `http::HeaderMap`, preserving repeated values.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, values) in &self.entries {
            for value in values {
                map.append(name.clone(), value.clone());
            }
        }
        map
    }

    /// Render as indented JSON (two-space indent).
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<&HeaderMap> for HeaderMultiMap {
    fn from(map: &HeaderMap) -> Self {
        let mut headers = HeaderMultiMap::new();
        // HeaderMap groups values per name in insertion order of the first value.
        for name in map.keys() {
            for value in map.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        headers
    }
}

impl From<HeaderMultiMap> for HeaderMap {
    fn from(headers: HeaderMultiMap) -> Self {
        headers.to_header_map()
    }
}

impl Serialize for HeaderMultiMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            let rendered = values
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()))
                .collect::<Vec<_>>()
                .join(", ");
            map.serialize_entry(name.as_str(), &rendered)?;
        }
        map.end()
    }
}
