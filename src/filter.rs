//! NIP-01 subscription filters shared by the store, `REQ` handling and live fan-out.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::event::Event;

/// Parsed Nostr filter. Every present field must match; values inside a field
/// are alternatives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u32>>,
    /// Tag filters keyed by tag name without the `#`, e.g. `t` for `#t`.
    pub tags: BTreeMap<String, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

impl Filter {
    /// Build a `Filter` from a Nostr filter JSON object used by HTTP and WS APIs.
    /// Unknown keys and wrongly typed values are ignored.
    pub fn from_value(val: &Value) -> Self {
        let strings = |key: &str| {
            val.get(key).and_then(|v| v.as_array()).map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect::<Vec<_>>()
            })
        };
        let kinds = val.get("kinds").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_u64().and_then(|u| u32::try_from(u).ok()))
                .collect()
        });
        let mut tags = BTreeMap::new();
        if let Some(obj) = val.as_object() {
            for (key, v) in obj {
                if let (Some(name), Some(arr)) = (key.strip_prefix('#'), v.as_array()) {
                    let values: Vec<String> = arr
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect();
                    if !name.is_empty() {
                        tags.insert(name.to_string(), values);
                    }
                }
            }
        }
        Filter {
            ids: strings("ids"),
            authors: strings("authors"),
            kinds,
            tags,
            since: val.get("since").and_then(|v| v.as_u64()),
            until: val.get("until").and_then(|v| v.as_u64()),
            limit: val
                .get("limit")
                .and_then(|v| v.as_u64())
                .map(|v| v as usize),
        }
    }

    /// True when the filter names at least one field the store keeps an index for.
    pub fn is_indexed(&self) -> bool {
        self.ids.is_some()
            || self.authors.is_some()
            || self.kinds.is_some()
            || self.tags.keys().any(|k| is_indexed_tag(k))
    }

    /// Check whether `ev` satisfies every field of the filter. `limit` is ignored.
    pub fn matches(&self, ev: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &ev.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a == &ev.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&ev.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|s| ev.created_at < s) {
            return false;
        }
        if self.until.is_some_and(|u| ev.created_at > u) {
            return false;
        }
        self.tags.iter().all(|(name, values)| {
            ev.tags.iter().any(|tag| {
                tag.name() == Some(name.as_str())
                    && tag.value().is_some_and(|v| values.iter().any(|want| want == v))
            })
        })
    }
}

/// Single-letter tags are the ones NIP-01 says relays index.
pub fn is_indexed_tag(name: &str) -> bool {
    let mut chars = name.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphanumeric())
}
