//! Minimal file-backed storage and query engine for mixed events.

use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Result};
use rand::{seq::SliceRandom, thread_rng};
use serde_json::to_writer;
use sha2::{Digest, Sha256};

use crate::{
    event::Event,
    filter::{is_indexed_tag, Filter},
};

/// Persistence gateway consumed by the mixing pipeline.
pub trait EventStore: Send + Sync {
    /// Durably write an event. Saving an id that already exists is a no-op.
    fn save(&self, ev: &Event) -> Result<()>;
    /// Matching events, newest first, truncated to the filter's `limit`.
    fn query(&self, filter: &Filter) -> Result<Vec<Event>>;
    /// Number of matching events, ignoring `limit`.
    fn count(&self, filter: &Filter) -> Result<usize>;
    /// Remove an event by id. Returns whether anything was removed.
    fn delete(&self, id: &str) -> Result<bool>;
}

/// Persistent store for events and indexes rooted at `root`.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Create a new store rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        let dirs = [
            "events",
            "log",
            "index/by-author",
            "index/by-kind",
            "index/by-tag",
        ];
        for d in dirs {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    /// Verify id and signature for a random sample of stored events. When
    /// `expected_pubkey` is set, every sampled event must also be authored by it.
    pub fn verify_sample(&self, sample: usize, expected_pubkey: Option<&str>) -> Result<usize> {
        let mut paths = vec![];
        let events_dir = self.root.join("events");
        if events_dir.exists() {
            for entry in walkdir::WalkDir::new(events_dir) {
                let entry = entry?;
                if entry.file_type().is_file() {
                    paths.push(entry.into_path());
                }
            }
        }
        let mut rng = thread_rng();
        paths.shuffle(&mut rng);
        let take = sample.min(paths.len());
        for p in paths.iter().take(take) {
            let data = fs::read_to_string(p)?;
            let ev: Event = serde_json::from_str(&data)?;
            ev.verify()
                .map_err(|e| anyhow!("event {}: {e}", ev.id))?;
            if let Some(pk) = expected_pubkey {
                if ev.pubkey != pk {
                    bail!("event {} is signed by {} instead of the relay", ev.id, ev.pubkey);
                }
            }
        }
        Ok(take)
    }

    /// Rebuild all indexes from the `events/` tree. Entries for deleted events
    /// disappear in the process.
    pub fn reindex(&self) -> Result<()> {
        let index_dir = self.root.join("index");
        if index_dir.exists() {
            fs::remove_dir_all(&index_dir)?;
        }
        self.init()?;

        for entry in walkdir::WalkDir::new(self.root.join("events")) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let data = fs::read_to_string(entry.path())?;
                let ev: Event = serde_json::from_str(&data)?;
                self.index_event(&ev)?;
            }
        }
        Ok(())
    }

    /// Update lookup indexes for an event.
    fn index_event(&self, ev: &Event) -> Result<()> {
        if is_event_id(&ev.pubkey) {
            self.append_index(&self.root.join("index/by-author"), &ev.pubkey, &ev.id)?;
        }
        self.append_index(
            &self.root.join("index/by-kind"),
            &ev.kind.to_string(),
            &ev.id,
        )?;
        for tag in &ev.tags {
            if let (Some(name), Some(value)) = (tag.name(), tag.value()) {
                if is_indexed_tag(name) {
                    self.append_index(&self.tag_dir(name), &value_key(value), &ev.id)?;
                }
            }
        }
        Ok(())
    }

    /// Append an event ID to the index file `dir/name.txt`.
    fn append_index(&self, dir: &Path, name: &str, id: &str) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.txt", name)))?;
        writeln!(f, "{}", id)?;
        Ok(())
    }

    fn tag_dir(&self, name: &str) -> PathBuf {
        self.root.join("index/by-tag").join(name)
    }

    /// Compute the canonical path for an event ID. Anything other than a
    /// 64-character hex id has no path.
    fn event_path(&self, id: &str) -> Option<PathBuf> {
        if !is_event_id(id) {
            return None;
        }
        Some(
            self.root
                .join("events")
                .join(&id[0..2])
                .join(&id[2..4])
                .join(format!("{}.json", id)),
        )
    }

    fn read_event(&self, id: &str) -> Option<Event> {
        let data = fs::read_to_string(self.event_path(id)?).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Helper to load ID sets for a list of keys under `dir`.
    fn load_ids<'a>(&self, dir: &Path, keys: impl IntoIterator<Item = &'a str>) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        for key in keys {
            ids.extend(read_ids(&dir.join(format!("{}.txt", key)))?);
        }
        Ok(ids)
    }

    /// Intersect the index sets for every indexed field of `filter`. `None`
    /// when the filter has no indexed field at all.
    fn candidates(&self, filter: &Filter) -> Result<Option<HashSet<String>>> {
        if !filter.is_indexed() {
            return Ok(None);
        }
        let mut sets: Vec<HashSet<String>> = vec![];
        if let Some(ids) = &filter.ids {
            sets.push(ids.iter().filter(|id| is_event_id(id)).cloned().collect());
        }
        if let Some(authors) = &filter.authors {
            let keys = authors.iter().filter(|a| is_event_id(a)).map(String::as_str);
            sets.push(self.load_ids(&self.root.join("index/by-author"), keys)?);
        }
        if let Some(kinds) = &filter.kinds {
            let keys: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
            sets.push(self.load_ids(
                &self.root.join("index/by-kind"),
                keys.iter().map(String::as_str),
            )?);
        }
        for (name, values) in &filter.tags {
            if is_indexed_tag(name) {
                let keys: Vec<String> = values.iter().map(|v| value_key(v)).collect();
                sets.push(self.load_ids(&self.tag_dir(name), keys.iter().map(String::as_str))?);
            }
        }
        let mut iter = sets.into_iter();
        let Some(mut ids) = iter.next() else {
            return Ok(None);
        };
        for s in iter {
            ids = ids.intersection(&s).cloned().collect();
        }
        Ok(Some(ids))
    }
}

impl EventStore for Store {
    fn save(&self, ev: &Event) -> Result<()> {
        let path = self
            .event_path(&ev.id)
            .ok_or_else(|| anyhow!("invalid event id {:?}", ev.id))?;
        // Skip if the event already exists on disk.
        if path.exists() {
            return Ok(());
        }
        // Write the event JSON atomically to its canonical path.
        let parent_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        to_writer(&tmp, ev)?;
        tmp.persist(&path)?;

        // Append the event to a newline-delimited log for easy tailing.
        let log_dir = self.root.join("log");
        fs::create_dir_all(&log_dir)?;
        let mut log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("events.ndjson"))?;
        serde_json::to_writer(&mut log_file, ev)?;
        log_file.write_all(b"\n")?;

        self.index_event(ev)
    }

    fn query(&self, filter: &Filter) -> Result<Vec<Event>> {
        let Some(ids) = self.candidates(filter)? else {
            return Ok(vec![]);
        };
        let mut events: Vec<Event> = ids
            .into_iter()
            .filter_map(|id| self.read_event(&id))
            .filter(|ev| filter.matches(ev))
            .collect();
        events.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    fn count(&self, filter: &Filter) -> Result<usize> {
        let unlimited = Filter {
            limit: None,
            ..filter.clone()
        };
        Ok(self.query(&unlimited)?.len())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let path = self
            .event_path(id)
            .ok_or_else(|| anyhow!("invalid event id {id:?}"))?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}

/// Read newline-separated IDs from a text file.
fn read_ids(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(Default::default());
    }
    let data = fs::read_to_string(path)?;
    Ok(data.lines().map(|s| s.to_string()).collect())
}

/// Tag values are arbitrary strings, so index files are named by their hash.
fn value_key(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// 32-byte lowercase hex, the shape of both event ids and pubkeys.
fn is_event_id(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
