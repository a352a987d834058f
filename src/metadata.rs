//! Cached metadata of the file that is currently loaded, and song identity extraction.

use crate::host::{HostError, PropertySource, PropertyValue};
use std::collections::BTreeMap;

/// Property holding the flat tag map of the current file.
pub const METADATA_PROPERTY: &str = "metadata";
pub const FILENAME_PROPERTY: &str = "filename";

pub const ARTIST_KEYS: [&str; 2] = ["artist", "ARTIST"];
pub const TITLE_KEYS: [&str; 3] = ["title", "TITLE", "icy-title"];
pub const ALBUM_KEYS: [&str; 2] = ["album", "ALBUM"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub artist: String,
    pub title: String,
    pub album: String,
}

/// Snapshot of one loaded file. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataCache {
    entries: BTreeMap<String, PropertyValue>,
    filename: String,
}

impl MetadataCache {
    pub fn new(entries: BTreeMap<String, PropertyValue>, filename: impl Into<String>) -> Self {
        Self {
            entries,
            filename: filename.into(),
        }
    }

    /// Rebuilds the cache from the player. Read failures leave the field empty;
    /// only a lost connection is reported.
    pub fn load<P: PropertySource + ?Sized>(props: &P) -> Result<Self, HostError> {
        let entries = match props.get_property(METADATA_PROPERTY) {
            Ok(value) => value.into_map().unwrap_or_default(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "no metadata for the loaded file");
                BTreeMap::new()
            }
        };
        let filename = match props.get_osd_string(FILENAME_PROPERTY) {
            Ok(name) => name,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, "filename unavailable");
                String::new()
            }
        };
        Ok(Self::new(entries, filename))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.filename.is_empty()
    }

    /// Probes every key in order; the last non-empty string value wins.
    pub fn resolve(&self, keys: &[&str]) -> String {
        let mut found = "";
        for key in keys {
            let Some(value) = self.entries.get(*key).and_then(PropertyValue::as_str) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            found = value;
        }
        found.to_string()
    }

    pub fn track(&self) -> TrackMetadata {
        TrackMetadata {
            artist: self.resolve(&ARTIST_KEYS),
            title: self.resolve(&TITLE_KEYS),
            album: self.resolve(&ALBUM_KEYS),
        }
    }
}
