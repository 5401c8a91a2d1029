//! Plugin cache with digest-based change detection
//!
//! The cache remembers, per plugin name, the digests of the last description
//! sent to the renderer. A fresh description is compared against it to decide
//! whether anything needs to be sent at all, and if so which attributes:
//! - The folded description digest answers "did anything change" cheaply
//! - Per-attribute digests narrow a change down to the attributes that moved
//! - Optionally the full description is retained for later inspection
//!
//! Digests are 32-bit, so two different values can collide; a collision is
//! treated as "unchanged". All access goes through one mutex that is only held
//! for the duration of a single lookup or update.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, trace};

use crate::hash::{name_digest, Digest};
use crate::plugin::PluginDesc;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Plugin {name} cached as {cached}, got {requested}")]
    KindMismatch {
        name: String,
        cached: String,
        requested: String,
    },
}

/// Digests computed for one description
#[derive(Debug, Clone, PartialEq)]
pub struct DescDigest {
    /// Fold of all attribute names and value digests in attribute order
    pub all: Digest,
    /// Attribute name -> digest of its value
    pub attrs: HashMap<String, Digest>,
}

impl DescDigest {
    /// Compute digests for a description
    pub fn of(desc: &PluginDesc) -> Self {
        let mut all = Digest::seed();
        let mut attrs = HashMap::with_capacity(desc.attrs.len());
        for (name, attr) in &desc.attrs {
            let digest = attr.digest();
            all = all.fold(name_digest(name)).fold(digest);
            attrs.insert(name.clone(), digest);
        }
        Self { all, attrs }
    }
}

/// Cache entry for a single plugin
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Plugin type the name was first synchronized as
    pub kind: String,
    /// Digests of the last synchronized description
    pub digest: DescDigest,
    /// Frame the entry was last written at (only tracked when retaining data)
    pub frame: Option<f32>,
    /// Full description (only kept when retaining data)
    pub desc: Option<PluginDesc>,
}

/// Result of comparing a description against the cache
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Name was never cached
    New,
    /// Name is cached under a different plugin type
    KindChanged { cached: String },
    /// Nothing differs
    Unchanged,
    /// Some attributes differ; names of the changed/new attributes and of
    /// attributes that disappeared
    Changed {
        changed: Vec<String>,
        removed: Vec<String>,
    },
}

impl Comparison {
    pub fn differs(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Name-keyed cache of synchronized plugin state
#[derive(Debug, Default)]
pub struct PluginCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    retain_data: bool,
}

impl PluginCache {
    /// Create an empty cache that only stores digests
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache that also keeps full descriptions and frames
    pub fn retaining() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retain_data: true,
        }
    }

    pub fn retains_data(&self) -> bool {
        self.retain_data
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // Entries are replaced whole, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check if a plugin with this name has been synchronized
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Names of all cached plugins
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Compare a description against the cached state
    pub fn compare(&self, desc: &PluginDesc) -> Comparison {
        let entries = self.lock();
        let Some(entry) = entries.get(&desc.name) else {
            return Comparison::New;
        };

        if entry.kind != desc.kind {
            return Comparison::KindChanged {
                cached: entry.kind.clone(),
            };
        }

        let digest = DescDigest::of(desc);
        if digest.all == entry.digest.all {
            return Comparison::Unchanged;
        }

        let changed: Vec<String> = digest
            .attrs
            .iter()
            .filter(|(name, hash)| entry.digest.attrs.get(*name) != Some(*hash))
            .map(|(name, _)| name.clone())
            .collect();

        let removed: Vec<String> = entry
            .digest
            .attrs
            .keys()
            .filter(|name| !digest.attrs.contains_key(*name))
            .cloned()
            .collect();

        if changed.is_empty() && removed.is_empty() {
            // Per-attribute digests all match
            return Comparison::Unchanged;
        }

        Comparison::Changed { changed, removed }
    }

    /// Check whether sending `desc` would change renderer state
    ///
    /// New names and kind changes count as differences. Attributes that were
    /// cached but are missing from `desc` also count.
    pub fn differs(&self, desc: &PluginDesc) -> bool {
        self.compare(desc).differs()
    }

    /// Check whether the name is cached under a different plugin type
    pub fn differs_kind(&self, desc: &PluginDesc) -> bool {
        self.lock()
            .get(&desc.name)
            .is_some_and(|entry| entry.kind != desc.kind)
    }

    /// Build the sparse description holding only new and changed attributes
    ///
    /// A name that was never cached yields the full description. Attributes
    /// that disappeared can't be expressed here; see
    /// [`PluginCache::removed_attributes`].
    pub fn differences(&self, desc: &PluginDesc) -> Result<PluginDesc, CacheError> {
        match self.compare(desc) {
            Comparison::New => Ok(desc.clone()),
            Comparison::KindChanged { cached } => Err(CacheError::KindMismatch {
                name: desc.name.clone(),
                cached,
                requested: desc.kind.clone(),
            }),
            Comparison::Unchanged => Ok(desc.empty_like()),
            Comparison::Changed { changed, .. } => {
                let mut diff = desc.empty_like();
                for name in changed {
                    if let Some(attr) = desc.attrs.get(&name) {
                        diff.attrs.insert(name, attr.clone());
                    }
                }
                Ok(diff)
            }
        }
    }

    /// Attribute names present in the cache but missing from `desc`
    pub fn removed_attributes(&self, desc: &PluginDesc) -> Vec<String> {
        let entries = self.lock();
        let Some(entry) = entries.get(&desc.name) else {
            return Vec::new();
        };
        let mut removed: Vec<String> = entry
            .digest
            .attrs
            .keys()
            .filter(|name| !desc.attrs.contains_key(*name))
            .cloned()
            .collect();
        removed.sort();
        removed
    }

    /// Store the digests of `desc` as the synchronized state
    pub fn update(&self, desc: &PluginDesc, frame: f32) {
        let digest = DescDigest::of(desc);
        trace!(
            plugin = %desc.name,
            digest = %digest.all,
            attrs = digest.attrs.len(),
            "Updating plugin cache"
        );

        let entry = CacheEntry {
            kind: desc.kind.clone(),
            digest,
            frame: self.retain_data.then_some(frame),
            desc: self.retain_data.then(|| desc.clone()),
        };
        self.lock().insert(desc.name.clone(), entry);
    }

    /// Retained description of a plugin (retaining caches only)
    pub fn cached(&self, name: &str) -> Option<PluginDesc> {
        self.lock().get(name).and_then(|entry| entry.desc.clone())
    }

    /// Frame a plugin was last written at (retaining caches only)
    pub fn frame_of(&self, name: &str) -> Option<f32> {
        self.lock().get(name).and_then(|entry| entry.frame)
    }

    /// Digest of the last synchronized description
    pub fn digest_of(&self, name: &str) -> Option<Digest> {
        self.lock().get(name).map(|entry| entry.digest.all)
    }

    /// Evict one plugin
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.lock().remove(name).is_some();
        if removed {
            debug!(plugin = %name, "Removed plugin from cache");
        }
        removed
    }

    /// Evict everything
    pub fn clear(&self) {
        let mut entries = self.lock();
        debug!(count = entries.len(), "Clearing plugin cache");
        entries.clear();
    }
}
