//! Bookkeeping of archived segments awaiting reduction.
//!
//! Each (scope, target, tier) pair owns one set named
//! `{scope}__{target}__reducer__{tier}`, whose members are the full keys of
//! segments not yet rolled up into the next tier. A segment moves through
//! `decom -> minute -> hour` and leaves the registry when its hour output is
//! reduced; day is terminal and never tracked. Reduction jobs drive every
//! transition by calling [`ReductionFileRegistry::add_file`] and
//! [`ReductionFileRegistry::remove_file`]; the registry performs no reduction
//! itself.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::key::{SegmentKey, Tier};
use crate::{Error, Result};

/// A remote key/set store.
pub trait SetStore: Send + Sync {
    /// Adds `member`; returns `false` if it was already present.
    fn sadd(&self, set: &str, member: &str) -> Result<bool>;
    /// Removes `member`; returns `false` if it was not present.
    fn srem(&self, set: &str, member: &str) -> Result<bool>;
    fn smembers(&self, set: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemorySetStore {
    sets: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl MemorySetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, BTreeSet<String>>>> {
        self.sets.lock().map_err(|_| Error::LockPoisoned("set store"))
    }
}

impl SetStore for MemorySetStore {
    fn sadd(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    fn srem(&self, set: &str, member: &str) -> Result<bool> {
        let mut sets = self.lock()?;
        let Some(members) = sets.get_mut(set) else {
            return Ok(false);
        };
        let removed = members.remove(member);
        if members.is_empty() {
            sets.remove(set);
        }
        Ok(removed)
    }

    fn smembers(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SetDocument {
    sets: BTreeMap<String, BTreeSet<String>>,
}

/// Set store persisted as one JSON document.
///
/// Every mutation rewrites the document through a temp file and rename, so a
/// crash leaves either the old or the new state on disk.
#[derive(Debug)]
pub struct FileSetStore {
    path: PathBuf,
    doc: Mutex<SetDocument>,
}

impl FileSetStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let data = std::fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            SetDocument::default()
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, SetDocument>> {
        self.doc.lock().map_err(|_| Error::LockPoisoned("set store"))
    }

    fn persist(&self, doc: &SetDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(doc)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }
}

impl SetStore for FileSetStore {
    fn sadd(&self, set: &str, member: &str) -> Result<bool> {
        let mut doc = self.lock()?;
        let added = doc
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        if added {
            self.persist(&doc)?;
        }
        Ok(added)
    }

    fn srem(&self, set: &str, member: &str) -> Result<bool> {
        let mut doc = self.lock()?;
        let Some(members) = doc.sets.get_mut(set) else {
            return Ok(false);
        };
        if !members.remove(member) {
            return Ok(false);
        }
        if members.is_empty() {
            doc.sets.remove(set);
        }
        self.persist(&doc)?;
        Ok(true)
    }

    fn smembers(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

pub fn reducer_set_name(scope: &str, target: &str, tier: Tier) -> Result<String> {
    let name = tier
        .reducer_set()
        .ok_or_else(|| Error::UntrackedTier(tier.to_string()))?;
    Ok(format!("{scope}__{target}__reducer__{name}"))
}

pub struct ReductionFileRegistry {
    store: Arc<dyn SetStore>,
}

impl ReductionFileRegistry {
    pub fn new(store: impl SetStore + 'static) -> Self {
        Self::with_store(Arc::new(store))
    }

    pub fn with_store(store: Arc<dyn SetStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn SetStore {
        self.store.as_ref()
    }

    /// Tracks `key` in the set of its tier.
    ///
    /// Returns the tier the key was registered under, or `None` for keys no
    /// tier pattern matches (raw segments), which are ignored.
    pub fn add_file(&self, key: &str) -> Result<Option<Tier>> {
        let Some(tier) = Tier::detect(key)? else {
            return Ok(None);
        };
        let set = set_for_key(key, tier)?;
        if self.store.sadd(&set, key)? {
            debug!("registered {key} in {set}");
        }
        Ok(Some(tier))
    }

    /// Stops tracking `key`.
    ///
    /// Fails with [`Error::UntrackedFile`] when no tier pattern matches and
    /// with [`Error::NotRegistered`] when the key is not in its tier's set.
    pub fn remove_file(&self, key: &str) -> Result<Tier> {
        let tier = Tier::detect(key)?.ok_or_else(|| Error::UntrackedFile(key.to_string()))?;
        let set = set_for_key(key, tier)?;
        if !self.store.srem(&set, key)? {
            return Err(Error::NotRegistered {
                set,
                key: key.to_string(),
            });
        }
        debug!("removed {key} from {set}");
        Ok(tier)
    }

    /// Keys pending reduction at `tier`, sorted (and therefore chronological).
    pub fn list_files(&self, tier: Tier, target: &str, scope: &str) -> Result<Vec<String>> {
        let set = reducer_set_name(scope, target, tier)?;
        let mut files = self.store.smembers(&set)?;
        files.sort_unstable();
        Ok(files)
    }
}

fn set_for_key(key: &str, tier: Tier) -> Result<String> {
    let parsed = SegmentKey::parse(key)?;
    match (parsed.scope(), parsed.target()) {
        (Some(scope), Some(target)) => reducer_set_name(scope, target, tier),
        _ => Err(Error::InvalidKey(format!("{key} has no scope and target"))),
    }
}
