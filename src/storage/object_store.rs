use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::debug;

use crate::{Error, Result};

/// Durable object storage, addressed by bucket and key.
///
/// An object is considered durable once `put` returns `Ok`. `list` returns
/// keys in lexical order, which for segment keys is chronological order.
pub trait ObjectStore: Send + Sync {
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()>;
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    fn delete(&self, bucket: &str, key: &str) -> Result<()>;
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory object store.
///
/// Keeps the order of successful puts so callers can check upload ordering,
/// and can be told to fail puts to exercise upload-failure paths.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    put_log: Mutex<Vec<String>>,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys of successful puts, oldest first.
    pub fn put_log(&self) -> Vec<String> {
        self.put_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::Release);
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        if self.fail_puts.load(Ordering::Acquire) {
            return Err(Error::Upload {
                key: key.to_string(),
                reason: "object store unavailable".to_string(),
            });
        }
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| Error::LockPoisoned("object store"))?;
        objects.insert((bucket.to_string(), key.to_string()), data.to_vec());
        self.put_log
            .lock()
            .map_err(|_| Error::LockPoisoned("object store"))?
            .push(key.to_string());
        debug!("memory put {bucket}/{key} ({} bytes)", data.len());
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| Error::LockPoisoned("object store"))?;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| Error::LockPoisoned("object store"))?;
        objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| Error::LockPoisoned("object store"))?;
        Ok(objects
            .keys()
            .filter(|(b, key)| b == bucket && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }
}
