use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::storage::ObjectStore;
use crate::{Error, Result};

/// Object store backed by a local directory tree.
///
/// Each bucket is a directory under `root` and each key a relative path inside
/// it. Puts write a `.tmp` sibling, fsync it, rename it into place and fsync
/// the parent, so a listed object is always complete.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        validate_component("bucket", bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.bucket_dir(bucket)?;
        if key.is_empty() {
            return Err(Error::InvalidKey("empty object key".to_string()));
        }
        for component in key.split('/') {
            validate_component("key", component)?;
            path.push(component);
        }
        Ok(path)
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let dest = self.object_path(bucket, key)?;
        let parent = dest
            .parent()
            .ok_or_else(|| Error::InvalidKey(key.to_string()))?;
        std::fs::create_dir_all(parent)?;

        let tmp = tmp_path_for(&dest)?;
        let _ = std::fs::remove_file(&tmp);
        let mut output = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        output.write_all(data)?;
        output.sync_all()?;
        std::fs::rename(&tmp, &dest)?;
        fsync_dir(parent)?;
        debug!("stored {} ({} bytes)", dest.display(), data.len());
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let dir = self.bucket_dir(bucket)?;
        let mut keys = Vec::new();
        collect_keys(&dir, "", &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort_unstable();
        Ok(keys)
    }
}

fn collect_keys(dir: &Path, prefix: &str, keys: &mut Vec<String>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = match entry.file_name().to_str() {
            Some(name) => name.to_string(),
            None => continue,
        };
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        if entry.file_type()?.is_dir() {
            collect_keys(&entry.path(), &key, keys)?;
            continue;
        }
        if name.ends_with(".tmp") {
            continue;
        }
        keys.push(key);
    }
    Ok(())
}

fn validate_component(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(Error::InvalidKey(format!("invalid {field} component {value:?}")));
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::InvalidKey(format!("missing filename for {}", path.display())))?
        .to_string_lossy();
    Ok(path.with_file_name(format!("{name}.tmp")))
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_list_delete() {
        let dir = tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path()).expect("store");

        store.put("logs", "tlm/20220101/b.log", b"bb").expect("put b");
        store.put("logs", "tlm/20220101/a.log", b"a").expect("put a");
        store.put("logs", "cmd/20220101/c.log", b"c").expect("put c");

        assert_eq!(
            store.list("logs", "tlm/").expect("list"),
            vec!["tlm/20220101/a.log", "tlm/20220101/b.log"]
        );
        assert_eq!(store.get("logs", "tlm/20220101/b.log").expect("get"), b"bb");
        assert!(!dir.path().join("logs/tlm/20220101/b.log.tmp").exists());

        store.delete("logs", "tlm/20220101/b.log").expect("delete");
        store.delete("logs", "tlm/20220101/b.log").expect("delete again");
        assert!(matches!(
            store.get("logs", "tlm/20220101/b.log"),
            Err(Error::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn rejects_escaping_keys() {
        let dir = tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path()).expect("store");
        assert!(store.put("logs", "../escape", b"x").is_err());
        assert!(store.put("..", "k", b"x").is_err());
        assert!(store.put("logs", "a//b", b"x").is_err());
    }

    #[test]
    fn missing_bucket_lists_empty() {
        let dir = tempdir().expect("tempdir");
        let store = LocalObjectStore::new(dir.path()).expect("store");
        assert!(store.list("nothing", "").expect("list").is_empty());
    }
}
